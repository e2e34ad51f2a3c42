use std::fmt::Debug;
use std::hash::Hash;

use crate::error::Result;
use crate::view::reconcile::{self, Edit};

/// Keys the presentation layer currently shows, in display order.
///
/// Only ever changed through scripts from [`reconcile::reconcile`], so the
/// ordering check always compares against what was really rendered.
#[derive(Debug, Clone)]
pub struct RenderedList<K> {
    keys: Vec<K>,
}

impl<K> Default for RenderedList<K> {
    fn default() -> Self {
        Self { keys: Vec::new() }
    }
}

impl<K> RenderedList<K>
where
    K: Clone + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&K> {
        self.keys.get(index)
    }

    /// Replays a script produced against the keys currently held.
    pub fn apply(&mut self, script: Vec<Edit<K>>) {
        reconcile::apply(&mut self.keys, script);
    }

    /// Reconciles against `target` and applies the result, returning the script
    /// so the caller can mirror it on its widgets.
    pub fn update(&mut self, target: &[K]) -> Result<Vec<Edit<K>>> {
        let script = reconcile::reconcile(&self.keys, target)?;
        self.apply(script.clone());
        Ok(script)
    }
}
