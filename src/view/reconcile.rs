use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{Error, Result};

/// One step of an edit script, applied in order to the displayed list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit<K> {
    /// Insert `key` so that it ends up at index `position`.
    Insert { key: K, position: usize },
    Delete { key: K },
}

/// Computes the inserts and deletes that turn `old` into `new`.
///
/// Keys present in both lists must keep their relative order; `new` may only
/// drop keys from `old` or add keys around the kept ones. A kept key that moved
/// backwards yields [`Error::OrderingViolation`]. Runs in O(|old| + |new|).
pub fn reconcile<K>(old: &[K], new: &[K]) -> Result<Vec<Edit<K>>>
where
    K: Clone + Eq + Hash + Debug,
{
    let index: HashMap<&K, usize> = new.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let mut script = Vec::new();
    // index in `new` of the next key not yet placed
    let mut next = 0;

    for key in old {
        match index.get(key) {
            Some(&position) => {
                if position < next {
                    return Err(Error::OrderingViolation {
                        key: format!("{key:?}"),
                        position,
                        previous: next - 1,
                    });
                }
                script.extend(new[next..position].iter().enumerate().map(|(i, k)| {
                    Edit::Insert {
                        key: k.clone(),
                        position: next + i,
                    }
                }));
                next = position + 1;
            }
            None => script.push(Edit::Delete { key: key.clone() }),
        }
    }

    script.extend(new[next..].iter().enumerate().map(|(i, k)| Edit::Insert {
        key: k.clone(),
        position: next + i,
    }));
    Ok(script)
}

/// Replays a script produced by [`reconcile`] onto `list`.
pub fn apply<K: PartialEq>(list: &mut Vec<K>, script: Vec<Edit<K>>) {
    for edit in script {
        match edit {
            Edit::Insert { key, position } => list.insert(position.min(list.len()), key),
            Edit::Delete { key } => {
                if let Some(i) = list.iter().position(|k| *k == key) {
                    list.remove(i);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assertables::*;
    use rstest::*;

    use super::*;

    fn check(old: &[&str], new: &[&str]) -> Vec<Edit<String>> {
        let old: Vec<String> = old.iter().map(|s| s.to_string()).collect();
        let new: Vec<String> = new.iter().map(|s| s.to_string()).collect();
        let script = assert_ok!(reconcile(&old, &new));
        let mut replayed = old.clone();
        apply(&mut replayed, script.clone());
        assert_eq!(replayed, new);
        script
    }

    #[rstest]
    fn test_identical_lists_need_no_edits() {
        assert!(check(&["7", "6", "5"], &["7", "6", "5"]).is_empty());
        assert!(check(&[], &[]).is_empty());
    }

    #[rstest]
    fn test_new_messages_are_inserted_at_the_head() {
        let script = check(&["5", "4"], &["7", "6", "5", "4"]);
        assert_eq!(
            script,
            vec![
                Edit::Insert {
                    key: "7".to_string(),
                    position: 0
                },
                Edit::Insert {
                    key: "6".to_string(),
                    position: 1
                },
            ]
        );
    }

    #[rstest]
    fn test_older_messages_are_appended_at_the_tail() {
        let script = check(&["7", "6"], &["7", "6", "5", "4"]);
        assert_eq!(script.len(), 2);
        assert!(matches!(&script[0], Edit::Insert { position: 2, .. }));
    }

    #[rstest]
    #[case(&["a", "b", "c"], &[])]
    #[case(&[], &["a", "b"])]
    #[case(&["a", "b", "c", "d"], &["x", "b", "y", "d", "z"])]
    #[case(&["a", "b"], &["c", "d"])]
    #[case(&["m1", "m2"], &["n1", "n2", "n3"])]
    fn test_script_turns_old_into_new(#[case] old: &[&str], #[case] new: &[&str]) {
        check(old, new);
    }

    #[rstest]
    fn test_deletes_are_emitted_for_vanished_keys() {
        let script = check(&["a", "b", "c"], &["a", "c"]);
        assert_eq!(
            script,
            vec![Edit::Delete {
                key: "b".to_string()
            }]
        );
    }

    #[rstest]
    fn test_reordered_keys_are_an_ordering_violation() {
        let err = assert_err!(reconcile(&["A", "B"], &["B", "A"]));
        assert!(matches!(err, Error::OrderingViolation { position: 0, .. }), "{err:?}");
    }
}
