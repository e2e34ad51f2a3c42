pub mod task;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::CredentialPrompt;
use crate::config::ResolvedMailbox;
use crate::domain::format;
use crate::domain::message::{MessageKey, Uid};
use crate::error::{Error, Result};
use crate::proxy::{EndpointHandle, ProxyClient, Transport};
use crate::store::{Direction, MailboxStore};

pub use task::FetchTask;

pub type SharedStore = Arc<Mutex<MailboxStore>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine {
    pub unread: usize,
    pub total: usize,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unread: {}  Total: {}", self.unread, self.total)
    }
}

/// Configured identity of one mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxSummary {
    pub address: String,
    pub smtp_server: Option<String>,
    pub signature: Option<String>,
}

/// One line of the message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub key: MessageKey,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub unread: bool,
}

/// Everything needed to show one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    pub key: MessageKey,
    pub subject: String,
    pub date: String,
    pub from: String,
    pub to: String,
    pub cc: Option<String>,
    pub body: String,
}

fn lock(store: &Mutex<MailboxStore>) -> MutexGuard<'_, MailboxStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Asks for the server password if none is stored. False if the user declined.
fn ensure_server_password(endpoint: &EndpointHandle, prompt: &dyn CredentialPrompt) -> bool {
    if endpoint.has_server_password() {
        return true;
    }
    match prompt.server_password(&endpoint.server_url()) {
        Some(password) => {
            endpoint.set_server_password(password);
            true
        }
        None => false,
    }
}

fn fetch_locked(store: &mut MailboxStore, direction: Direction, cancel: &AtomicBool) -> Result<usize> {
    if cancel.load(Ordering::SeqCst) {
        return Err(Error::Cancelled);
    }
    let request = store.plan(direction);
    let response = store.send(&request)?;
    if cancel.load(Ordering::SeqCst) {
        log::debug!("{}: discarding response of cancelled fetch", store.address());
        return Err(Error::Cancelled);
    }
    store.apply(&request, response)
}

/// Runs one fetch, holding the mailbox lock from planning to commit.
///
/// With a prompt, a missing server password is asked for before the lock is
/// taken. Without one, a missing password ends the fetch. `Ok(None)` means no
/// password was available. Any failure other than cancellation clears the
/// server password so the next attempt prompts again.
pub(crate) fn run_fetch(
    store: &Mutex<MailboxStore>,
    prompt: Option<&dyn CredentialPrompt>,
    direction: Direction,
    cancel: &AtomicBool,
) -> Result<Option<usize>> {
    let endpoint = lock(store).pop3().clone();
    let ready = match prompt {
        Some(prompt) => ensure_server_password(&endpoint, prompt),
        None => endpoint.has_server_password(),
    };
    if !ready {
        return Ok(None);
    }

    let mut store = lock(store);
    match fetch_locked(&mut store, direction, cancel) {
        Ok(added) => Ok(Some(added)),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            log::warn!("{}: fetch failed, forgetting server password: {e}", store.address());
            endpoint.clear_server_password();
            Err(e)
        }
    }
}

/// The configured mailboxes plus the policies around fetching them.
pub struct MailSession {
    mailboxes: Vec<SharedStore>,
    prompt: Arc<dyn CredentialPrompt>,
}

impl MailSession {
    pub fn new(mailboxes: Vec<MailboxStore>, prompt: Arc<dyn CredentialPrompt>) -> Self {
        Self {
            mailboxes: mailboxes
                .into_iter()
                .map(|m| Arc::new(Mutex::new(m)))
                .collect(),
            prompt,
        }
    }

    pub fn from_config(
        mailboxes: Vec<ResolvedMailbox>,
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Self {
        let stores = mailboxes
            .into_iter()
            .map(|m| {
                let store = MailboxStore::new(m.address, ProxyClient::new(m.pop3, transport.clone()))
                    .with_signature(m.signature);
                match m.smtp {
                    Some(smtp) => store.with_smtp(smtp),
                    None => store,
                }
            })
            .collect();
        Self::new(stores, prompt)
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    pub fn mailbox(&self, index: usize) -> Result<SharedStore> {
        self.mailboxes
            .get(index)
            .cloned()
            .ok_or(Error::UnknownMailbox(index))
    }

    pub fn summaries(&self) -> Vec<MailboxSummary> {
        self.mailboxes
            .iter()
            .map(|m| {
                let store = lock(m);
                MailboxSummary {
                    address: store.address().to_string(),
                    smtp_server: store.smtp().map(EndpointHandle::server_url),
                    signature: store.signature().map(str::to_string),
                }
            })
            .collect()
    }

    /// Prompts for the server password of mailbox `index` if it is missing.
    pub fn ensure_password(&self, index: usize) -> Result<bool> {
        let store = self.mailbox(index)?;
        let endpoint = lock(&store).pop3().clone();
        Ok(ensure_server_password(&endpoint, self.prompt.as_ref()))
    }

    pub fn fetch(&self, index: usize, direction: Direction) -> Result<Option<usize>> {
        let store = self.mailbox(index)?;
        run_fetch(&store, Some(self.prompt.as_ref()), direction, &AtomicBool::new(false))
    }

    pub fn fetch_new(&self, index: usize) -> Result<Option<usize>> {
        self.fetch(index, Direction::Newer)
    }

    pub fn fetch_more_old(&self, index: usize) -> Result<Option<usize>> {
        self.fetch(index, Direction::Older)
    }

    /// Fetches new messages for every mailbox in turn, stopping at the first failure.
    /// Mailboxes whose password prompt is declined are skipped.
    pub fn fetch_new_all(&self) -> Result<usize> {
        let mut added = 0;
        for index in 0..self.mailboxes.len() {
            added += self.fetch_new(index)?.unwrap_or(0);
        }
        Ok(added)
    }

    /// Runs a fetch on a background thread. The task never prompts: call
    /// [`MailSession::ensure_password`] first, otherwise it ends with `Ok(None)`.
    pub fn spawn(&self, index: usize, direction: Direction) -> Result<FetchTask> {
        FetchTask::spawn(self.mailbox(index)?, direction)
    }

    /// Downloads the body if needed and marks the message read.
    /// `Ok(None)` means the user declined the password prompt.
    pub fn open_message(&self, index: usize, uid: &Uid) -> Result<Option<OpenedMessage>> {
        let shared = self.mailbox(index)?;
        let (has_body, endpoint) = {
            let store = lock(&shared);
            let has_body = store
                .get(uid)
                .map(|r| r.has_body())
                .ok_or_else(|| Error::UnknownMessage(uid.to_string()))?;
            (has_body, store.pop3().clone())
        };
        if !has_body && !ensure_server_password(&endpoint, self.prompt.as_ref()) {
            return Ok(None);
        }

        let mut store = lock(&shared);
        store.fetch_message_body(uid)?;
        store.mark_read(uid)?;

        let record = store
            .get(uid)
            .ok_or_else(|| Error::UnknownMessage(uid.to_string()))?;
        let header = record.header();
        Ok(Some(OpenedMessage {
            key: record.key(),
            subject: header.subject.clone().unwrap_or_default(),
            date: header
                .local_date()
                .map(|d| format::date_long(&d))
                .unwrap_or_default(),
            from: format::addresses_long(&header.from),
            to: format::addresses_long(&header.to),
            cc: (!header.cc.is_empty()).then(|| format::addresses_long(&header.cc)),
            body: record.body_text()?,
        }))
    }

    pub fn rows(&self, index: usize) -> Result<Vec<MessageRow>> {
        let store = self.mailbox(index)?;
        let store = lock(&store);
        Ok(store
            .messages()
            .map(|record| {
                let header = record.header();
                MessageRow {
                    key: record.key(),
                    subject: header.subject.clone().unwrap_or_default(),
                    from: format::addresses_short(&header.from),
                    date: header
                        .local_date()
                        .map(|d| format::date_short(&d))
                        .unwrap_or_default(),
                    unread: record.is_unread(),
                }
            })
            .collect())
    }

    pub fn keys(&self, index: usize) -> Result<Vec<MessageKey>> {
        let store = self.mailbox(index)?;
        let keys = lock(&store).keys();
        Ok(keys)
    }

    pub fn status(&self, index: usize) -> Result<StatusLine> {
        let store = self.mailbox(index)?;
        let store = lock(&store);
        Ok(StatusLine {
            unread: store.unread_count(),
            total: store.len(),
        })
    }

    /// Drops every fetched message and all server passwords.
    pub fn clear_all(&self) {
        for store in &self.mailboxes {
            lock(store).clear_all();
        }
    }
}
