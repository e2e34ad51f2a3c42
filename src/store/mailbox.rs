use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::message::{MailboxId, MessageKey, MessageRecord, Uid};
use crate::error::{Error, Result};
use crate::mail::decoders::decode_base64;
use crate::proxy::client::{FETCH_MESSAGE_BODY, FETCH_NEW_MESSAGES, FETCH_OLD_MESSAGES};
use crate::proxy::{EndpointHandle, ProxyClient};

/// Messages requested per fetch, in either direction.
pub const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Newer,
    Older,
}

/// A fetch computed from the current sequence, ready to be sent.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    direction: Direction,
    method: &'static str,
    data: Value,
    mark_unread: bool,
}

#[derive(Debug, Deserialize)]
struct HeaderItem {
    uid: Uid,
    header: String,
}

/// Newest-first sequence of one mailbox's messages, keyed by UID.
///
/// Records live in an arena map; `order` only holds keys, so callers can keep
/// keys around without holding references into the store.
#[derive(Debug)]
pub struct MailboxStore {
    address: MailboxId,
    pop3: ProxyClient,
    smtp: Option<EndpointHandle>,
    signature: Option<String>,
    order: VecDeque<Uid>,
    records: HashMap<Uid, MessageRecord>,
}

impl MailboxStore {
    pub fn new(address: impl Into<MailboxId>, pop3: ProxyClient) -> Self {
        Self {
            address: address.into(),
            pop3,
            smtp: None,
            signature: None,
            order: VecDeque::new(),
            records: HashMap::new(),
        }
    }

    pub fn with_smtp(mut self, smtp: EndpointHandle) -> Self {
        self.smtp = Some(smtp);
        self
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn pop3(&self) -> &EndpointHandle {
        self.pop3.endpoint()
    }

    pub fn smtp(&self) -> Option<&EndpointHandle> {
        self.smtp.as_ref()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.records.values().filter(|r| r.is_unread()).count()
    }

    pub fn uids(&self) -> impl Iterator<Item = &Uid> {
        self.order.iter()
    }

    pub fn keys(&self) -> Vec<MessageKey> {
        self.order
            .iter()
            .map(|uid| MessageKey {
                mailbox: self.address.clone(),
                uid: uid.clone(),
            })
            .collect()
    }

    /// Records in display order, newest first.
    pub fn messages(&self) -> impl Iterator<Item = &MessageRecord> {
        self.order.iter().filter_map(|uid| self.records.get(uid))
    }

    pub fn get(&self, uid: &Uid) -> Option<&MessageRecord> {
        self.records.get(uid)
    }

    /// Returns true if the message was unread before the call.
    pub fn mark_read(&mut self, uid: &Uid) -> Result<bool> {
        self.records
            .get_mut(uid)
            .map(MessageRecord::mark_read)
            .ok_or_else(|| Error::UnknownMessage(uid.to_string()))
    }

    pub fn plan(&self, direction: Direction) -> FetchRequest {
        match (direction, self.order.back()) {
            (Direction::Older, Some(oldest)) => FetchRequest {
                direction,
                method: FETCH_OLD_MESSAGES,
                data: json!({"batchSize": BATCH_SIZE, "olderThanUid": oldest}),
                mark_unread: false,
            },
            // nothing older to anchor on yet
            _ => FetchRequest {
                direction: Direction::Newer,
                method: FETCH_NEW_MESSAGES,
                data: json!({"batchSize": BATCH_SIZE, "newerThanUid": self.order.front()}),
                // the first fetch only shows what was already there
                mark_unread: !self.order.is_empty(),
            },
        }
    }

    /// Network half of a fetch; does not touch the sequence.
    pub fn send(&self, request: &FetchRequest) -> Result<Value> {
        log::debug!(
            "{}: {} with {}",
            self.address,
            request.method,
            request.data
        );
        self.pop3.call(request.method, request.data.clone())
    }

    /// Parses the whole batch, then splices it in. Any error leaves the store untouched.
    pub fn apply(&mut self, request: &FetchRequest, response: Value) -> Result<usize> {
        let records = self.parse_batch(request, response)?;
        let added = records.len();

        match request.direction {
            Direction::Newer => {
                for record in records.into_iter().rev() {
                    self.order.push_front(record.uid().clone());
                    self.records.insert(record.uid().clone(), record);
                }
            }
            Direction::Older => {
                for record in records {
                    self.order.push_back(record.uid().clone());
                    self.records.insert(record.uid().clone(), record);
                }
            }
        }

        log::info!(
            "{}: {} {} message(s), {} total",
            self.address,
            added,
            match request.direction {
                Direction::Newer => "new",
                Direction::Older => "older",
            },
            self.order.len()
        );
        Ok(added)
    }

    fn parse_batch(&self, request: &FetchRequest, response: Value) -> Result<Vec<MessageRecord>> {
        let items: Vec<HeaderItem> = serde_json::from_value(response)
            .map_err(|e| Error::Protocol(format!("unexpected {} result: {e}", request.method)))?;

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            if self.records.contains_key(&item.uid) || !seen.insert(item.uid.clone()) {
                log::warn!("{}: dropping duplicate UID {}", self.address, item.uid);
                continue;
            }
            let raw = decode_base64(&item.header)?;
            records.push(MessageRecord::parse_header(
                self.address.clone(),
                item.uid,
                &raw,
                request.mark_unread,
            )?);
        }
        Ok(records)
    }

    fn fetch(&mut self, direction: Direction) -> Result<usize> {
        let request = self.plan(direction);
        let response = self.send(&request)?;
        self.apply(&request, response)
    }

    /// Prepends messages newer than the current newest one.
    pub fn fetch_new_messages(&mut self) -> Result<usize> {
        self.fetch(Direction::Newer)
    }

    /// Appends messages older than the current oldest one.
    pub fn fetch_more_old_messages(&mut self) -> Result<usize> {
        self.fetch(Direction::Older)
    }

    /// Downloads the full message once. Later calls are no-ops.
    pub fn fetch_message_body(&mut self, uid: &Uid) -> Result<()> {
        match self.records.get(uid) {
            None => return Err(Error::UnknownMessage(uid.to_string())),
            Some(record) if record.has_body() => return Ok(()),
            Some(_) => {}
        }

        let response = self.pop3.call(FETCH_MESSAGE_BODY, json!({"uid": uid}))?;
        let encoded: String = serde_json::from_value(response)
            .map_err(|e| Error::Protocol(format!("unexpected {FETCH_MESSAGE_BODY} result: {e}")))?;
        let raw = decode_base64(&encoded)?;

        let record = self
            .records
            .get_mut(uid)
            .ok_or_else(|| Error::UnknownMessage(uid.to_string()))?;
        record.parse_body(raw)
    }

    /// Drops every message and forgets the server passwords.
    pub fn clear_all(&mut self) {
        self.order.clear();
        self.records.clear();
        self.pop3.endpoint().clear_server_password();
        if let Some(smtp) = &self.smtp {
            smtp.clear_server_password();
        }
    }
}

#[cfg(test)]
mod tests {
    use assertables::*;
    use base64::{Engine as _, engine::general_purpose};
    use rstest::*;
    use std::sync::Arc;

    use super::*;
    use crate::proxy::ProxyEndpoint;
    use crate::proxy::transport::HttpResponse;
    use crate::proxy::transport::testing::ScriptedTransport;

    fn item(uid: u64) -> Value {
        let header = format!("Subject: message {uid}\r\nFrom: sender{uid}@example.com\r\n\r\n");
        json!({"uid": uid, "header": general_purpose::STANDARD.encode(header)})
    }

    fn batch(uids: &[u64]) -> Value {
        Value::Array(uids.iter().copied().map(item).collect())
    }

    fn uids(store: &MailboxStore) -> Vec<Uid> {
        store.uids().cloned().collect()
    }

    fn numbers(values: &[u64]) -> Vec<Uid> {
        values.iter().copied().map(Uid::Number).collect()
    }

    #[fixture]
    fn endpoint() -> EndpointHandle {
        EndpointHandle::new(ProxyEndpoint {
            proxy_url: "https://proxy.example.com".into(),
            proxy_username: None,
            proxy_password: None,
            server_url: "pop.example.com".into(),
            server_username: "me".into(),
            server_password: Some("secret".into()),
        })
    }

    #[fixture]
    fn transport() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new())
    }

    fn store(endpoint: &EndpointHandle, transport: &Arc<ScriptedTransport>) -> MailboxStore {
        MailboxStore::new("me@example.com", ProxyClient::new(endpoint.clone(), transport.clone()))
    }

    #[rstest]
    fn test_first_fetch_is_not_unread_and_later_fetches_are(
        endpoint: EndpointHandle,
        transport: Arc<ScriptedTransport>,
    ) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[5, 4]));
        transport.reply_ok(batch(&[7, 6]));

        assert_eq!(assert_ok!(store.fetch_new_messages()), 2);
        assert_eq!(uids(&store), numbers(&[5, 4]));
        assert_eq!(store.unread_count(), 0);

        assert_eq!(assert_ok!(store.fetch_new_messages()), 2);
        assert_eq!(uids(&store), numbers(&[7, 6, 5, 4]));
        assert!(store.get(&Uid::Number(7)).unwrap().is_unread());
        assert!(store.get(&Uid::Number(6)).unwrap().is_unread());
        assert!(!store.get(&Uid::Number(5)).unwrap().is_unread());
        assert_eq!(store.unread_count(), 2);

        let sent = transport.sent();
        assert_eq!(sent[0]["method"], FETCH_NEW_MESSAGES);
        assert_eq!(sent[0]["data"], json!({"batchSize": 50, "newerThanUid": null}));
        assert_eq!(sent[1]["data"], json!({"batchSize": 50, "newerThanUid": 5}));
    }

    #[rstest]
    fn test_older_messages_are_appended(endpoint: EndpointHandle, transport: Arc<ScriptedTransport>) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[7, 6, 5, 4]));
        transport.reply_ok(batch(&[3, 2]));

        assert_ok!(store.fetch_new_messages());
        assert_eq!(assert_ok!(store.fetch_more_old_messages()), 2);

        assert_eq!(uids(&store), numbers(&[7, 6, 5, 4, 3, 2]));
        assert_eq!(store.unread_count(), 0);
        let sent = transport.sent();
        assert_eq!(sent[1]["method"], FETCH_OLD_MESSAGES);
        assert_eq!(sent[1]["data"], json!({"batchSize": 50, "olderThanUid": 4}));
    }

    #[rstest]
    fn test_older_on_empty_store_fetches_newest(
        endpoint: EndpointHandle,
        transport: Arc<ScriptedTransport>,
    ) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[2, 1]));

        assert_ok!(store.fetch_more_old_messages());

        assert_eq!(uids(&store), numbers(&[2, 1]));
        assert_eq!(transport.sent()[0]["method"], FETCH_NEW_MESSAGES);
    }

    #[rstest]
    fn test_duplicate_uids_are_dropped(endpoint: EndpointHandle, transport: Arc<ScriptedTransport>) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[5, 4]));
        transport.reply_ok(batch(&[6, 6, 5]));

        assert_ok!(store.fetch_new_messages());
        assert_eq!(assert_ok!(store.fetch_new_messages()), 1);

        assert_eq!(uids(&store), numbers(&[6, 5, 4]));
    }

    #[rstest]
    fn test_http_failure_leaves_store_untouched(
        endpoint: EndpointHandle,
        transport: Arc<ScriptedTransport>,
    ) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[5, 4]));
        transport.reply(Ok(HttpResponse {
            status: 500,
            body: "internal error".into(),
        }));

        assert_ok!(store.fetch_new_messages());
        let err = assert_err!(store.fetch_new_messages());

        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(uids(&store), numbers(&[5, 4]));
    }

    #[rstest]
    fn test_bad_item_in_batch_commits_nothing(
        endpoint: EndpointHandle,
        transport: Arc<ScriptedTransport>,
    ) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(json!([item(9), {"uid": 8, "header": "%%% not base64"}]));

        let err = assert_err!(store.fetch_new_messages());

        assert!(matches!(err, Error::Parse(_)));
        assert!(store.is_empty());
    }

    #[rstest]
    fn test_body_is_fetched_once(endpoint: EndpointHandle, transport: Arc<ScriptedTransport>) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[1]));
        let message = "Content-Type: text/plain\r\n\r\nhello\r\n";
        transport.reply_ok(json!(general_purpose::STANDARD.encode(message)));

        assert_ok!(store.fetch_new_messages());
        assert_ok!(store.fetch_message_body(&Uid::Number(1)));
        assert_ok!(store.fetch_message_body(&Uid::Number(1)));

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["data"], json!({"uid": 1}));
        let record = store.get(&Uid::Number(1)).unwrap();
        assert_eq!(assert_ok!(record.body_text()).trim_end(), "hello");
        assert_eq!(uids(&store), numbers(&[1]));
    }

    #[rstest]
    fn test_failed_body_fetch_can_be_retried(
        endpoint: EndpointHandle,
        transport: Arc<ScriptedTransport>,
    ) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[1]));
        transport.reply(Err(Error::Transport("timeout".into())));
        transport.reply_ok(json!(general_purpose::STANDARD.encode("Subject: x\r\n\r\nbody\r\n")));

        assert_ok!(store.fetch_new_messages());
        assert_err!(store.fetch_message_body(&Uid::Number(1)));
        assert!(!store.get(&Uid::Number(1)).unwrap().has_body());
        assert_ok!(store.fetch_message_body(&Uid::Number(1)));
        assert!(store.get(&Uid::Number(1)).unwrap().has_body());
    }

    #[rstest]
    fn test_unknown_uid_body_fetch_is_rejected(
        endpoint: EndpointHandle,
        transport: Arc<ScriptedTransport>,
    ) {
        let mut store = store(&endpoint, &transport);
        let err = assert_err!(store.fetch_message_body(&Uid::Number(42)));
        assert!(matches!(err, Error::UnknownMessage(_)));
        assert!(transport.sent().is_empty());
    }

    #[rstest]
    fn test_clear_all_drops_messages_and_passwords(
        endpoint: EndpointHandle,
        transport: Arc<ScriptedTransport>,
    ) {
        let smtp = EndpointHandle::new(ProxyEndpoint {
            server_url: "smtp.example.com".into(),
            ..endpoint.snapshot()
        });
        let mut store = store(&endpoint, &transport).with_smtp(smtp.clone());
        transport.reply_ok(batch(&[5, 4]));
        transport.reply_ok(batch(&[6]));
        assert_ok!(store.fetch_new_messages());
        assert_ok!(store.fetch_new_messages());
        assert_eq!(store.unread_count(), 1);

        store.clear_all();

        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
        assert!(!endpoint.has_server_password());
        assert!(!smtp.has_server_password());
    }

    #[rstest]
    fn test_keys_follow_sequence_order(endpoint: EndpointHandle, transport: Arc<ScriptedTransport>) {
        let mut store = store(&endpoint, &transport);
        transport.reply_ok(batch(&[2, 1]));
        assert_ok!(store.fetch_new_messages());

        let keys = store.keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].mailbox, "me@example.com");
        assert_eq!(keys[0].uid, Uid::Number(2));
        assert_eq!(
            store.messages().map(|m| m.header().subject.clone()).collect::<Vec<_>>(),
            vec![Some("message 2".to_string()), Some("message 1".to_string())]
        );
    }
}
