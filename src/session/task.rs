use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::session::{SharedStore, run_fetch};
use crate::store::Direction;

/// A fetch running on its own thread.
///
/// Cancelling only takes effect before the request goes out or before the
/// response is committed. A commit that has started always finishes.
#[derive(Debug)]
pub struct FetchTask {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<Option<usize>>>,
}

impl FetchTask {
    pub(crate) fn spawn(store: SharedStore, direction: Direction) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let handle = thread::Builder::new()
            .name("fetch".into())
            .spawn(move || run_fetch(&store, None, direction, &flag))?;
        Ok(Self { cancel, handle })
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the fetch is done. A cancelled fetch yields `Error::Cancelled`.
    pub fn wait(self) -> Result<Option<usize>> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Cancels a set of tasks and waits for all of them, discarding the outcome.
pub fn cancel_all(tasks: Vec<FetchTask>) {
    for task in &tasks {
        task.cancel();
    }
    for task in tasks {
        match task.wait() {
            Ok(_) | Err(Error::Cancelled) => {}
            Err(e) => log::warn!("fetch ended with error during shutdown: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, mpsc};

    use assertables::*;
    use rstest::*;

    use super::*;
    use crate::proxy::transport::testing::ScriptedTransport;
    use crate::proxy::transport::{HttpResponse, Transport};
    use crate::proxy::ProxyClient;
    use crate::session::MailSession;
    use crate::session::tests::{FixedPrompt, batch, endpoint, session};
    use crate::store::MailboxStore;

    /// Holds each request until the test lets it through.
    struct GatedTransport {
        inner: ScriptedTransport,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Transport for GatedTransport {
        fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<HttpResponse> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.post_form(url, fields)
        }
    }

    /// Trips the cancel flag while the request is in flight.
    struct CancellingTransport {
        inner: ScriptedTransport,
        flag: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl Transport for CancellingTransport {
        fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<HttpResponse> {
            if let Some(flag) = self.flag.lock().unwrap().as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
            self.inner.post_form(url, fields)
        }
    }

    #[rstest]
    fn test_spawned_fetch_commits() {
        let transport = Arc::new(ScriptedTransport::new());
        let s = session(
            &[endpoint("pop", Some("pw"))],
            &transport,
            Arc::new(FixedPrompt::new(None)),
        );
        transport.reply_ok(batch(&[4, 3]));

        let task = assert_ok!(s.spawn(0, Direction::Newer));
        assert_eq!(assert_ok!(task.wait()), Some(2));
        assert_eq!(assert_ok!(s.status(0)).total, 2);
    }

    #[rstest]
    fn test_cancel_before_send_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        let ep = endpoint("pop", Some("pw"));
        let store = Arc::new(Mutex::new(MailboxStore::new(
            "me@example.com",
            ProxyClient::new(ep.clone(), transport.clone()),
        )));
        let cancel = AtomicBool::new(true);

        let result = run_fetch(&store, None, Direction::Newer, &cancel);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(transport.sent().is_empty());
        assert!(ep.has_server_password());
    }

    #[rstest]
    fn test_cancel_during_call_discards_response() {
        let transport = Arc::new(CancellingTransport {
            inner: ScriptedTransport::new(),
            flag: Mutex::new(None),
        });
        let cancel = Arc::new(AtomicBool::new(false));
        *transport.flag.lock().unwrap() = Some(cancel.clone());
        transport.inner.reply_ok(batch(&[1]));

        let ep = endpoint("pop", Some("pw"));
        let store = Arc::new(Mutex::new(MailboxStore::new(
            "me@example.com",
            ProxyClient::new(ep.clone(), transport.clone()),
        )));

        let result = run_fetch(&store, None, Direction::Newer, &cancel);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(transport.inner.sent().len(), 1);
        assert!(store.lock().unwrap().is_empty());
        assert!(ep.has_server_password());
    }

    #[rstest]
    fn test_spawned_fetch_never_prompts() {
        let transport = Arc::new(ScriptedTransport::new());
        let prompt = Arc::new(FixedPrompt::new(Some("typed")));
        let s = session(&[endpoint("pop", None)], &transport, prompt.clone());

        let task = assert_ok!(s.spawn(0, Direction::Newer));

        assert_eq!(assert_ok!(task.wait()), None);
        assert!(prompt.asked.lock().unwrap().is_empty());
        assert!(transport.sent().is_empty());
    }

    #[rstest]
    fn test_password_cleared_after_spawn_ends_quietly() {
        let transport = Arc::new(ScriptedTransport::new());
        let prompt = Arc::new(FixedPrompt::new(Some("typed")));
        let s = session(&[endpoint("pop", None)], &transport, prompt.clone());

        assert!(assert_ok!(s.ensure_password(0)));
        s.clear_all();
        let task = assert_ok!(s.spawn(0, Direction::Newer));

        assert_eq!(assert_ok!(task.wait()), None);
        assert_eq!(prompt.asked.lock().unwrap().len(), 1);
        assert!(transport.sent().is_empty());
    }

    #[rstest]
    fn test_cancelled_task_discards_in_flight_batch() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let transport = Arc::new(GatedTransport {
            inner: ScriptedTransport::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        transport.inner.reply_ok(batch(&[1]));
        let s = MailSession::new(
            vec![MailboxStore::new(
                "me@example.com",
                ProxyClient::new(endpoint("pop", Some("pw")), transport.clone()),
            )],
            Arc::new(FixedPrompt::new(None)),
        );

        let task = assert_ok!(s.spawn(0, Direction::Newer));
        assert_ok!(entered_rx.recv());
        task.cancel();
        assert_ok!(release_tx.send(()));

        assert!(matches!(task.wait(), Err(Error::Cancelled)));
        assert_eq!(transport.inner.sent().len(), 1);
        assert_eq!(assert_ok!(s.status(0)).total, 0);
    }

    #[rstest]
    fn test_cancel_all_joins_finished_tasks() {
        let transport = Arc::new(ScriptedTransport::new());
        let s = session(
            &[endpoint("a", Some("pa")), endpoint("b", None)],
            &transport,
            Arc::new(FixedPrompt::new(None)),
        );
        transport.reply_ok(batch(&[1]));

        let first = assert_ok!(s.spawn(0, Direction::Newer));
        while !first.is_finished() {
            thread::yield_now();
        }
        let second = assert_ok!(s.spawn(1, Direction::Newer));
        cancel_all(vec![first, second]);

        assert_eq!(assert_ok!(s.status(0)).total, 1);
        assert_eq!(assert_ok!(s.status(1)).total, 0);
    }
}
