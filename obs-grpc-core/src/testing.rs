//! In-memory backend used by the unit tests.
use crate::BoxError;
use crate::connection::{BackendEvent, Connection, Connector, Session};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type Responder = Arc<dyn Fn(&str, Option<Value>) -> Result<Value, BoxError> + Send + Sync>;

pub(crate) struct FakeSession {
    pub id: usize,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<BackendEvent>>,
    responder: Responder,
}

impl std::fmt::Debug for FakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSession").field("id", &self.id).finish()
    }
}

impl Session for FakeSession {
    async fn request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<Value, BoxError> {
        (self.responder)(request_type, request_data)
    }

    async fn next_event(&self) -> Option<BackendEvent> {
        self.events.lock().await.recv().await
    }
}

/// A connector whose sessions are driven by the test.
///
/// Sessions are numbered by connect attempt, failed attempts included.
#[derive(Clone)]
pub(crate) struct FakeConnector {
    connects: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    delay: Option<Duration>,
    senders: Arc<Mutex<HashMap<usize, mpsc::UnboundedSender<BackendEvent>>>>,
    responder: Responder,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            connects: Arc::default(),
            releases: Arc::default(),
            failures_left: Arc::default(),
            delay: None,
            senders: Arc::default(),
            responder: Arc::new(|_, _| Ok(Value::Null)),
        }
    }

    /// The next `count` connect attempts fail.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&str, Option<Value>) -> Result<Value, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn push_event(&self, session: usize, event_type: &str) {
        let senders = self.senders.lock().unwrap();
        senders[&session]
            .send(BackendEvent {
                event_type: event_type.to_string(),
                event_intent: 1,
                event_data: None,
            })
            .unwrap();
    }

    /// Ends the event stream of `session`.
    pub fn close_events(&self, session: usize) {
        self.senders.lock().unwrap().remove(&session);
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self) -> Result<Connection<FakeSession>, BoxError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err("backend unavailable".into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(attempt, tx);

        let session = FakeSession {
            id: attempt,
            events: tokio::sync::Mutex::new(rx),
            responder: self.responder.clone(),
        };

        let releases = self.releases.clone();
        Ok(Connection::new(session, move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Polls `condition` until it holds, failing the test after a generous timeout.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let polling = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), polling)
        .await
        .expect("condition was not reached in time");
}
