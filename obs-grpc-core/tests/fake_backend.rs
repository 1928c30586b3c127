use obs_grpc_core::BoxError;
use obs_grpc_core::connection::{BackendEvent, Connection, Connector, Session};
use obs_grpc_core::websocket::{RequestError, WebSocketError};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Clone)]
enum Canned {
    Reply(Value),
    Fail { code: i64, comment: String },
}

impl Canned {
    fn answer(&self, request_type: &str) -> Result<Value, BoxError> {
        match self {
            Canned::Reply(value) => Ok(value.clone()),
            Canned::Fail { code, comment } => Err(Box::new(WebSocketError::Request(RequestError {
                request_type: request_type.to_string(),
                code: *code,
                comment: Some(comment.clone()),
            }))),
        }
    }
}

/// A scripted OBS: every request type answers with a queue of canned replies, the last one
/// being repeated once the queue is drained. Unscripted requests answer with `{}`.
#[derive(Clone, Default)]
pub struct FakeObs {
    replies: Arc<Mutex<HashMap<String, VecDeque<Canned>>>>,
    requests: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<BackendEvent>>>>,
    connects: Arc<AtomicUsize>,
    unreachable: bool,
}

impl FakeObs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn reply(&self, request_type: &str, response: Value) -> &Self {
        self.push(request_type, Canned::Reply(response))
    }

    pub fn fail(&self, request_type: &str, code: i64, comment: &str) -> &Self {
        let comment = comment.to_string();
        self.push(request_type, Canned::Fail { code, comment })
    }

    fn push(&self, request_type: &str, reply: Canned) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(request_type.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request received so far, with its request data.
    pub fn requests(&self) -> Vec<(String, Option<Value>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event_type: &str, event_data: Value) {
        let event = BackendEvent {
            event_type: event_type.to_string(),
            event_intent: 1,
            event_data: event_data.as_object().cloned(),
        };
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            events.send(event).unwrap();
        }
    }
}

pub struct FakeSession {
    obs: FakeObs,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<BackendEvent>>,
}

impl Session for FakeSession {
    async fn request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<Value, BoxError> {
        self.obs
            .requests
            .lock()
            .unwrap()
            .push((request_type.to_string(), request_data));

        let mut replies = self.obs.replies.lock().unwrap();
        let canned = match replies.get_mut(request_type) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        match canned {
            Some(canned) => canned.answer(request_type),
            None => Ok(Value::Object(Map::new())),
        }
    }

    async fn next_event(&self) -> Option<BackendEvent> {
        self.events.lock().await.recv().await
    }
}

impl Connector for FakeObs {
    type Session = FakeSession;

    async fn connect(&self) -> Result<Connection<FakeSession>, BoxError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err("connection refused".into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);

        let session = FakeSession {
            obs: self.clone(),
            events: tokio::sync::Mutex::new(rx),
        };
        Ok(Connection::new(session, || {}))
    }
}
