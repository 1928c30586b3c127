//! # obs-websocket client
//!
//! The production [`Connector`]: speaks protocol v5 of obs-websocket over
//! `tokio-tungstenite`.
//!
//! A session owns two background tasks. The writer drains an unbounded queue of outgoing
//! frames; the reader routes request responses back to their callers by `requestId` and
//! forwards events to the session's event stream. When the socket closes the reader stops,
//! which ends the event stream and fails every request still waiting for an answer.
use crate::BoxError;
use crate::connection::{BackendEvent, Connection, Connector, Session};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const RPC_VERSION: u32 = 1;

const OP_HELLO: u8 = 0;
const OP_IDENTIFY: u8 = 1;
const OP_IDENTIFIED: u8 = 2;
const OP_EVENT: u8 = 5;
const OP_REQUEST: u8 = 6;
const OP_REQUEST_RESPONSE: u8 = 7;

/// Event subscription bits sent in `Identify`.
pub mod subscriptions {
    pub const GENERAL: u32 = 1 << 0;
    pub const CONFIG: u32 = 1 << 1;
    pub const SCENES: u32 = 1 << 2;
    pub const INPUTS: u32 = 1 << 3;
    pub const TRANSITIONS: u32 = 1 << 4;
    pub const FILTERS: u32 = 1 << 5;
    pub const OUTPUTS: u32 = 1 << 6;
    pub const SCENE_ITEMS: u32 = 1 << 7;
    pub const MEDIA_INPUTS: u32 = 1 << 8;
    pub const VENDORS: u32 = 1 << 9;
    pub const UI: u32 = 1 << 10;

    /// Every non high-volume category.
    pub const ALL: u32 = GENERAL
        | CONFIG
        | SCENES
        | INPUTS
        | TRANSITIONS
        | FILTERS
        | OUTPUTS
        | SCENE_ITEMS
        | MEDIA_INPUTS
        | VENDORS
        | UI;

    pub const INPUT_VOLUME_METERS: u32 = 1 << 16;
    pub const INPUT_ACTIVE_STATE_CHANGED: u32 = 1 << 17;
    pub const INPUT_SHOW_STATE_CHANGED: u32 = 1 << 18;
    pub const SCENE_ITEM_TRANSFORM_CHANGED: u32 = 1 << 19;
}

/// A request that obs-websocket answered with `requestStatus.result == false`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{request_type} failed with code {code}{}", .comment.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct RequestError {
    pub request_type: String,
    pub code: i64,
    pub comment: Option<String>,
}

impl RequestError {
    /// The gRPC status code matching the obs-websocket request status.
    pub fn status_code(&self) -> tonic::Code {
        match self.code {
            204 => tonic::Code::Unimplemented,
            207 => tonic::Code::Unavailable,
            300..=499 => tonic::Code::InvalidArgument,
            500..=599 => tonic::Code::FailedPrecondition,
            600 => tonic::Code::NotFound,
            601 => tonic::Code::AlreadyExists,
            602..=699 => tonic::Code::FailedPrecondition,
            700.. => tonic::Code::Internal,
            _ => tonic::Code::Unknown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("websocket transport error: '{0}'")]
    Transport(#[from] tungstenite::Error),
    #[error("obs-websocket closed the connection (code {code}): {reason}")]
    ClosedByServer { code: u16, reason: String },
    #[error("obs-websocket requires authentication but no password is configured")]
    PasswordRequired,
    #[error("unexpected obs-websocket message: {0}")]
    Protocol(String),
    #[error("malformed obs-websocket message: '{0}'")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("the obs-websocket session is closed")]
    Closed,
}

/// Creates [`ObsSession`]s for one OBS instance.
#[derive(Debug, Clone)]
pub struct ObsConnector {
    address: String,
    password: Option<String>,
    event_subscriptions: u32,
}

impl ObsConnector {
    /// `address` is either a `ws://`/`wss://` URL or a bare `host:port`.
    pub fn new(address: impl Into<String>, password: Option<String>) -> Self {
        Self {
            address: address.into(),
            password: password.filter(|p| !p.is_empty()),
            event_subscriptions: subscriptions::ALL | subscriptions::INPUT_ACTIVE_STATE_CHANGED,
        }
    }

    pub fn with_event_subscriptions(mut self, mask: u32) -> Self {
        self.event_subscriptions = mask;
        self
    }

    fn url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("ws://{}", self.address)
        }
    }
}

impl Connector for ObsConnector {
    type Session = ObsSession;

    async fn connect(&self) -> Result<Connection<ObsSession>, BoxError> {
        let session =
            ObsSession::open(&self.url(), self.password.as_deref(), self.event_subscriptions)
                .await?;

        let outgoing = session.outgoing.clone();
        let reader = session.reader.clone();
        Ok(Connection::new(session, move || {
            reader.cancel();
            // The writer may already be gone if the server closed first.
            let _ = outgoing.send(Message::Close(None));
        }))
    }
}

type Reply = Result<Value, WebSocketError>;
type Waiters = HashMap<String, oneshot::Sender<Reply>>;

/// Requests awaiting their response. `None` once the reader has stopped.
type Pending = Arc<Mutex<Option<Waiters>>>;

/// An identified obs-websocket session.
pub struct ObsSession {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_request_id: AtomicU64,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<BackendEvent>>,
    reader: CancellationToken,
}

#[derive(Deserialize)]
struct Envelope {
    op: u8,
    d: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    obs_web_socket_version: String,
    rpc_version: u32,
    authentication: Option<Challenge>,
}

#[derive(Deserialize)]
struct Challenge {
    challenge: String,
    salt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Identify {
    rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    authentication: Option<String>,
    event_subscriptions: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identified {
    negotiated_rpc_version: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Request<'a> {
    request_type: &'a str,
    request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_data: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestResponse {
    request_type: String,
    request_id: String,
    request_status: RequestStatus,
    #[serde(default)]
    response_data: Option<Value>,
}

#[derive(Deserialize)]
struct RequestStatus {
    result: bool,
    code: i64,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    event_type: String,
    #[serde(default)]
    event_intent: i64,
    #[serde(default)]
    event_data: Option<Map<String, Value>>,
}

impl ObsSession {
    async fn open(
        url: &str,
        password: Option<&str>,
        event_subscriptions: u32,
    ) -> Result<Self, WebSocketError> {
        debug!(url, "opening obs-websocket connection");
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut write, mut read) = stream.split();

        let hello: Hello = expect_message(&mut read, OP_HELLO).await?;
        debug!(
            obs_web_socket_version = %hello.obs_web_socket_version,
            rpc_version = hello.rpc_version,
            "received Hello"
        );

        let authentication = match hello.authentication {
            Some(challenge) => {
                let password = password.ok_or(WebSocketError::PasswordRequired)?;
                Some(authentication_string(
                    password,
                    &challenge.salt,
                    &challenge.challenge,
                ))
            }
            None => None,
        };

        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions,
        };
        write.send(frame(OP_IDENTIFY, &identify)?).await?;

        let identified: Identified = expect_message(&mut read, OP_IDENTIFIED).await?;
        info!(
            url,
            rpc_version = identified.negotiated_rpc_version,
            "identified with obs-websocket"
        );

        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = write.send(message).await {
                    debug!(error = %err, "obs-websocket writer stopped");
                    return;
                }
                if closing {
                    return;
                }
            }
            let _ = write.close().await;
        });

        let pending = open_pending();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = CancellationToken::new();

        tokio::spawn({
            let pending = pending.clone();
            let token = reader.clone();
            async move {
                loop {
                    let message = tokio::select! {
                        _ = token.cancelled() => break,
                        message = read.next() => message,
                    };
                    match message {
                        Some(Ok(Message::Text(text))) => dispatch(text.as_str(), &pending, &event_tx),
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "obs-websocket closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "obs-websocket connection failed");
                            break;
                        }
                        None => break,
                    }
                }
                // Dropping the senders fails the requests still in flight, and later
                // requests see the map closed.
                lock(&pending).take();
                debug!("obs-websocket reader stopped");
            }
        });

        Ok(Self {
            outgoing,
            pending,
            next_request_id: AtomicU64::new(1),
            events: tokio::sync::Mutex::new(event_rx),
            reader,
        })
    }

    async fn send_request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<Value, WebSocketError> {
        let request_id = self
            .next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();

        let message = frame(
            OP_REQUEST,
            &Request {
                request_type,
                request_id: &request_id,
                request_data,
            },
        )?;

        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(waiters) => waiters.insert(request_id.clone(), tx),
            None => return Err(WebSocketError::Closed),
        };

        trace!(request_type, request_id = %request_id, "sending request");
        if self.outgoing.send(message).is_err() {
            if let Some(waiters) = lock(&self.pending).as_mut() {
                waiters.remove(&request_id);
            }
            return Err(WebSocketError::Closed);
        }

        rx.await.map_err(|_| WebSocketError::Closed)?
    }
}

impl Session for ObsSession {
    async fn request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<Value, BoxError> {
        Ok(self.send_request(request_type, request_data).await?)
    }

    async fn next_event(&self) -> Option<BackendEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for ObsSession {
    fn drop(&mut self) {
        self.reader.cancel();
    }
}

fn open_pending() -> Pending {
    Arc::new(Mutex::new(Some(Waiters::new())))
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, Option<Waiters>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn frame<T: Serialize>(op: u8, data: &T) -> Result<Message, WebSocketError> {
    let text = serde_json::to_string(&json!({ "op": op, "d": data }))?;
    Ok(Message::text(text))
}

/// Reads frames until one with opcode `op` arrives, as needed during the handshake.
async fn expect_message<S, T>(read: &mut S, op: u8) -> Result<T, WebSocketError>
where
    S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    T: DeserializeOwned,
{
    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) => {
                let envelope: Envelope = serde_json::from_str(text.as_str())?;
                if envelope.op != op {
                    return Err(WebSocketError::Protocol(format!(
                        "expected opcode {op}, got {}",
                        envelope.op
                    )));
                }
                return Ok(serde_json::from_value(envelope.d)?);
            }
            Message::Close(Some(frame)) => {
                return Err(WebSocketError::ClosedByServer {
                    code: frame.code.into(),
                    reason: frame.reason.as_str().to_string(),
                });
            }
            Message::Close(None) => return Err(WebSocketError::Closed),
            _ => {}
        }
    }
    Err(WebSocketError::Closed)
}

fn dispatch(text: &str, pending: &Pending, events: &mpsc::UnboundedSender<BackendEvent>) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "ignoring malformed obs-websocket message");
            return;
        }
    };

    match envelope.op {
        OP_EVENT => match serde_json::from_value::<Event>(envelope.d) {
            Ok(event) => {
                trace!(event_type = %event.event_type, "received event");
                // Nobody listening is not an error.
                let _ = events.send(BackendEvent {
                    event_type: event.event_type,
                    event_intent: event.event_intent,
                    event_data: event.event_data,
                });
            }
            Err(err) => warn!(error = %err, "ignoring malformed event"),
        },
        OP_REQUEST_RESPONSE => match serde_json::from_value::<RequestResponse>(envelope.d) {
            Ok(response) => {
                let waiter = lock(pending)
                    .as_mut()
                    .and_then(|waiters| waiters.remove(&response.request_id));
                let Some(waiter) = waiter else {
                    debug!(request_id = %response.request_id, "response for an unknown request");
                    return;
                };
                let reply = if response.request_status.result {
                    Ok(response.response_data.unwrap_or(Value::Null))
                } else {
                    Err(WebSocketError::Request(RequestError {
                        request_type: response.request_type,
                        code: response.request_status.code,
                        comment: response.request_status.comment,
                    }))
                };
                // The caller may have given up on the request.
                let _ = waiter.send(reply);
            }
            Err(err) => warn!(error = %err, "ignoring malformed request response"),
        },
        op => trace!(op, "ignoring obs-websocket message"),
    }
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
fn authentication_string(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(hmac_sha256::Hash::hash(format!("{password}{salt}").as_bytes()));
    STANDARD.encode(hmac_sha256::Hash::hash(
        format!("{secret}{challenge}").as_bytes(),
    ))
}
