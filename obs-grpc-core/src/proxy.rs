//! # Proxy
//!
//! [`Proxy`] is the `obs_grpc.Obs` service. Each RPC handler converts its request fields with
//! the codecs, runs the matching backend request through the [`CallExecutor`] and converts the
//! answer back.
//!
//! The proxy is created together with its [`EventPump`] by [`ProxyBuilder::build`]; the
//! caller decides when the pump starts and when it stops.
//!
//! ```rust,no_run
//! use obs_grpc_core::proxy::Proxy;
//! use obs_grpc_core::websocket::ObsConnector;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (proxy, pump) = Proxy::builder(ObsConnector::new("localhost:4455", None)).build();
//!
//! let token = CancellationToken::new();
//! let pump = pump.start(token.clone());
//!
//! tonic::transport::Server::builder()
//!     .add_service(proxy.clone().into_service())
//!     .serve("127.0.0.1:4456".parse()?)
//!     .await?;
//!
//! token.cancel();
//! pump.await?;
//! proxy.shutdown().await;
//! # Ok(())
//! # }
//! ```
mod params;
mod service;

use crate::call::{CallError, CallExecutor, ErrorRecoveryPolicy};
use crate::connection::{BackendEvent, ConnectionManager, Connector, Session};
use crate::events::{EventObserver, EventPump};
use crate::pb::{self, obs_server::ObsServer};
use crate::row::{self, Row};
use crate::value::{self, ConversionError, InvariantViolation};
use crate::websocket::WebSocketError;
use futures_util::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tonic::Status;
use tracing::warn;

/// Default number of events buffered for slow `SubscribeEvents` clients.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// The stream returned by `SubscribeEvents`.
pub type SubscribeEventsStream = Pin<Box<dyn Stream<Item = Result<pb::Event, Status>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("{operation}: unable to encode the request parameters: '{source}'")]
    EncodeParams {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{operation}: unable to decode the backend response: '{source}'")]
    DecodeResponse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request field '{field}': {source}")]
    Request {
        field: &'static str,
        #[source]
        source: ConversionError,
    },
    #[error("response field '{field}' cannot be represented: {source}")]
    Response {
        field: &'static str,
        #[source]
        source: InvariantViolation,
    },
}

impl From<HandlerError> for Status {
    fn from(err: HandlerError) -> Self {
        let code = match &err {
            HandlerError::Call(CallError::Connection { .. }) => tonic::Code::Unavailable,
            HandlerError::Call(CallError::Backend { source, .. }) => {
                match source.downcast_ref::<WebSocketError>() {
                    Some(WebSocketError::Request(request)) => request.status_code(),
                    Some(WebSocketError::Closed) => tonic::Code::Unavailable,
                    _ => tonic::Code::Unknown,
                }
            }
            HandlerError::Request { .. } => tonic::Code::InvalidArgument,
            HandlerError::EncodeParams { .. }
            | HandlerError::DecodeResponse { .. }
            | HandlerError::Response { .. } => tonic::Code::Internal,
        };
        Status::new(code, err.to_string())
    }
}

/// Re-publishes backend events to `SubscribeEvents` clients.
///
/// Always the first observer of a proxy.
pub struct EventBroadcaster {
    sender: broadcast::Sender<pb::Event>,
}

impl EventBroadcaster {
    pub fn new(sender: broadcast::Sender<pb::Event>) -> Self {
        Self { sender }
    }
}

#[tonic::async_trait]
impl EventObserver for EventBroadcaster {
    async fn process_event(&self, event: &BackendEvent) {
        let event_data = event.event_data.clone().map(|data| {
            let (row, omitted) = row::from_json_map_partial(data);
            for (field, err) in omitted {
                warn!(
                    event_type = %event.event_type,
                    field = %field,
                    error = %err,
                    "omitting unrepresentable event field"
                );
            }
            row
        });

        // No subscriber is fine.
        let _ = self.sender.send(pb::Event {
            event_type: event.event_type.clone(),
            event_intent: event.event_intent,
            event_data,
        });
    }
}

struct Inner<C: Connector> {
    connections: Arc<ConnectionManager<C>>,
    executor: CallExecutor<C>,
    events: broadcast::Sender<pb::Event>,
}

pub struct Proxy<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for Proxy<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct ProxyBuilder<C: Connector> {
    connector: C,
    observers: Vec<Arc<dyn EventObserver>>,
    recovery: Option<Arc<dyn ErrorRecoveryPolicy>>,
    event_capacity: usize,
}

impl<C: Connector> ProxyBuilder<C> {
    /// Registers an observer. Observers see events in registration order, after the
    /// broadcaster feeding `SubscribeEvents`.
    pub fn observer(mut self, observer: impl EventObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn error_recovery(mut self, policy: impl ErrorRecoveryPolicy + 'static) -> Self {
        self.recovery = Some(Arc::new(policy));
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> (Proxy<C>, EventPump<C>) {
        let connections = Arc::new(ConnectionManager::new(self.connector));
        let (events, _) = broadcast::channel(self.event_capacity);

        let mut observers: Vec<Arc<dyn EventObserver>> = Vec::with_capacity(self.observers.len() + 1);
        observers.push(Arc::new(EventBroadcaster::new(events.clone())));
        observers.extend(self.observers);

        let pump = EventPump::new(connections.clone(), observers.into());
        let proxy = Proxy {
            inner: Arc::new(Inner {
                executor: CallExecutor::new(connections.clone(), self.recovery),
                connections,
                events,
            }),
        };

        (proxy, pump)
    }
}

impl<C: Connector> Proxy<C> {
    pub fn builder(connector: C) -> ProxyBuilder<C> {
        ProxyBuilder {
            connector,
            observers: Vec::new(),
            recovery: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// A receiver of every backend event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<pb::Event> {
        self.inner.events.subscribe()
    }

    /// Releases the backend session. Meant to run after the pump has stopped.
    pub async fn shutdown(&self) {
        self.inner.connections.shutdown().await;
    }

    pub fn into_service(self) -> ObsServer<Self> {
        ObsServer::new(self)
    }

    /// Runs backend request `operation` and returns its raw response data.
    async fn call(
        &self,
        operation: &'static str,
        data: Option<Value>,
    ) -> Result<Value, HandlerError> {
        let response = self
            .inner
            .executor
            .execute(operation, |session| {
                let data = data.clone();
                async move { session.request(operation, data).await }
            })
            .await?;
        Ok(response)
    }

    /// Runs a backend request with parameters and decodes its response.
    async fn request<P, R>(&self, operation: &'static str, params: &P) -> Result<R, HandlerError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let data = serde_json::to_value(params)
            .map_err(|source| HandlerError::EncodeParams { operation, source })?;
        let response = self.call(operation, Some(data)).await?;
        decode_response(operation, response)
    }

    /// Runs a backend request without parameters and decodes its response.
    async fn query<R: DeserializeOwned>(&self, operation: &'static str) -> Result<R, HandlerError> {
        let response = self.call(operation, None).await?;
        decode_response(operation, response)
    }
}

fn decode_response<R: DeserializeOwned>(
    operation: &'static str,
    response: Value,
) -> Result<R, HandlerError> {
    serde_json::from_value(response)
        .map_err(|source| HandlerError::DecodeResponse { operation, source })
}

// Field conversions shared by the handlers.

fn request_text(field: &'static str, bytes: Vec<u8>) -> Result<String, HandlerError> {
    String::from_utf8(bytes).map_err(|err| HandlerError::Request {
        field,
        source: err.into(),
    })
}

fn request_object(field: &'static str, row: Option<Row>) -> Result<Map<String, Value>, HandlerError> {
    row::from_optional_row(row.as_ref()).map_err(|source| HandlerError::Request { field, source })
}

fn request_value(field: &'static str, value: Option<pb::Any>) -> Result<Value, HandlerError> {
    value::decode_optional(value).map_err(|source| HandlerError::Request { field, source })
}

fn response_object(field: &'static str, object: Map<String, Value>) -> Result<Row, HandlerError> {
    row::to_row(&object).map_err(|source| HandlerError::Response { field, source })
}

fn response_objects(
    field: &'static str,
    objects: Vec<Map<String, Value>>,
) -> Result<Vec<Row>, HandlerError> {
    row::to_rows(&objects).map_err(|source| HandlerError::Response { field, source })
}

fn response_value(field: &'static str, value: Value) -> Result<Option<pb::Any>, HandlerError> {
    if value.is_null() {
        return Ok(None);
    }
    value::encode(value)
        .map(Some)
        .map_err(|source| HandlerError::Response { field, source })
}

fn bytes_list(items: Vec<String>) -> Vec<Vec<u8>> {
    items.into_iter().map(String::into_bytes).collect()
}
