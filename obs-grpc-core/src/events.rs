//! # Event Pump
//!
//! The backend pushes events over the same session that serves requests. The [`EventPump`]
//! is the single background task that drains them:
//!
//! 1. **Disconnected**: asks the [`ConnectionManager`] for the session. On failure it waits
//!    [`RECONNECT_BACKOFF`] and tries again.
//! 2. **Draining**: hands every event, in order, to each registered [`EventObserver`]. When
//!    the stream ends it tears the session down and goes back to step 1.
//!
//! The pump stops as soon as its [`CancellationToken`] fires, whatever state it is in.
use crate::connection::{BackendEvent, ConnectionManager, Connector, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Delay between two connection attempts of the pump.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// A consumer of backend events.
///
/// Observers are called one after the other on the pump task, so they must not block for
/// long.
#[tonic::async_trait]
pub trait EventObserver: Send + Sync {
    async fn process_event(&self, event: &BackendEvent);
}

/// The observers of a proxy, fixed once the proxy is built.
pub type ObserverSet = Arc<[Arc<dyn EventObserver>]>;

pub struct EventPump<C: Connector> {
    connections: Arc<ConnectionManager<C>>,
    observers: ObserverSet,
}

impl<C: Connector> EventPump<C> {
    pub fn new(connections: Arc<ConnectionManager<C>>, observers: ObserverSet) -> Self {
        Self {
            connections,
            observers,
        }
    }

    /// Spawns the pump on the current runtime. It runs until `token` is cancelled.
    pub fn start(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    /// Runs the pump on the calling task until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(observers = self.observers.len(), "event pump started");

        loop {
            let connection = tokio::select! {
                _ = token.cancelled() => break,
                connection = self.connections.get_connection() => connection,
            };

            let session = match connection {
                Ok(session) => session,
                Err(err) => {
                    warn!(
                        error = %err,
                        "event pump cannot reach the backend, retrying in {:?}",
                        RECONNECT_BACKOFF
                    );
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => continue,
                    }
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.drain(&session) => {}
            }

            debug!("backend event stream closed");
            self.connections.teardown_if_current(&session).await;
        }

        info!("event pump stopped");
    }

    async fn drain(&self, session: &C::Session) {
        while let Some(event) = session.next_event().await {
            trace!(event_type = %event.event_type, "dispatching backend event");
            for observer in self.observers.iter() {
                observer.process_event(&event).await;
            }
        }
    }
}
