//! # Connection Manager
//!
//! The proxy talks to the backend through exactly one session. [`ConnectionManager`] creates
//! that session lazily through an injected [`Connector`], hands out shared handles to it and
//! tears it down when the event pump notices that it died.
//!
//! ## Lifecycle
//!
//! ```text
//! absent --get_connection--> live --stream closed / shutdown--> absent --> ...
//! ```
//!
//! The slot holding the session is guarded by an async mutex that stays locked while the
//! connector runs, so concurrent callers never create two sessions.
use crate::BoxError;
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// An event pushed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEvent {
    pub event_type: String,
    pub event_intent: i64,
    pub event_data: Option<Map<String, Value>>,
}

/// A live session with the backend.
pub trait Session: Send + Sync + 'static {
    /// Sends one request and waits for its response data (`Value::Null` when there is none).
    fn request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> impl Future<Output = Result<Value, BoxError>> + Send;

    /// Waits for the next pushed event. `None` means the event stream is closed for good.
    fn next_event(&self) -> impl Future<Output = Option<BackendEvent>> + Send;
}

/// Creates sessions with the backend.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    fn connect(&self) -> impl Future<Output = Result<Connection<Self::Session>, BoxError>> + Send;
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A session together with the function that releases it.
///
/// The release function runs exactly once, when the connection is dropped.
pub struct Connection<S> {
    session: Arc<S>,
    release: Option<Release>,
}

impl<S> Connection<S> {
    pub fn new(session: S, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            session: Arc::new(session),
            release: Some(Box::new(release)),
        }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<S> Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("released", &self.release.is_none())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unable to connect to the backend: '{0}'")]
    Connect(#[source] BoxError),
}

/// Owner of the single backend session.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    current: Mutex<Option<Connection<C::Session>>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
        }
    }

    /// Returns the live session, connecting first if there is none.
    ///
    /// A failed attempt leaves the manager without a session; the next call tries again.
    pub async fn get_connection(&self) -> Result<Arc<C::Session>, ConnectionError> {
        let mut current = self.current.lock().await;

        if let Some(connection) = current.as_ref() {
            return Ok(connection.session.clone());
        }

        debug!("connecting to the backend");
        let connection = self.connector.connect().await.map_err(|err| {
            warn!(error = %err, "unable to connect to the backend");
            ConnectionError::Connect(err)
        })?;
        info!("connected to the backend");

        let session = connection.session.clone();
        *current = Some(connection);
        Ok(session)
    }

    /// Whether a session is currently held.
    pub async fn is_connected(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Releases `session` if it is still the current one.
    ///
    /// Returns `true` when a session was released.
    pub(crate) async fn teardown_if_current(&self, session: &Arc<C::Session>) -> bool {
        let mut current = self.current.lock().await;

        let is_current = current
            .as_ref()
            .is_some_and(|connection| Arc::ptr_eq(&connection.session, session));

        if is_current {
            info!("tearing down the backend connection");
            // Dropping the connection runs its release function.
            current.take();
        }

        is_current
    }

    /// Releases the current session, if any. Used on process shutdown.
    pub async fn shutdown(&self) {
        if self.current.lock().await.take().is_some() {
            info!("backend connection released on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connection_is_reused() {
        let connector = FakeConnector::new();
        let manager = ConnectionManager::new(connector.clone());

        assert!(!manager.is_connected().await);

        let first = manager.get_connection().await.unwrap();
        let second = manager.get_connection().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects(), 1);
        assert!(manager.is_connected().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_connection() {
        let connector = FakeConnector::new().with_connect_delay(Duration::from_millis(50));
        let manager = Arc::new(ConnectionManager::new(connector.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_connection().await.unwrap() })
            })
            .collect();

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(connector.connects(), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_state_absent() {
        let connector = FakeConnector::new().failing(1);
        let manager = ConnectionManager::new(connector.clone());

        let err = manager.get_connection().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Connect(_)));
        assert!(err.to_string().contains("backend unavailable"));
        assert!(!manager.is_connected().await);

        let session = manager.get_connection().await.unwrap();
        assert_eq!(session.id, 1);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_teardown_releases_and_reconnects() {
        let connector = FakeConnector::new();
        let manager = ConnectionManager::new(connector.clone());

        let first = manager.get_connection().await.unwrap();
        assert!(manager.teardown_if_current(&first).await);
        assert_eq!(connector.releases(), 1);
        assert!(!manager.is_connected().await);

        let second = manager.get_connection().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_teardown_ignores_stale_sessions() {
        let connector = FakeConnector::new();
        let manager = ConnectionManager::new(connector.clone());

        let stale = manager.get_connection().await.unwrap();
        manager.teardown_if_current(&stale).await;
        let live = manager.get_connection().await.unwrap();

        assert!(!manager.teardown_if_current(&stale).await);
        assert_eq!(connector.releases(), 1);

        let again = manager.get_connection().await.unwrap();
        assert!(Arc::ptr_eq(&live, &again));
    }

    #[tokio::test]
    async fn test_shutdown_releases_once() {
        let connector = FakeConnector::new();
        let manager = ConnectionManager::new(connector.clone());

        manager.get_connection().await.unwrap();
        manager.shutdown().await;
        manager.shutdown().await;

        assert_eq!(connector.releases(), 1);
        assert!(!manager.is_connected().await);
    }
}
