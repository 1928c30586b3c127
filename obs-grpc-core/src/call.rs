//! # Call Executor
//!
//! Runs a single backend operation on behalf of an RPC handler.
//!
//! The executor obtains the shared session from the [`ConnectionManager`] and invokes the
//! operation. When the operation fails and an [`ErrorRecoveryPolicy`] is configured, the
//! policy decides: `Ok(())` means "try again", `Err(e)` ends the call with `e`. Retries are
//! unbounded and immediate; a policy that wants a delay or a limit sleeps or counts itself.
use crate::BoxError;
use crate::connection::{ConnectionError, ConnectionManager, Connector};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decides whether a failed backend operation is retried.
#[tonic::async_trait]
pub trait ErrorRecoveryPolicy: Send + Sync {
    /// Returns `Ok(())` to retry `operation`, or the error to report to the caller.
    async fn recover(&self, operation: &str, error: &BoxError) -> Result<(), BoxError>;
}

#[tonic::async_trait]
impl<F> ErrorRecoveryPolicy for F
where
    F: Fn(&str, &BoxError) -> Result<(), BoxError> + Send + Sync,
{
    async fn recover(&self, operation: &str, error: &BoxError) -> Result<(), BoxError> {
        self(operation, error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("{operation}: unable to obtain a connection: {source}")]
    Connection {
        operation: &'static str,
        #[source]
        source: ConnectionError,
    },
    #[error("{operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl CallError {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Connection { operation, .. } | Self::Backend { operation, .. } => operation,
        }
    }
}

pub struct CallExecutor<C: Connector> {
    connections: Arc<ConnectionManager<C>>,
    recovery: Option<Arc<dyn ErrorRecoveryPolicy>>,
}

impl<C: Connector> Clone for CallExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
            recovery: self.recovery.clone(),
        }
    }
}

impl<C: Connector> CallExecutor<C> {
    pub fn new(
        connections: Arc<ConnectionManager<C>>,
        recovery: Option<Arc<dyn ErrorRecoveryPolicy>>,
    ) -> Self {
        Self {
            connections,
            recovery,
        }
    }

    /// Executes `call` against the current session.
    ///
    /// The session is resolved once; retries reuse it.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, CallError>
    where
        F: FnMut(Arc<C::Session>) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let session = self
            .connections
            .get_connection()
            .await
            .map_err(|source| CallError::Connection { operation, source })?;

        let mut attempt = 1usize;
        loop {
            let error = match call(session.clone()).await {
                Ok(value) => {
                    debug!(operation, attempt, "backend call succeeded");
                    return Ok(value);
                }
                Err(error) => error,
            };

            let Some(recovery) = &self.recovery else {
                debug!(operation, error = %error, "backend call failed");
                return Err(CallError::Backend {
                    operation,
                    source: error,
                });
            };

            match recovery.recover(operation, &error).await {
                Ok(()) => {
                    warn!(operation, attempt, error = %error, "retrying failed backend call");
                    attempt += 1;
                }
                Err(source) => {
                    debug!(operation, attempt, error = %source, "backend call given up");
                    return Err(CallError::Backend { operation, source });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Session;
    use crate::testing::FakeConnector;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor(
        connector: &FakeConnector,
        recovery: Option<Arc<dyn ErrorRecoveryPolicy>>,
    ) -> CallExecutor<FakeConnector> {
        CallExecutor::new(Arc::new(ConnectionManager::new(connector.clone())), recovery)
    }

    fn failing_backend() -> FakeConnector {
        FakeConnector::new().with_responder(|_, _| Err("scene not found".into()))
    }

    #[tokio::test]
    async fn test_success_returns_the_value() {
        let connector =
            FakeConnector::new().with_responder(|request_type, _| Ok(json!({ "echo": request_type })));
        let executor = executor(&connector, None);

        let value = executor
            .execute("GetVersion", |session| async move {
                session.request("GetVersion", None).await
            })
            .await
            .unwrap();

        assert_eq!(value, json!({ "echo": "GetVersion" }));
    }

    #[tokio::test]
    async fn test_policy_gives_up_on_second_failure() {
        let connector = failing_backend();
        let decisions = Arc::new(AtomicUsize::new(0));
        let policy = {
            let decisions = decisions.clone();
            move |_: &str, _: &BoxError| -> Result<(), BoxError> {
                match decisions.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(()),
                    _ => Err("giving up".into()),
                }
            }
        };
        let executor = executor(&connector, Some(Arc::new(policy)));

        let invocations = AtomicUsize::new(0);
        let err = executor
            .execute("GetSceneList", |session| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async move { session.request("GetSceneList", None).await }
            })
            .await
            .unwrap_err();

        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(err.operation(), "GetSceneList");
        match err {
            CallError::Backend { source, .. } => assert_eq!(source.to_string(), "giving up"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_without_policy_the_error_propagates() {
        let connector = failing_backend();
        let executor = executor(&connector, None);

        let invocations = AtomicUsize::new(0);
        let err = executor
            .execute("RemoveScene", |session| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async move { session.request("RemoveScene", None).await }
            })
            .await
            .unwrap_err();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "RemoveScene: scene not found");
    }

    #[tokio::test]
    async fn test_recovered_retry_can_succeed() {
        let connector = FakeConnector::new();
        let executor = executor(
            &connector,
            Some(Arc::new(|_: &str, _: &BoxError| -> Result<(), BoxError> { Ok(()) })),
        );

        let invocations = AtomicUsize::new(0);
        let value = executor
            .execute("GetStats", |_| {
                let attempt = invocations.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err::<Value, BoxError>("busy".into())
                    } else {
                        Ok(json!(attempt))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, json!(3));
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_never_reaches_the_backend() {
        let connector = FakeConnector::new().failing(1);
        let executor = executor(&connector, None);

        let invocations = AtomicUsize::new(0);
        let err = executor
            .execute("GetVersion", |_| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async { Ok(Value::Null) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Connection { operation: "GetVersion", .. }));
        assert!(err.to_string().contains("unable to obtain a connection"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }
}
