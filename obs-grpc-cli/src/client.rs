//! # Dynamic gRPC Client
//!
//! Calls methods of the proxy by descriptor, exchanging `serde_json::Value`s through
//! [`JsonCodec`]. Only the shapes the proxy serves are supported: unary and server
//! streaming.
use crate::codec::JsonCodec;
use http_body::Body as HttpBody;
use obs_grpc_core::BoxError;
use prost_reflect::MethodDescriptor;
use serde_json::Value;
use tonic::Streaming;
use tonic::client::GrpcService;
use tonic::transport::{Channel, Endpoint};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Invalid proxy address '{address}': {source}")]
    InvalidAddress {
        address: String,
        source: tonic::transport::Error,
    },
    #[error("Unable to connect to the proxy at '{address}': {source}")]
    Connect {
        address: String,
        source: tonic::transport::Error,
    },
    #[error("The client was not ready: {0}")]
    NotReady(#[source] BoxError),
    #[error("Invalid gRPC path '{path}': {source}")]
    InvalidPath {
        path: String,
        source: http::uri::InvalidUri,
    },
}

/// A client of the proxy that sends and receives JSON.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl GrpcClient<Channel> {
    /// Connects to `address`. A bare `host:port` is dialed over plain HTTP/2.
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let endpoint = Endpoint::from_shared(uri).map_err(|source| ClientError::InvalidAddress {
            address: address.to_string(),
            source,
        })?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|source| ClientError::Connect {
                address: address.to_string(),
                source,
            })?;

        Ok(Self::new(channel))
    }
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            client: tonic::client::Grpc::new(service),
        }
    }

    /// Performs a unary call.
    ///
    /// # Returns
    /// * `Ok(Ok(Value))` - The response message.
    /// * `Ok(Err(Status))` - The call reached the proxy and failed there.
    /// * `Err(ClientError)` - The call could not be sent.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        payload: Value,
    ) -> Result<Result<Value, tonic::Status>, ClientError> {
        let path = http_path(method)?;
        self.ready().await?;

        let codec = JsonCodec::new(method.input(), method.output());
        let response = self
            .client
            .unary(tonic::Request::new(payload), path, codec)
            .await;

        Ok(response.map(tonic::Response::into_inner))
    }

    /// Performs a server-streaming call, `SubscribeEvents` being the only one.
    ///
    /// # Returns
    /// * `Ok(Ok(Streaming))` - The stream of response messages.
    /// * `Ok(Err(Status))` - The proxy refused the call.
    /// * `Err(ClientError)` - The call could not be sent.
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload: Value,
    ) -> Result<Result<Streaming<Value>, tonic::Status>, ClientError> {
        let path = http_path(method)?;
        self.ready().await?;

        let codec = JsonCodec::new(method.input(), method.output());
        let response = self
            .client
            .server_streaming(tonic::Request::new(payload), path, codec)
            .await;

        Ok(response.map(tonic::Response::into_inner))
    }

    async fn ready(&mut self) -> Result<(), ClientError> {
        self.client
            .ready()
            .await
            .map_err(|e| ClientError::NotReady(e.into()))
    }
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, ClientError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::try_from(path.as_str())
        .map_err(|source| ClientError::InvalidPath { path, source })
}
