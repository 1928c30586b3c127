//! # OBS gRPC Core
//!
//! `obs-grpc-core` is the library behind the OBS gRPC proxy. It keeps a single session to an
//! OBS Studio instance (obs-websocket v5) and exposes it as the typed gRPC service
//! `obs_grpc.Obs`.
//!
//! ## Key Components
//!
//! * **[`value`]:** The DynamicValue codec. Converts native values to and from [`pb::Any`],
//!   the tagged union used for fields whose shape is unknown at schema generation time.
//! * **[`row`]:** The generic row codec. Converts any `serde` record to and from
//!   [`pb::AbstractObject`] (a "row") using `serde_json::Value` as the intermediate form.
//! * **[`connection::ConnectionManager`]:** Owns the single upstream session, creates it lazily
//!   and tears it down when the event stream dies.
//! * **[`events::EventPump`]:** The background task draining the upstream event stream into the
//!   registered [`events::EventObserver`]s.
//! * **[`call::CallExecutor`]:** Runs one backend operation with the retry contract driven by an
//!   optional [`call::ErrorRecoveryPolicy`].
//! * **[`proxy::Proxy`]:** The tonic service implementation tying everything together.
//! * **[`relay::Relay`]:** Serves a remote `obs_grpc.Obs` client as a service, to chain proxies.
//! * **[`websocket`]:** The obs-websocket client used as the production [`connection::Connector`].
//!
//! ## Re-exports
//!
//! This crate re-exports `prost` and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod call;
pub mod connection;
pub mod events;
pub mod proxy;
pub mod relay;
pub mod row;
pub mod value;
pub mod websocket;

#[cfg(test)]
mod testing;

/// Code generated from `proto/obs_grpc.proto`.
pub mod pb {
    tonic::include_proto!("obs_grpc");
}

/// Encoded `FileDescriptorSet` of `obs_grpc.proto`, used for server reflection and by
/// dynamic clients.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("obs_grpc_descriptors");

// Re-exports
pub use prost;
pub use tonic;

/// Type alias for the standard boxed error used by injected collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
