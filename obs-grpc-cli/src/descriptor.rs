//! # Descriptor Registry
//!
//! Resolves method names of the `obs_grpc.Obs` service against the file descriptor set
//! embedded in `obs_grpc_core`, so the CLI never needs a `.proto` file or server reflection.

use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor};
use thiserror::Error;

/// Fully qualified name of the proxy service.
pub const SERVICE_NAME: &str = "obs_grpc.Obs";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Failed to decode the descriptor set: {0}")]
    Decode(#[from] prost_reflect::DescriptorError),
    #[error("Service '{0}' not found in the descriptor set")]
    ServiceNotFound(String),
    #[error("Method '{name}' not found. Available methods: {}", .available.join(", "))]
    MethodNotFound {
        /// The name as given on the command line.
        name: String,
        /// Names of every method of the service.
        available: Vec<String>,
    },
}

/// The methods of `obs_grpc.Obs`, looked up by name.
pub struct DescriptorRegistry {
    /// The service every lookup is resolved against.
    service: ServiceDescriptor,
}

impl DescriptorRegistry {
    /// Loads the descriptors compiled into `obs_grpc_core`.
    pub fn embedded() -> Result<Self, DescriptorError> {
        Self::from_bytes(obs_grpc_core::FILE_DESCRIPTOR_SET)
    }

    /// Decodes an encoded `FileDescriptorSet` and finds the proxy service in it.
    ///
    /// # Arguments
    /// * `bytes` - The encoded descriptor set, as written by `tonic-prost-build`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let pool = DescriptorPool::decode(bytes)?;
        let service = pool
            .get_service_by_name(SERVICE_NAME)
            .ok_or_else(|| DescriptorError::ServiceNotFound(SERVICE_NAME.to_string()))?;
        Ok(Self { service })
    }

    /// Every method of the service, in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = MethodDescriptor> + '_ {
        self.service.methods()
    }

    /// Resolves `GetVersion` or `obs_grpc.Obs/GetVersion`.
    pub fn method(&self, name: &str) -> Result<MethodDescriptor, DescriptorError> {
        let method_name = match name.split_once('/') {
            Some((service, method)) if service == SERVICE_NAME => method,
            _ => name,
        };

        self.methods()
            .find(|m| m.name() == method_name)
            .ok_or_else(|| DescriptorError::MethodNotFound {
                name: name.to_string(),
                available: self.methods().map(|m| m.name().to_string()).collect(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_short_and_qualified_names() {
        let registry = DescriptorRegistry::embedded().unwrap();

        let short = registry.method("GetSceneList").unwrap();
        let qualified = registry.method("obs_grpc.Obs/GetSceneList").unwrap();

        assert_eq!(short.full_name(), "obs_grpc.Obs.GetSceneList");
        assert_eq!(short, qualified);
        assert_eq!(short.input().full_name(), "obs_grpc.GetSceneListRequest");
    }

    #[test]
    fn test_subscribe_events_is_server_streaming() {
        let registry = DescriptorRegistry::embedded().unwrap();
        let method = registry.method("SubscribeEvents").unwrap();

        assert!(method.is_server_streaming());
        assert!(!method.is_client_streaming());
        assert_eq!(registry.methods().count(), 31);
    }

    #[test]
    fn test_unknown_method_lists_the_available_ones() {
        let registry = DescriptorRegistry::embedded().unwrap();

        let err = registry.method("other.Service/GetVersion").unwrap_err();
        let message = err.to_string();

        assert!(message.starts_with("Method 'other.Service/GetVersion' not found"));
        assert!(message.contains("GetVersion, GetStats"));
    }
}
