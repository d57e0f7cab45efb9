//! Container engine capability.
//!
//! The box orchestrator never talks to an engine directly; it drives a
//! [`ContainerEngine`] trait object shared by the box and its services. Any
//! engine implementing the trait is substitutable.

mod docker;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use pipebox_shared::EngineResult;
use pipebox_shared::constants::registry as const_registry;
use tokio::io::AsyncWrite;

pub use docker::DockerEngine;
pub use types::{
    AccessCheck, CommitRequest, ContainerHandle, ContainerSpec, HostSpec, ImageHandle,
    PullRequest, RegistryAuth, RemoveOptions,
};

/// Shared reference to an engine, cloned into every box and service.
pub type SharedEngine = Arc<dyn ContainerEngine>;

/// Writer half handed to streaming engine calls (pull progress, export).
pub type OutputStream<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Operations a container engine must provide.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create (but do not start) a container.
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<ContainerHandle>;

    /// Start a created container.
    async fn start_container(&self, id: &str, host: &HostSpec) -> EngineResult<()>;

    /// Stop a container, killing it after `grace_secs`.
    ///
    /// Must report [`EngineError::NotRunning`](pipebox_shared::EngineError::NotRunning)
    /// when the container is already stopped.
    async fn stop_container(&self, id: &str, grace_secs: u32) -> EngineResult<()>;

    /// Restart a container in place, killing it after `grace_secs`.
    async fn restart_container(&self, id: &str, grace_secs: u32) -> EngineResult<()>;

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> EngineResult<()>;

    async fn remove_image(&self, id: &str) -> EngineResult<()>;

    /// Pull an image, writing raw progress records (newline-delimited JSON)
    /// to `progress`.
    async fn pull_image(
        &self,
        request: &PullRequest,
        auth: &RegistryAuth,
        progress: OutputStream<'_>,
    ) -> EngineResult<()>;

    async fn inspect_image(&self, reference: &str) -> EngineResult<ImageHandle>;

    /// Snapshot a container's filesystem into a new image.
    async fn commit_container(&self, request: &CommitRequest) -> EngineResult<ImageHandle>;

    /// Stream a tar export of an image into `output`.
    async fn export_image(&self, name: &str, output: OutputStream<'_>) -> EngineResult<()>;

    /// Whether the credentials grant the requested access to the repository.
    async fn check_access(&self, check: &AccessCheck) -> EngineResult<bool>;

    /// Run `cmd` interactively in a container, feeding `env` lines to its stdin.
    async fn attach_interactive(&self, id: &str, cmd: &[String], env: &[String])
    -> EngineResult<()>;
}

/// Prefix `repository` with `registry` (the default registry when empty)
/// unless its first path component already names a registry host.
pub fn qualified_repository(registry: &str, repository: &str) -> String {
    let registry = if registry.is_empty() {
        const_registry::DEFAULT_REGISTRY
    } else {
        registry
    };
    let has_host = repository.split_once('/').is_some_and(|(first, _)| {
        first == registry || first == "localhost" || first.contains('.') || first.contains(':')
    });
    if has_host {
        repository.to_string()
    } else {
        format!("{}/{}", registry, repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_repository() {
        assert_eq!(qualified_repository("", "ubuntu"), "docker.io/ubuntu");
        assert_eq!(qualified_repository("", "acme/app"), "docker.io/acme/app");
        assert_eq!(
            qualified_repository("quay.io", "quay.io/acme/app"),
            "quay.io/acme/app"
        );
        assert_eq!(
            qualified_repository("quay.io", "acme/app"),
            "quay.io/acme/app"
        );
        assert_eq!(
            qualified_repository("", "localhost:5000/tools"),
            "localhost:5000/tools"
        );
    }

    #[test]
    fn test_localhost_is_a_registry_host() {
        assert_eq!(qualified_repository("", "localhost/foo"), "localhost/foo");
        assert_eq!(
            qualified_repository("quay.io", "localhost/foo"),
            "localhost/foo"
        );
    }
}
