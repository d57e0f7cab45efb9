//! Configuration for boxes, pipeline runs, and engine connections.

use pipebox_shared::constants::{engine as const_engine, envs as const_envs, mounts};
use pipebox_shared::{BoxError, BoxResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Box Configuration
// ============================================================================

/// Declarative description of a box, as produced by the pipeline config parser.
///
/// Every string may contain `$VAR` / `${VAR}` references; they are resolved
/// against the pipeline [`Environment`](crate::Environment) when used.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxConfig {
    /// Image identifier, `repository[:tag]`. Must not contain `@`.
    pub id: String,

    /// Explicit tag. When non-empty it wins over a tag embedded in `id`.
    #[serde(default)]
    pub tag: Option<String>,

    /// Command line run in the container (shell-word split).
    #[serde(default)]
    pub cmd: Option<String>,

    /// Entrypoint override (shell-word split). Empty means image default.
    #[serde(default)]
    pub entrypoint: Option<String>,

    /// Environment passed to the container. Keys are upper-cased.
    #[serde(default)]
    pub env: Vec<(String, String)>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Registry host used for the access check. Empty means the default registry.
    #[serde(default)]
    pub registry: Option<String>,
}

impl BoxConfig {
    /// Config for an image identifier with every other field defaulted.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Pipeline Options
// ============================================================================

/// Options describing one pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Identifier of the run; the primary container is named `pipeline-<id>`.
    pub pipeline_id: String,

    /// Host working directory of the run. Its top-level directories are
    /// bind-mounted into the box.
    pub host_root: PathBuf,

    /// Where workspace directories appear when mounted directly.
    #[serde(default = "default_guest_root")]
    pub guest_root: PathBuf,

    /// Where workspace directories are staged when not mounted directly.
    #[serde(default = "default_mnt_root")]
    pub mnt_root: PathBuf,

    /// Mount workspace directories read-write at their guest path instead of
    /// staging them read-only for a copy.
    #[serde(default)]
    pub direct_mount: bool,

    /// Port publish specs: `port`, `host:container`, or `ip:host:container`.
    #[serde(default)]
    pub publish_ports: Vec<String>,

    /// Keep committed images after the run instead of removing them on clean.
    #[serde(default)]
    pub should_commit: bool,
}

fn default_guest_root() -> PathBuf {
    PathBuf::from("/pipeline")
}

fn default_mnt_root() -> PathBuf {
    PathBuf::from("/mnt")
}

impl PipelineOptions {
    pub fn new(pipeline_id: impl Into<String>, host_root: impl Into<PathBuf>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            host_root: host_root.into(),
            guest_root: default_guest_root(),
            mnt_root: default_mnt_root(),
            direct_mount: false,
            publish_ports: Vec::new(),
            should_commit: false,
        }
    }

    pub fn host_path(&self, name: &str) -> PathBuf {
        self.host_root.join(name)
    }

    pub fn guest_path(&self, name: &str) -> PathBuf {
        self.guest_root.join(name)
    }

    pub fn mnt_path(&self, name: &str) -> PathBuf {
        self.mnt_root.join(name)
    }
}

// ============================================================================
// Engine Options
// ============================================================================

/// Connection and container-wide settings for the container engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Engine endpoint URI (`unix://`, `tcp://`, `http://`).
    ///
    /// Default: `$DOCKER_HOST`, else the local engine socket.
    #[serde(default = "default_host")]
    pub host: String,

    /// DNS servers handed to every container.
    #[serde(default)]
    pub dns: Vec<String>,

    /// Local-development shortcut: inspect the local image instead of
    /// checking registry access and pulling.
    #[serde(default)]
    pub local: bool,

    /// Create containers with networking disabled.
    #[serde(default)]
    pub network_disabled: bool,

    /// Host paths bound at the identical path inside every box.
    #[serde(default = "default_infrastructure_mounts")]
    pub infrastructure_mounts: Vec<PathBuf>,
}

fn default_host() -> String {
    std::env::var(const_envs::ENGINE_HOST)
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| const_engine::DEFAULT_HOST.to_string())
}

fn default_infrastructure_mounts() -> Vec<PathBuf> {
    mounts::INFRASTRUCTURE.iter().map(PathBuf::from).collect()
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            dns: Vec::new(),
            local: false,
            network_disabled: false,
            infrastructure_mounts: default_infrastructure_mounts(),
        }
    }
}

impl EngineOptions {
    /// Validate option values.
    ///
    /// The host must parse as a URI with a `unix`, `tcp` or `http` scheme.
    pub fn sanitize(&self) -> BoxResult<()> {
        let parsed = url::Url::parse(&self.host)
            .map_err(|e| BoxError::Config(format!("invalid engine host '{}': {}", self.host, e)))?;
        match parsed.scheme() {
            "unix" | "tcp" | "http" => Ok(()),
            other => Err(BoxError::Config(format!(
                "unsupported engine host scheme '{}' in '{}'",
                other, self.host
            ))),
        }
    }
}
