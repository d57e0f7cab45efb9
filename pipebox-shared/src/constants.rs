//! Shared constants for the box orchestrator and engine backends.

/// Container naming and lifecycle defaults
pub mod container {
    /// Command run in a box when the configuration does not name one
    pub const DEFAULT_CMD: &str = "/bin/bash";

    /// Prefix for the primary container of a pipeline run
    pub const NAME_PREFIX: &str = "pipeline-";

    /// Seconds the engine waits before killing a container on stop
    pub const STOP_GRACE_SECS: u32 = 1;

    /// Seconds the engine waits before killing a container on restart
    pub const RESTART_GRACE_SECS: u32 = 1;
}

/// Image naming defaults
pub mod image {
    /// Tag used when neither the identifier nor the config names one
    pub const DEFAULT_TAG: &str = "latest";

    /// Author recorded on committed images
    pub const COMMIT_AUTHOR: &str = "pipebox";

    /// Message recorded on committed images
    pub const COMMIT_MESSAGE: &str = "Build completed";
}

/// Registry access
pub mod registry {
    /// Access level requested before pulling
    pub const ACCESS_READ: &str = "read";

    /// Registry assumed for repositories without an explicit registry host
    pub const DEFAULT_REGISTRY: &str = "docker.io";
}

/// Host paths passed straight through into every box
pub mod mounts {
    /// Engine control socket
    pub const ENGINE_SOCKET: &str = "/var/run/docker.sock";

    /// Engine CLI binary
    pub const ENGINE_CLI: &str = "/usr/local/bin/docker";

    /// Default infrastructure mounts (host path == container path)
    pub const INFRASTRUCTURE: &[&str] = &[ENGINE_SOCKET, ENGINE_CLI];
}

pub mod envs {
    pub const ENGINE_HOST: &str = "DOCKER_HOST";
}

/// Engine connection defaults
pub mod engine {
    /// Default engine endpoint when `DOCKER_HOST` is unset
    pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

    /// Request timeout in seconds for engine connections
    pub const CONNECT_TIMEOUT_SECS: u64 = 120;
}
