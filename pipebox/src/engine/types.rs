//! Request records and handles exchanged with a container engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::net::PortBindingMap;
use crate::volumes::BindMount;

/// Engine-side identity of a created container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Engine-side identity and metadata of an image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHandle {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl ImageHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repo_tags: Vec::new(),
            created: None,
            size: None,
        }
    }
}

/// Host-side configuration applied when a container starts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub binds: Vec<BindMount>,
    /// `container-name:alias` links to already running containers.
    pub links: Vec<String>,
    pub port_bindings: PortBindingMap,
    pub dns: Vec<String>,
}

/// Everything needed to create a container.
///
/// `host` duplicates what is later passed to start; engines whose API only
/// accepts host configuration at create time apply it here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Empty keeps the image command.
    pub cmd: Vec<String>,
    /// `None` keeps the image entrypoint.
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    pub exposed_ports: BTreeSet<String>,
    pub network_disabled: bool,
    pub dns: Vec<String>,
    pub tty: bool,
    pub open_stdin: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub host: HostSpec,
}

impl ContainerSpec {
    /// Non-TTY container with all standard streams attached.
    pub fn attached(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cmd: Vec::new(),
            entrypoint: None,
            env: Vec::new(),
            exposed_ports: BTreeSet::new(),
            network_disabled: false,
            dns: Vec::new(),
            tty: false,
            open_stdin: true,
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            host: HostSpec::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOptions {
    /// Also remove anonymous volumes attached to the container.
    pub remove_volumes: bool,
    /// Kill the container first if it is running.
    pub force: bool,
}

impl RemoveOptions {
    /// Forced removal including anonymous volumes.
    pub fn purge() -> Self {
        Self {
            remove_volumes: true,
            force: true,
        }
    }
}

/// Registry credentials. Empty credentials mean anonymous access.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl RegistryAuth {
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub repository: String,
    pub tag: String,
    /// Registry host; empty for the default registry.
    pub registry: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCheck {
    pub auth: RegistryAuth,
    /// Requested access level, e.g. `read`.
    pub access: String,
    pub repository: String,
    /// Registry host; empty for the default registry.
    pub registry: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub container: String,
    pub repository: String,
    pub tag: String,
    pub message: String,
    pub author: String,
}
