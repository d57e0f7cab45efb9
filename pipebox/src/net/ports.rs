//! Publish spec parsing and port-binding translation.
//!
//! A publish spec is one of:
//! - `port` (host port = container port)
//! - `host:container`
//! - `ip:host:container`
//!
//! The container port may carry a `/protocol` suffix; `tcp` is assumed
//! otherwise. Specs are split on `:`, so IPv6 host addresses are not
//! expressible.

use std::collections::{BTreeMap, BTreeSet};

use pipebox_shared::{BoxError, BoxResult};
use serde::{Deserialize, Serialize};

const DEFAULT_PROTOCOL: &str = "tcp";

/// Parsed form of one publish spec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSpec {
    /// Host interface to bind. `None` binds all interfaces.
    pub host_ip: Option<String>,
    pub host_port: String,
    /// Container port including protocol, e.g. `80/tcp`.
    pub container_port: String,
}

impl PublishSpec {
    /// Parse a publish spec, returning `None` when it has more than three
    /// fields or no container port.
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (ip, host, container) = match parts.as_slice() {
            [port] => ("", *port, *port),
            [host, container] => ("", *host, *container),
            [ip, host, container] => (*ip, *host, *container),
            _ => return None,
        };

        if container.is_empty() || container.starts_with('/') {
            return None;
        }

        let container_port = if container.contains('/') {
            container.to_string()
        } else {
            format!("{}/{}", container, DEFAULT_PROTOCOL)
        };

        let host_port = if host.is_empty() {
            container_port.as_str()
        } else {
            host
        };
        // Host port never carries a protocol
        let host_port = host_port.split('/').next().unwrap_or_default().to_string();

        Some(Self {
            host_ip: (!ip.is_empty()).then(|| ip.to_string()),
            host_port,
            container_port,
        })
    }

    /// Port number part of the container port (`80` for `80/tcp`).
    pub fn container_port_number(&self) -> &str {
        port_number(&self.container_port)
    }
}

/// One host-side binding of a container port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: String,
}

/// Container port (`80/tcp`) to host bindings.
pub type PortBindingMap = BTreeMap<String, Vec<PortBinding>>;

/// Translate publish specs into a port-binding map.
///
/// Each container port maps to a single binding; a later spec for the same
/// container port replaces the earlier one. Malformed specs are skipped.
pub fn port_bindings(published: &[String]) -> PortBindingMap {
    let mut bindings = PortBindingMap::new();
    for spec in published {
        let Some(parsed) = PublishSpec::parse(spec) else {
            tracing::warn!(spec = %spec, "Ignoring malformed port publish spec");
            continue;
        };
        bindings.insert(
            parsed.container_port,
            vec![PortBinding {
                host_ip: parsed.host_ip,
                host_port: parsed.host_port,
            }],
        );
    }
    bindings
}

/// Container ports declared as exposed for the given publish specs.
pub fn exposed_ports(published: &[String]) -> BTreeSet<String> {
    port_bindings(published).into_keys().collect()
}

/// A published port as a user would reach it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedPortMap {
    /// Container port number without protocol.
    pub container_port: String,
    /// `host:port` on the engine host.
    pub host_uri: String,
}

/// Pair each published host port with the engine's host address.
///
/// A `unix://` engine host resolves to `localhost`; other URIs resolve to
/// their host component. An empty engine host leaves the host part empty.
pub fn exposed_port_maps(
    engine_host: &str,
    published: &[String],
) -> BoxResult<Vec<ExposedPortMap>> {
    let host = if engine_host.is_empty() {
        String::new()
    } else {
        let parsed = url::Url::parse(engine_host).map_err(|e| {
            BoxError::Config(format!("invalid engine host '{}': {}", engine_host, e))
        })?;
        if parsed.scheme() == "unix" {
            "localhost".to_string()
        } else {
            parsed.host_str().unwrap_or_default().to_string()
        }
    };

    let mut maps = Vec::new();
    for (container_port, bindings) in port_bindings(published) {
        for binding in bindings {
            maps.push(ExposedPortMap {
                container_port: port_number(&container_port).to_string(),
                host_uri: format!("{}:{}", host, binding.host_port),
            });
        }
    }
    Ok(maps)
}

fn port_number(container_port: &str) -> &str {
    container_port.split('/').next().unwrap_or(container_port)
}
