//! Bind mounts from the host working directory and infrastructure paths.

use std::fmt;
use std::path::{Path, PathBuf};

use pipebox_shared::BoxResult;
use serde::{Deserialize, Serialize};

use crate::runtime::options::PipelineOptions;

/// Access mode requested for a bind mount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindMode {
    /// Live-shared, writable from the container.
    ReadWrite,
    /// Staged for copying; the container must not modify the host side.
    ReadOnly,
}

impl BindMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindMode::ReadWrite => "rw",
            BindMode::ReadOnly => "ro",
        }
    }
}

/// Host path mounted at a container path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    /// `None` leaves the engine default in place.
    pub mode: Option<BindMode>,
}

impl BindMount {
    /// Mount a host path at the same path inside the container.
    pub fn passthrough(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            host_path: path.clone(),
            container_path: path,
            mode: None,
        }
    }
}

/// Engine bind syntax: `host:container[:mode]`.
impl fmt::Display for BindMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        )?;
        if let Some(mode) = self.mode {
            write!(f, ":{}", mode.as_str())?;
        }
        Ok(())
    }
}

/// Bind every top-level directory (or symlink) of the run's host root.
///
/// With `direct_mount` each entry is mounted read-write at its guest path;
/// otherwise it is staged read-only under the mount root. Plain files are
/// ignored. Order follows the directory listing.
pub fn workspace_binds(options: &PipelineOptions) -> BoxResult<Vec<BindMount>> {
    let mut binds = Vec::new();

    for entry in std::fs::read_dir(&options.host_root)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !(file_type.is_dir() || file_type.is_symlink()) {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        let bind = if options.direct_mount {
            BindMount {
                host_path: options.host_path(&name),
                container_path: options.guest_path(&name),
                mode: Some(BindMode::ReadWrite),
            }
        } else {
            BindMount {
                host_path: options.host_path(&name),
                container_path: options.mnt_path(&name),
                mode: Some(BindMode::ReadOnly),
            }
        };
        binds.push(bind);
    }

    tracing::trace!(
        host_root = %options.host_root.display(),
        count = binds.len(),
        direct = options.direct_mount,
        "Computed workspace binds"
    );
    Ok(binds)
}

/// Passthrough binds for infrastructure paths (engine socket, engine CLI).
pub fn infrastructure_binds<P: AsRef<Path>>(paths: &[P]) -> Vec<BindMount> {
    paths
        .iter()
        .map(|p| BindMount::passthrough(p.as_ref()))
        .collect()
}
