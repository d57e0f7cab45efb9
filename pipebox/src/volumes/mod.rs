//! Bind-mount translation for the primary box container.

mod binds;

pub use binds::{BindMode, BindMount, infrastructure_binds, workspace_binds};
