//! Error types for box orchestration.
//!
//! Errors are split by boundary:
//! - [`EngineError`]: failures reported by a container engine backend
//! - [`BoxError`]: failures surfaced by box lifecycle operations
//!
//! Teardown code decides what is fatal by asking an [`EngineError`] what it
//! is (`is_not_running`, `is_not_found`), never by downcasting a backend type.

use std::io;
use thiserror::Error;

/// Errors reported by a container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The container exists but is not running (e.g. stop on a stopped container).
    #[error("container {0} is not running")]
    NotRunning(String),

    /// The referenced container or image does not exist.
    #[error("no such {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The engine answered with an error status.
    #[error("engine api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The engine could not be reached or the request failed in transit.
    #[error("engine transport: {0}")]
    Transport(String),

    /// Registry interaction failed (auth endpoint, manifest lookup).
    #[error("registry: {0}")]
    Registry(String),

    /// A streamed response (pull progress, export) reported an error.
    #[error("stream: {0}")]
    Stream(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// The engine reported that the container was already stopped.
    pub fn is_not_running(&self) -> bool {
        matches!(self, EngineError::NotRunning(_))
    }

    /// The engine reported that the container or image is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

/// Errors returned by box lifecycle operations.
#[derive(Debug, Error)]
pub enum BoxError {
    /// Box identifier cannot name an image repository.
    #[error("invalid box name '{0}': '@' is not allowed in repositories")]
    InvalidIdentifier(String),

    /// Registry refused read access to the repository.
    #[error("not allowed to interact with this repository: {repository}")]
    AccessDenied { repository: String },

    /// Engine failure, propagated as reported.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Malformed configuration (command tokenization, option values).
    #[error("configuration: {0}")]
    Config(String),

    /// Operation requires state the box does not have yet.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The run context was cancelled while an engine call was in flight.
    #[error("operation cancelled")]
    Cancelled,

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl BoxError {
    /// Whether this error wraps an engine "not running" report.
    pub fn is_not_running(&self) -> bool {
        matches!(self, BoxError::Engine(e) if e.is_not_running())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type BoxResult<T> = Result<T, BoxError>;
