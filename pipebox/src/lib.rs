//! Pipebox - container orchestration core for CI pipeline runs.
//!
//! A [`PipelineBox`] owns the primary container of one pipeline run together
//! with the service containers it depends on. It fetches the box image
//! (checking registry access first), starts services in declared order so
//! later services can link to earlier ones, creates and starts the primary
//! container, and tears everything down afterwards.
//!
//! The container engine is a capability ([`ContainerEngine`]) injected as a
//! shared trait object; [`DockerEngine`] is the Docker-backed implementation.

pub mod engine;
pub mod images;
pub mod litebox;
pub mod net;
pub mod runtime;
pub mod util;
pub mod volumes;

pub use engine::{ContainerEngine, DockerEngine, SharedEngine};
pub use images::{Emitter, ImageFetcher, ImageSource, ProgressDetail, PullStatus, StatusEvent};
pub use litebox::{BoxIdentity, PipelineBox, ServiceBox, ServiceContainer};
pub use pipebox_shared::{BoxError, BoxResult, EngineError, EngineResult};
pub use runtime::context::RunContext;
pub use runtime::environment::Environment;
pub use runtime::options::{BoxConfig, EngineOptions, PipelineOptions};
