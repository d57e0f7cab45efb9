//! Pipebox shared - error types and constants
//!
//! This crate contains the types that cross the boundary between the box
//! orchestrator and the container engines that back it.

pub mod constants;
pub mod errors;

pub use errors::{BoxError, BoxResult, EngineError, EngineResult};
