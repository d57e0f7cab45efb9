//! Image acquisition and pull-progress reporting.

mod emitter;
mod fetch;

pub use emitter::{Emitter, ProgressDetail, PullStatus, StatusEvent};
pub use fetch::{ImageFetcher, ImageSource};
