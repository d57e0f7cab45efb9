//! Pipeline-run configuration and the collaborators threaded through box
//! operations (environment, cancellation context).

pub mod context;
pub mod environment;
pub mod options;
