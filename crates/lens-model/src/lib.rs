//! Shared data model for the lens tool server.
//!
//! Everything here is plain data: task records, error descriptors, progress notifications
//! and generation parameters. No I/O and no async; the runtime crates build on these types.
mod domain;
pub use domain::*;
