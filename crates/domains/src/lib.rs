//! adfleet/crates/domains/src/lib.rs
//!
//! Domain models, error taxonomy and port traits for the monitor fleet.
//! Nothing in this crate performs I/O; adapters implement the ports.

pub mod capability;
pub mod error;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use capability::*;
pub use error::*;
pub use models::*;
pub use ports::*;
