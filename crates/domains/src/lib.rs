//! wishboard/crates/domains/src/lib.rs
//!
//! Entities, the visibility gate, the synchronization event model and the
//! storage port for wishboard. No I/O happens in this crate.

pub mod errors;
pub mod events;
pub mod models;
pub mod ports;
pub mod visibility;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use events::*;
pub use models::*;
pub use ports::*;
pub use visibility::*;
