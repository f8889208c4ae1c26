//! wishboard/crates/api-adapters/src/lib.rs
//!
//! Inbound adapters. The HTTP surface sits behind the `web-axum` feature;
//! the metrics registry is transport agnostic.

pub mod metrics;

#[cfg(feature = "web-axum")]
pub mod http;

pub use metrics::Metrics;

#[cfg(feature = "web-axum")]
pub use http::{router, AppState};
