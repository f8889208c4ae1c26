//! # Metrics
//!
//! Prometheus registry for the HTTP surface: connected viewers and mutation
//! outcomes per operation.

use std::fmt;

use domains::DomainError;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MutationLabels {
    pub op: String,
    pub outcome: String,
}

pub struct Metrics {
    registry: Registry,
    viewers: Gauge,
    mutations: Family<MutationLabels, Counter>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let viewers = Gauge::default();
        let mutations = Family::<MutationLabels, Counter>::default();
        registry.register(
            "wishboard_viewers_connected",
            "Event stream channels currently attached",
            viewers.clone(),
        );
        // Exposed as wishboard_mutations_total.
        registry.register(
            "wishboard_mutations",
            "Mutation requests by operation and outcome",
            mutations.clone(),
        );
        Self {
            registry,
            viewers,
            mutations,
        }
    }

    /// Counts one mutation attempt of kind `op`.
    pub fn record<T>(&self, op: &str, result: &Result<T, DomainError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => outcome_label(err),
        };
        self.mutations
            .get_or_create(&MutationLabels {
                op: op.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Renders the OpenMetrics text exposition. `viewers` is sampled by the
    /// caller at scrape time.
    pub fn render(&self, viewers: usize) -> Result<String, fmt::Error> {
        self.viewers.set(i64::try_from(viewers).unwrap_or(i64::MAX));
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

fn outcome_label(err: &DomainError) -> &'static str {
    match err {
        DomainError::NotFound(..) => "not_found",
        DomainError::ValidationError(_) => "invalid",
        DomainError::Conflict(_) => "conflict",
        DomainError::Forbidden(_) => "forbidden",
        DomainError::Unauthorized(_) => "unauthorized",
        DomainError::Internal(_) => "error",
    }
}
