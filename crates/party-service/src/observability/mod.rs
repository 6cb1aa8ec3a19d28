//! Observability for the party service: Prometheus metrics.

pub mod metrics;
