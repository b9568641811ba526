//! Observability setup for memweave: structured `tracing` output and an
//! optional OpenTelemetry span exporter.

pub mod tracing_setup;
