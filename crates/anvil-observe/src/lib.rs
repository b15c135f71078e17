//! Observability setup for anvil: tracing subscriber and optional
//! OpenTelemetry span export.
//!
//! The engine itself only emits `tracing` spans (`anvil.forge`,
//! `anvil.operation`, `anvil.restore`, `anvil.scope`) and events; this crate
//! decides where they go.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
