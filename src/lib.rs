//! NextTrace Exporter
//!
//! Periodically runs `nexttrace` against configured hosts and exposes the
//! per-hop latency and loss of the latest run as Prometheus metrics.

pub mod config;
pub mod metrics;
pub mod probe;
pub mod scheduler;
pub mod trace;
pub mod web;
