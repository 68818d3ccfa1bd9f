//! Prometheus exposition of the latest execution results.
//!
//! A fresh registry is filled on every scrape so series of removed targets
//! and vanished hops disappear with the result they came from.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::config::Target;
use crate::scheduler::{ExecutionResult, Status};

const NAMESPACE: &str = "nexttrace";

struct TraceMetrics {
    hop_rtt: GaugeVec,
    hop_loss: GaugeVec,
    total_hops: GaugeVec,
    execution_duration: GaugeVec,
    executions_total: CounterVec,
    last_execution: GaugeVec,
}

impl TraceMetrics {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            hop_rtt: GaugeVec::new(
                Opts::new("hop_rtt_milliseconds", "Average RTT for each hop in milliseconds")
                    .namespace(NAMESPACE),
                &["target", "hop_number", "hop_ip", "hop_hostname", "hop_asn"],
            )?,
            hop_loss: GaugeVec::new(
                Opts::new("hop_loss_ratio", "Packet loss ratio for each hop (0-1)")
                    .namespace(NAMESPACE),
                &["target", "hop_number", "hop_ip"],
            )?,
            total_hops: GaugeVec::new(
                Opts::new("total_hops", "Total number of hops to reach the target")
                    .namespace(NAMESPACE),
                &["target"],
            )?,
            execution_duration: GaugeVec::new(
                Opts::new(
                    "execution_duration_seconds",
                    "Duration of nexttrace command execution in seconds",
                )
                .namespace(NAMESPACE),
                &["target"],
            )?,
            executions_total: CounterVec::new(
                Opts::new("executions_total", "Total number of nexttrace executions")
                    .namespace(NAMESPACE),
                &["target", "status"],
            )?,
            last_execution: GaugeVec::new(
                Opts::new(
                    "last_execution_timestamp",
                    "Timestamp of the last successful execution",
                )
                .namespace(NAMESPACE),
                &["target"],
            )?,
        };

        registry.register(Box::new(metrics.hop_rtt.clone()))?;
        registry.register(Box::new(metrics.hop_loss.clone()))?;
        registry.register(Box::new(metrics.total_hops.clone()))?;
        registry.register(Box::new(metrics.execution_duration.clone()))?;
        registry.register(Box::new(metrics.executions_total.clone()))?;
        registry.register(Box::new(metrics.last_execution.clone()))?;

        Ok(metrics)
    }

    fn observe(&self, name: &str, result: &ExecutionResult) {
        self.execution_duration
            .with_label_values(&[name])
            .set(result.duration.as_secs_f64());

        // Only the latest outcome is kept, so this reports its status once.
        let status = result.status();
        self.executions_total
            .with_label_values(&[name, status.as_str()])
            .inc();

        if status == Status::Success {
            self.last_execution
                .with_label_values(&[name])
                .set(result.timestamp.timestamp() as f64);
        }

        let Some(trace) = result.trace() else {
            return;
        };

        self.total_hops
            .with_label_values(&[name])
            .set(trace.hops.len() as f64);

        for hop in trace.hops.iter().filter(|hop| hop.has_valid_ip()) {
            let hop_number = hop.ttl.to_string();

            let avg_rtt = hop.average_rtt();
            if avg_rtt > 0.0 {
                self.hop_rtt
                    .with_label_values(&[name, &hop_number, &hop.ip, &hop.hostname, &hop.asn])
                    .set(avg_rtt);
            }

            self.hop_loss
                .with_label_values(&[name, &hop_number, &hop.ip])
                .set(hop.loss);
        }
    }
}

/// Render the text exposition for `targets`, in configuration order.
///
/// Targets without a recorded result yet are skipped.
pub fn render(
    targets: &[Target],
    results: &HashMap<String, Arc<ExecutionResult>>,
) -> prometheus::Result<String> {
    let registry = Registry::new();
    let metrics = TraceMetrics::register(&registry)?;

    for target in targets {
        if let Some(result) = results.get(&target.name) {
            metrics.observe(&target.name, result);
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn content_type() -> &'static str {
    prometheus::TEXT_FORMAT
}
