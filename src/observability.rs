// SPDX-License-Identifier: MIT
//! Observability utilities — structured logging setup and per-call latency
//! tracking.

use std::time::Instant;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// `filter` overrides the directive; otherwise `RIGD_LOG` (then `RUST_LOG`)
/// is honoured, falling back to `rigd=info`. Later calls lose the race and
/// are ignored, so tests that share a process can all call this.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_env("RIGD_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("rigd=info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .compact()
        .try_init();
}

/// Track latency of an async operation and emit a structured log event.
pub struct LatencyTracker {
    operation: String,
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency for an operation.
    ///
    /// Examples:
    ///   let tracker = LatencyTracker::start("power/on");
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Finish tracking and emit a log event with the elapsed time.
    pub fn finish(self) {
        let elapsed_ms = self.start.elapsed().as_millis();
        if elapsed_ms > 1000 {
            // Slow operation — log at info level
            info!(
                operation = %self.operation,
                elapsed_ms = elapsed_ms,
                "slow operation"
            );
        } else {
            debug!(
                operation = %self.operation,
                elapsed_ms = elapsed_ms,
                "operation complete"
            );
        }
    }
}
