use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Process-wide counters for model calls. Shared behind an `Arc` by every
/// pipeline built on the same gateway.
#[derive(Debug, Default)]
pub struct GatewayStats {
    calls: AtomicUsize,
    successes: AtomicUsize,
    transient_failures: AtomicUsize,
    permanent_failures: AtomicUsize,
    retries: AtomicUsize,
    total_latency_us: AtomicU64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, duration: Duration, outcome: AttemptOutcome) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        let counter = match outcome {
            AttemptOutcome::Success => &self.successes,
            AttemptOutcome::Transient => &self.transient_failures,
            AttemptOutcome::Permanent => &self.permanent_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: usize) {
        self.retries.fetch_add(retries, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayStatsSnapshot {
        let calls = self.calls.load(Ordering::Relaxed);
        let total_us = self.total_latency_us.load(Ordering::Relaxed) as f64;
        GatewayStatsSnapshot {
            calls,
            successes: self.successes.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            avg_latency_ms: if calls > 0 {
                total_us / calls as f64 / 1000.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStatsSnapshot {
    pub calls: usize,
    pub successes: usize,
    pub transient_failures: usize,
    pub permanent_failures: usize,
    pub retries: usize,
    pub avg_latency_ms: f64,
}
