//! Pipeline counters
//!
//! Plain atomics shared between the session and spawned alert tasks. They are
//! read for periodic log lines; nothing in the pipeline branches on them.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    MessagesReceived,
    MessagesParsed,
    ParseFailures,
    ObservationsReceived,
    Predictions,
    PositivePredictions,
    PagesSent,
    PagesFailed,
    AcksSent,
}

impl Counter {
    pub const ALL: [Counter; 9] = [
        Counter::MessagesReceived,
        Counter::MessagesParsed,
        Counter::ParseFailures,
        Counter::ObservationsReceived,
        Counter::Predictions,
        Counter::PositivePredictions,
        Counter::PagesSent,
        Counter::PagesFailed,
        Counter::AcksSent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Counter::MessagesReceived => "messages_received_total",
            Counter::MessagesParsed => "messages_parsed_total",
            Counter::ParseFailures => "messages_parsed_failed_total",
            Counter::ObservationsReceived => "blood_test_messages_received_total",
            Counter::Predictions => "predictions_total",
            Counter::PositivePredictions => "positive_predictions_total",
            Counter::PagesSent => "pages_sent_total",
            Counter::PagesFailed => "pages_sent_failed_total",
            Counter::AcksSent => "acks_sent_total",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    counters: [AtomicU64; 9],
    scorer_latency_micros: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
    pub scorer_latency_ms: f64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn set_scorer_latency(&self, latency: Duration) {
        self.scorer_latency_micros
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL.iter().map(|c| (c.name(), self.get(*c))).collect(),
            scorer_latency_ms: self.scorer_latency_micros.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_independent() {
        let metrics = PipelineMetrics::new();
        metrics.incr(Counter::MessagesReceived);
        metrics.incr(Counter::MessagesReceived);
        metrics.incr(Counter::PagesFailed);

        assert_eq!(metrics.get(Counter::MessagesReceived), 2);
        assert_eq!(metrics.get(Counter::PagesFailed), 1);
        assert_eq!(metrics.get(Counter::PagesSent), 0);
    }

    #[test]
    fn test_snapshot_names_every_counter() {
        let metrics = PipelineMetrics::new();
        metrics.incr(Counter::AcksSent);
        metrics.set_scorer_latency(Duration::from_micros(1500));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters.len(), Counter::ALL.len());
        assert_eq!(snapshot.counters["acks_sent_total"], 1);
        assert_eq!(snapshot.scorer_latency_ms, 1.5);
    }
}
