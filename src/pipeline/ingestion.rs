//! Per-connection ingestion session
//!
//! One `Session` owns one MLLP byte stream. Frames are handled strictly in
//! arrival order: decode, classify, apply to the engine, score, page, then
//! acknowledge. Every decoded payload is acknowledged exactly once, whatever
//! happens downstream of the decoder.

use super::alert::{dispatch_alert, AlertSender};
use super::config::PipelineConfig;
use super::engine::{self, EngineOutcome, PipelineEngine};
use super::metrics::{Counter, PipelineMetrics};
use super::scorer::{score_with_timeout, Scorer};
use crate::hl7::{build_ack, classify};
use crate::mllp::{FrameDecoder, FrameError};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{interval, Duration};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a session stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    Shutdown,
}

/// Everything a session needs besides its socket
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<Mutex<PipelineEngine>>,
    pub scorer: Arc<dyn Scorer>,
    pub alerts: Arc<dyn AlertSender>,
    pub metrics: Arc<PipelineMetrics>,
    pub scorer_timeout: Duration,
    pub alert_timeout: Duration,
    pub stats_interval: Duration,
}

impl SessionContext {
    pub fn new(
        config: &PipelineConfig,
        engine: Arc<Mutex<PipelineEngine>>,
        scorer: Arc<dyn Scorer>,
        alerts: Arc<dyn AlertSender>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            engine,
            scorer,
            alerts,
            metrics,
            scorer_timeout: config.scorer_timeout(),
            alert_timeout: config.alert_timeout(),
            stats_interval: config.stats_interval(),
        }
    }

    /// Log counters and the rolling statistic on one line
    pub fn log_stats(&self) {
        let (statistic, summary, patients) = {
            let mut engine = engine::lock(&self.engine);
            (engine.statistic(), engine.rolling_summary(), engine.store().len())
        };
        let m = &self.metrics;

        log::info!(
            "📊 messages: {} | parse failures: {} | results: {} | positive: {} | pages: {} sent, {} failed | patients: {} | 1h {}: {}",
            m.get(Counter::MessagesReceived),
            m.get(Counter::ParseFailures),
            m.get(Counter::ObservationsReceived),
            m.get(Counter::PositivePredictions),
            m.get(Counter::PagesSent),
            m.get(Counter::PagesFailed),
            patients,
            statistic.as_str(),
            summary
                .map(|v| format!("{:.2}", v))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
}

pub struct Session<S> {
    stream: S,
    peer: String,
    decoder: FrameDecoder,
    context: SessionContext,
    read_buffer_size: usize,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        decoder: FrameDecoder,
        context: SessionContext,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            decoder,
            context,
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    /// Read and handle frames until the peer closes, shutdown is signalled,
    /// or the stream breaks the framing protocol.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<SessionEnd, SessionError> {
        log::info!("🔌 Session started with {}", self.peer);

        let mut buf = vec![0u8; self.read_buffer_size];
        let mut stats_timer = interval(self.context.stats_interval);
        // first tick completes immediately
        stats_timer.tick().await;

        let end = loop {
            if *shutdown.borrow() {
                break SessionEnd::Shutdown;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break SessionEnd::Shutdown;
                    }
                }

                read = self.stream.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        if !self.decoder.remainder().is_empty() {
                            log::warn!(
                                "⚠️  {} closed with {} bytes of an incomplete frame",
                                self.peer,
                                self.decoder.remainder().len()
                            );
                        }
                        break SessionEnd::PeerClosed;
                    }

                    let payloads = match self.decoder.feed(&buf[..n]) {
                        Ok(payloads) => payloads,
                        Err(e) => {
                            log::error!("❌ Dropping connection to {}: {}", self.peer, e);
                            return Err(e.into());
                        }
                    };

                    for payload in payloads {
                        self.handle_payload(&payload).await?;
                    }
                }

                _ = stats_timer.tick() => {
                    self.context.log_stats();
                }
            }
        };

        log::info!("🔌 Session with {} ended: {:?}", self.peer, end);
        Ok(end)
    }

    async fn handle_payload(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let metrics = self.context.metrics.clone();
        metrics.incr(Counter::MessagesReceived);

        match classify(payload) {
            Ok(event) => {
                metrics.incr(Counter::MessagesParsed);
                log::debug!("📨 {} for MRN {}", event.message_type().as_str(), event.mrn());

                let outcome = engine::lock(&self.context.engine).apply(event);
                self.handle_outcome(outcome).await;
            }
            Err(e) => {
                metrics.incr(Counter::ParseFailures);
                log::warn!("⚠️  Unparseable message from {}: {}", self.peer, e);
            }
        }

        let ack = build_ack(chrono::Utc::now().naive_utc());
        self.stream.write_all(&ack).await?;
        self.stream.flush().await?;
        metrics.incr(Counter::AcksSent);

        Ok(())
    }

    async fn handle_outcome(&self, outcome: EngineOutcome) {
        let context = &self.context;

        match outcome {
            EngineOutcome::Admitted { mrn, age } => {
                log::debug!("   └─ admitted {} (age {:?})", mrn, age);
            }
            EngineOutcome::Updated { mrn, known } => {
                log::debug!("   └─ administrative update for {} (known: {})", mrn, known);
            }
            EngineOutcome::Ignored { mrn, kind } => {
                log::debug!("   └─ ignored {} result for {}", kind, mrn);
            }
            EngineOutcome::Observed(assessment) => {
                context.metrics.incr(Counter::ObservationsReceived);

                let started = Instant::now();
                let result = score_with_timeout(
                    context.scorer.as_ref(),
                    &assessment.features,
                    context.scorer_timeout,
                )
                .await;
                context.metrics.set_scorer_latency(started.elapsed());

                match result {
                    Ok(positive) => {
                        context.metrics.incr(Counter::Predictions);
                        log::debug!(
                            "   └─ slot {} for {}, {} scorer: {}",
                            assessment.slot,
                            assessment.mrn,
                            context.scorer.name(),
                            positive
                        );

                        if positive {
                            context.metrics.incr(Counter::PositivePredictions);
                            if let Some(reference_time) = assessment.reference_time {
                                dispatch_alert(
                                    context.alerts.clone(),
                                    context.metrics.clone(),
                                    assessment.mrn,
                                    reference_time,
                                    context.alert_timeout,
                                );
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("⚠️  Scoring failed for MRN {}: {}", assessment.mrn, e);
                    }
                }
            }
        }
    }
}
