//! Outbound paging
//!
//! Alerts are best effort. They are dispatched onto their own task with a
//! timeout so a slow pager never delays the acknowledgment of the next frame.

use super::metrics::{Counter, PipelineMetrics};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("pager request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("pager rejected page for {mrn}: HTTP {status}")]
    Rejected { mrn: String, status: u16 },

    #[error("pager timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send_alert(&self, mrn: &str, reference_time: NaiveDateTime) -> Result<(), AlertError>;
}

/// `POST /page` with the MRN as a `text/plain` body
pub struct HttpPager {
    client: reqwest::Client,
    url: String,
}

impl HttpPager {
    /// `pager_address` is `host:port` or a full `http(s)://` base URL
    pub fn new(pager_address: &str, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let base = if pager_address.starts_with("http://") || pager_address.starts_with("https://")
        {
            pager_address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", pager_address.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            url: format!("{}/page", base),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSender for HttpPager {
    async fn send_alert(&self, mrn: &str, reference_time: NaiveDateTime) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(mrn.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Rejected {
                mrn: mrn.to_string(),
                status: status.as_u16(),
            });
        }

        log::debug!("Pager accepted page for {} (result at {})", mrn, reference_time);
        Ok(())
    }
}

/// Send an alert on a background task, recording the outcome in `metrics`
pub fn dispatch_alert(
    sender: Arc<dyn AlertSender>,
    metrics: Arc<PipelineMetrics>,
    mrn: String,
    reference_time: NaiveDateTime,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(timeout, sender.send_alert(&mrn, reference_time)).await {
            Ok(result) => result,
            Err(_) => Err(AlertError::Timeout(timeout)),
        };

        match outcome {
            Ok(()) => {
                metrics.incr(Counter::PagesSent);
                log::info!("🚨 Paged for MRN {} (result at {})", mrn, reference_time);
            }
            Err(e) => {
                metrics.incr(Counter::PagesFailed);
                log::warn!("⚠️  Failed to page for MRN {}: {}", mrn, e);
            }
        }
    })
}
