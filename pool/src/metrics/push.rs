/// Prometheus Pushgateway client.
///
/// Pushes the rendered registry to `{base}/metrics/job/{job}` on a fixed
/// period. A failed push is logged and picked up again on the next tick.

use anyhow::{bail, Context, Result};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::PrometheusMetrics;

pub struct Pushgateway {
    client: reqwest::Client,
    url: String,
}

impl Pushgateway {
    pub fn new(base_url: &str, job: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building pushgateway HTTP client")?;
        Ok(Self {
            client,
            url: push_url(base_url, job),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn push(&self, body: String) -> Result<()> {
        let resp = self
            .client
            .put(&self.url)
            .header(CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(body)
            .send()
            .await
            .with_context(|| format!("pushing metrics to {}", self.url))?;

        if !resp.status().is_success() {
            bail!("pushgateway {} answered {}", self.url, resp.status());
        }
        Ok(())
    }

    /// Push every `every` until `shutdown` flips to true.
    pub fn spawn(
        self,
        metrics: Arc<PrometheusMetrics>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.push(metrics.render()).await {
                            tracing::warn!("Pushgateway push failed: {:#}", e);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Pushgateway loop stopped");
        })
    }
}

fn push_url(base_url: &str, job: &str) -> String {
    format!("{}/metrics/job/{}", base_url.trim_end_matches('/'), job)
}
