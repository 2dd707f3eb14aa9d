use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::error::PipelineResult;

/// Blocking-in-spirit HTTP access: no timeout, no retry. Any failure ends the run.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        Fetcher {
            client: reqwest::Client::new(),
        }
    }

    pub async fn page(&self, url: &str) -> PipelineResult<String> {
        info!("Fetching landing page: {}", url);
        let html = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(html)
    }

    /// Load a report document from a URL, or from disk when the reference is
    /// not an http(s) URL.
    pub async fn document(&self, reference: &str) -> PipelineResult<Vec<u8>> {
        if !is_url(reference) {
            info!("Reading report from file: {}", reference);
            return Ok(tokio::fs::read(reference).await?);
        }

        println!("Reading file from {}", reference);
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("downloading report");
        pb.enable_steady_tick(Duration::from_millis(120));

        let result = self.download(reference).await;
        pb.finish_and_clear();
        let bytes = result?;
        info!(bytes = bytes.len(), "report downloaded");
        Ok(bytes)
    }

    async fn download(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

pub fn is_url(reference: &str) -> bool {
    let lower = reference.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
