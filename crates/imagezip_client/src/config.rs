// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use anyhow::{Context, Result};

pub(crate) const DEFAULT_BATCH_SIZE: usize = 3;
pub(crate) const MAX_CANDIDATES: usize = 15;
/// High-resolution racing stops once a payload is bigger than this.
pub(crate) const LARGE_ENOUGH_BYTES: usize = 1536 * 1024;
pub(crate) const PAGE_FALLBACK_TIMEOUT: Duration = Duration::from_secs(20);
pub(crate) const DIRECT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

/// Tunables for one download run.
#[derive(Debug, Clone)]
pub(crate) struct FetchConfig {
    /// Descriptors fetched concurrently before waiting for the batch.
    pub batch_size: usize,
    pub max_candidates: usize,
    pub large_enough_bytes: usize,
    pub page_fallback_timeout: Duration,
    pub direct_download_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Include per-image diagnostics in the response.
    pub diagnostics: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_candidates: MAX_CANDIDATES,
            large_enough_bytes: LARGE_ENOUGH_BYTES,
            page_fallback_timeout: PAGE_FALLBACK_TIMEOUT,
            direct_download_timeout: DIRECT_DOWNLOAD_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            diagnostics: false,
        }
    }
}

impl FetchConfig {
    /// Shared client; keeps cookies across requests so gated images load like they do in the page.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(self.user_agent.clone())
            .timeout(self.request_timeout)
            .build()
            .context("Failed to build HTTP client")
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
