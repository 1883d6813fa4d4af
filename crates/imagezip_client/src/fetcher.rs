// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{HostError, TransportError};
use crate::host::{PageHost, PageScript, ScriptOutput, TabId};
use crate::models::candidate::{Candidate, CandidateReason};
use crate::models::page::ImageDescriptor;
use crate::page_scan::looks_like_image_link;
use crate::transport::{self, Transport};

/// Everything a fetch needs that outlives a single image.
pub(crate) struct FetchContext<H> {
    pub config: FetchConfig,
    pub client: reqwest::Client,
    pub host: H,
}

impl<H: PageHost> FetchContext<H> {
    pub(crate) fn new(config: FetchConfig, client: reqwest::Client, host: H) -> Self {
        Self {
            config,
            client,
            host,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchMode {
    /// First candidate that loads wins.
    Normal,
    /// Race every candidate and keep the biggest payload.
    HighRes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchedAsset {
    pub url: String,
    pub reason: CandidateReason,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct FetchOutcome {
    pub asset: Option<FetchedAsset>,
    /// Every candidate failure, in the order they happened.
    pub failures: Vec<TransportError>,
}

fn reason_for(candidate: &Candidate) -> CandidateReason {
    if transport::classify(&candidate.url) == Transport::Data {
        CandidateReason::Data
    } else {
        candidate.reason
    }
}

/// Fetches the best available bytes for one image, falling back to loading the
/// linked page in a hidden tab when no candidate works.
pub(crate) async fn fetch<H: PageHost>(
    ctx: &FetchContext<H>,
    descriptor: &ImageDescriptor,
    candidates: &[Candidate],
    mode: FetchMode,
    tab: Option<TabId>,
) -> FetchOutcome {
    let mut outcome = match mode {
        FetchMode::Normal => fetch_first(ctx, candidates, tab).await,
        FetchMode::HighRes => fetch_largest(ctx, candidates, tab).await,
    };
    if outcome.asset.is_some() {
        return outcome;
    }

    if let Some(href) = descriptor
        .href()
        .filter(|href| transport::classify(href) == Transport::Http)
        .filter(|href| !looks_like_image_link(href))
    {
        match page_fallback(&ctx.host, href, ctx.config.page_fallback_timeout).await {
            Ok((url, bytes)) => {
                debug!(href = %href, url = %url, size = bytes.len(), "Page fallback found an image");
                outcome.asset = Some(FetchedAsset {
                    url,
                    reason: CandidateReason::PageFallback,
                    bytes,
                });
            }
            Err(e) => {
                debug!(href = %href, error = %e, "Page fallback failed");
                outcome.failures.push(e);
            }
        }
    }
    outcome
}

async fn fetch_first<H: PageHost>(
    ctx: &FetchContext<H>,
    candidates: &[Candidate],
    tab: Option<TabId>,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    for candidate in candidates {
        match transport::acquire(&ctx.client, &ctx.host, tab, &candidate.url).await {
            Ok(bytes) => {
                outcome.asset = Some(FetchedAsset {
                    url: candidate.url.clone(),
                    reason: reason_for(candidate),
                    bytes,
                });
                break;
            }
            Err(e) => {
                debug!(url = %candidate.url, error = %e, "Candidate failed");
                outcome.failures.push(e);
            }
        }
    }
    outcome
}

async fn fetch_largest<H: PageHost>(
    ctx: &FetchContext<H>,
    candidates: &[Candidate],
    tab: Option<TabId>,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    let mut pending: FuturesUnordered<_> = candidates
        .iter()
        .enumerate()
        .map(|(rank, candidate)| async move {
            let result = transport::acquire(&ctx.client, &ctx.host, tab, &candidate.url).await;
            (rank, result)
        })
        .collect();

    let mut best: Option<(usize, Vec<u8>)> = None;
    while let Some((rank, result)) = pending.next().await {
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(url = %candidates[rank].url, error = %e, "Candidate failed");
                outcome.failures.push(e);
                continue;
            }
        };
        let large_enough = bytes.len() > ctx.config.large_enough_bytes;
        let better = best.as_ref().is_none_or(|(best_rank, best_bytes)| {
            bytes.len() > best_bytes.len() || (bytes.len() == best_bytes.len() && rank < *best_rank)
        });
        if better {
            best = Some((rank, bytes));
        }
        if large_enough {
            debug!(url = %candidates[rank].url, "Large enough, not waiting for the rest");
            break;
        }
    }

    outcome.asset = best.map(|(rank, bytes)| FetchedAsset {
        url: candidates[rank].url.clone(),
        reason: reason_for(&candidates[rank]),
        bytes,
    });
    outcome
}

/// Opens `url` in a hidden tab, lets the page pick and fetch its best image, and
/// closes the tab again however that went.
pub(crate) async fn page_fallback<H: PageHost>(
    host: &H,
    url: &str,
    limit: Duration,
) -> Result<(String, Vec<u8>), TransportError> {
    let deadline = Instant::now() + limit;
    let tab = timeout_at(deadline, host.open_tab(url))
        .await
        .map_err(|_| HostError::Timeout(limit))??;

    let outcome = timeout_at(deadline, async {
        host.wait_loaded(tab).await?;
        host.execute(tab, PageScript::CollectAndFetch).await
    })
    .await;

    if let Err(e) = host.close_tab(tab).await {
        warn!(tab = tab.0, error = %e, "Failed to close fallback tab");
    }

    match outcome {
        Err(_) => Err(HostError::Timeout(limit).into()),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(ScriptOutput::Fetched { url, bytes })) if !bytes.is_empty() => Ok((url, bytes)),
        Ok(Ok(_)) => Err(HostError::Script("page held no downloadable image".to_string()).into()),
    }
}
