// SPDX-License-Identifier: Apache-2.0

//! Saves every image as its own file instead of bundling an archive.

use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::FetchConfig;
use crate::error::DownloadError;
use crate::filename::entry_name;
use crate::host::{DownloadSource, DownloadState, DownloadTarget};
use crate::models::candidate::CandidateReason;
use crate::models::message::{Diagnostic, ProgressEvent};
use crate::models::page::PageData;
use crate::resolver;

#[derive(Debug, Clone)]
pub(crate) struct DirectSummary {
    pub downloaded: usize,
    pub total: usize,
    /// Images saved from a URL other than the one the page displayed.
    pub improved: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Hands candidates to the download target one at a time; a download that neither
/// completes nor fails within the watchdog is cancelled and the next one is tried.
pub(crate) async fn download_direct<T, F>(
    config: &FetchConfig,
    target: &T,
    page: &PageData,
    mut progress: F,
) -> Result<DirectSummary, DownloadError>
where
    T: DownloadTarget,
    F: FnMut(ProgressEvent),
{
    if page.images.is_empty() {
        return Err(DownloadError::NoImages);
    }
    let total = page.images.len();
    let mut downloaded = 0;
    let mut diagnostics = Vec::with_capacity(total);
    let mut reasons: Vec<String> = Vec::new();

    for (index, image) in page.images.iter().enumerate() {
        let mut diag = Diagnostic::pending(index, &image.url);
        let candidates = resolver::resolve_candidates(image, config.max_candidates);

        for candidate in &candidates {
            let filename = entry_name(image.filename.as_deref(), index, &candidate.url);
            let id = match target
                .start(DownloadSource::Url(candidate.url.clone()), &filename)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    diag.error = Some(e.to_string());
                    continue;
                }
            };
            match timeout(config.direct_download_timeout, target.wait(id)).await {
                Ok(DownloadState::Complete { path }) => {
                    debug!(url = %candidate.url, path = %path.display(), "Downloaded");
                    diag.chosen_url = Some(candidate.url.clone());
                    diag.reason = Some(candidate.reason);
                    diag.chosen_size = tokio::fs::metadata(&path)
                        .await
                        .map(|m| m.len() as i64)
                        .unwrap_or(-1);
                    diag.error = None;
                    break;
                }
                Ok(DownloadState::Interrupted(reason)) => {
                    debug!(url = %candidate.url, reason = %reason, "Download interrupted");
                    diag.error = Some(reason);
                }
                Err(_) => {
                    target.cancel(id).await;
                    diag.error = Some(format!(
                        "download timed out after {:?}",
                        config.direct_download_timeout
                    ));
                }
            }
        }

        if diag.chosen_url.is_some() {
            downloaded += 1;
        } else {
            let reason = diag
                .error
                .clone()
                .unwrap_or_else(|| "no candidate URL".to_string());
            if !reasons.contains(&reason) {
                reasons.push(reason);
            }
        }
        diagnostics.push(diag);
        progress(ProgressEvent {
            current: index + 1,
            total,
        });
    }

    if downloaded == 0 {
        reasons.truncate(5);
        return Err(DownloadError::NothingDownloaded { reasons });
    }
    let improved = diagnostics
        .iter()
        .filter(|d| d.reason.is_some_and(|r| r != CandidateReason::Base))
        .count();
    info!(downloaded, total, improved, "Direct downloads finished");
    Ok(DirectSummary {
        downloaded,
        total,
        improved,
        diagnostics,
    })
}
