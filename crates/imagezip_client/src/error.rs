// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::archive::ArchiveError;

/// Failures that end a whole download request.
#[derive(Debug, Error)]
pub(crate) enum DownloadError {
    #[error("no images found")]
    NoImages,

    #[error("{}", nothing_downloaded_message(.reasons))]
    NothingDownloaded { reasons: Vec<String> },

    #[error("failed to build archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("{0}")]
    Publish(String),
}

fn nothing_downloaded_message(reasons: &[String]) -> String {
    if reasons.is_empty() {
        "no image could be downloaded".to_string()
    } else {
        format!("no image could be downloaded ({})", reasons.join("; "))
    }
}

/// A single URL that could not be turned into bytes.
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("malformed data URI")]
    MalformedDataUri,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("'{url}' answered HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("'{0}' returned an empty body")]
    Empty(String),

    #[error("unsupported URL scheme in '{0}'")]
    Unsupported(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Failures reported by the browser-side capabilities.
#[derive(Debug, Error)]
pub(crate) enum HostError {
    #[error("no live page to run the script in")]
    NoLivePage,

    #[error("unknown tab {0}")]
    UnknownTab(i64),

    #[error("page '{url}' failed to load: {reason}")]
    LoadFailed { url: String, reason: String },

    #[error("script failed: {0}")]
    Script(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("download rejected: {0}")]
    Download(String),
}
