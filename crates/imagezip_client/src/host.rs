// SPDX-License-Identifier: Apache-2.0

//! Capabilities the download engine borrows from its surroundings: browser tabs
//! that can run page-side scripts, and somewhere to save finished downloads.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::error::HostError;
use crate::page_scan::collect_page_images;
use crate::transport::{self, Transport};

/// Identifies a browser tab, either the one the user scraped or one we opened.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TabId(pub i64);

/// Scripts the engine knows how to run inside a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PageScript {
    /// Read a `blob:` URL that only exists inside this page.
    FetchBlob { url: String },
    /// Gather every visible image, longest URL first, and fetch the first that loads.
    CollectAndFetch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScriptOutput {
    Bytes(Vec<u8>),
    Fetched { url: String, bytes: Vec<u8> },
    Nothing,
}

/// Tab lifecycle plus in-page script execution.
pub(crate) trait PageHost {
    /// Opens a background tab without focusing it.
    async fn open_tab(&self, url: &str) -> Result<TabId, HostError>;
    async fn wait_loaded(&self, tab: TabId) -> Result<(), HostError>;
    async fn execute(&self, tab: TabId, script: PageScript) -> Result<ScriptOutput, HostError>;
    async fn close_tab(&self, tab: TabId) -> Result<(), HostError>;
}

struct DetachedTab {
    url: String,
    markup: Option<String>,
}

/// Host for running outside a browser: a "tab" is a page fetched over HTTP and
/// scripts run against its markup. Blob URLs cannot be read this way.
pub(crate) struct DetachedHost {
    client: reqwest::Client,
    next_tab: AtomicI64,
    tabs: Mutex<HashMap<TabId, DetachedTab>>,
}

impl DetachedHost {
    pub(crate) fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            next_tab: AtomicI64::new(1),
            tabs: Mutex::new(HashMap::new()),
        }
    }

    async fn loaded_page(&self, tab: TabId) -> Result<(String, String), HostError> {
        let tabs = self.tabs.lock().await;
        let page = tabs.get(&tab).ok_or(HostError::UnknownTab(tab.0))?;
        match &page.markup {
            Some(markup) => Ok((page.url.clone(), markup.clone())),
            None => Err(HostError::NoLivePage),
        }
    }

    async fn collect_and_fetch(&self, page_url: &str, markup: &str) -> ScriptOutput {
        for url in collect_page_images(markup, page_url) {
            let fetched = match transport::classify(&url) {
                Transport::Data => transport::decode_data_uri(&url),
                Transport::Http => transport::fetch_http(&self.client, &url).await,
                Transport::Blob | Transport::Unsupported => continue,
            };
            match fetched {
                Ok(bytes) => return ScriptOutput::Fetched { url, bytes },
                Err(e) => debug!(url = %url, error = %e, "Page image failed"),
            }
        }
        ScriptOutput::Nothing
    }
}

impl PageHost for DetachedHost {
    async fn open_tab(&self, url: &str) -> Result<TabId, HostError> {
        let tab = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        self.tabs.lock().await.insert(
            tab,
            DetachedTab {
                url: url.to_string(),
                markup: None,
            },
        );
        debug!(tab = tab.0, url = %url, "Opened detached tab");
        Ok(tab)
    }

    async fn wait_loaded(&self, tab: TabId) -> Result<(), HostError> {
        let url = {
            let tabs = self.tabs.lock().await;
            tabs.get(&tab).ok_or(HostError::UnknownTab(tab.0))?.url.clone()
        };
        let load_failed = |reason: String| HostError::LoadFailed {
            url: url.clone(),
            reason,
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| load_failed(e.to_string()))?;
        let markup = response.text().await.map_err(|e| load_failed(e.to_string()))?;

        let mut tabs = self.tabs.lock().await;
        let page = tabs.get_mut(&tab).ok_or(HostError::UnknownTab(tab.0))?;
        page.markup = Some(markup);
        Ok(())
    }

    async fn execute(&self, tab: TabId, script: PageScript) -> Result<ScriptOutput, HostError> {
        match script {
            PageScript::FetchBlob { url } => {
                debug!(tab = tab.0, url = %url, "Blob URL needs a live page");
                Err(HostError::NoLivePage)
            }
            PageScript::CollectAndFetch => {
                let (url, markup) = self.loaded_page(tab).await?;
                Ok(self.collect_and_fetch(&url, &markup).await)
            }
        }
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        self.tabs
            .lock()
            .await
            .remove(&tab)
            .map(|_| ())
            .ok_or(HostError::UnknownTab(tab.0))
    }
}

/// Bytes already in hand, or a URL the target should fetch itself.
#[derive(Debug, Clone)]
pub(crate) enum DownloadSource {
    Bytes(Vec<u8>),
    Url(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DownloadId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DownloadState {
    Complete { path: PathBuf },
    Interrupted(String),
}

/// The host's "save this file" capability, with completion reported per download.
pub(crate) trait DownloadTarget {
    /// Starts saving without asking the user where.
    async fn start(&self, source: DownloadSource, filename: &str) -> Result<DownloadId, HostError>;
    async fn wait(&self, id: DownloadId) -> DownloadState;
    /// Abandons a download that is taking too long.
    async fn cancel(&self, id: DownloadId);
}

struct RunningDownload {
    task: Option<JoinHandle<Result<PathBuf, String>>>,
    abort: AbortHandle,
    path: PathBuf,
}

/// Saves downloads into one directory. Names already taken get a ` (n)` suffix.
pub(crate) struct DirectoryTarget {
    dir: PathBuf,
    client: reqwest::Client,
    next_id: AtomicU64,
    reserved: Mutex<HashSet<PathBuf>>,
    running: Mutex<HashMap<DownloadId, RunningDownload>>,
}

impl DirectoryTarget {
    pub(crate) fn new(dir: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            dir: dir.into(),
            client,
            next_id: AtomicU64::new(1),
            reserved: Mutex::new(HashSet::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    async fn reserve_path(&self, filename: &str) -> PathBuf {
        let mut reserved = self.reserved.lock().await;
        let (stem, ext) = match filename.rfind('.') {
            Some(dot) if dot > 0 => filename.split_at(dot),
            _ => (filename, ""),
        };
        let mut candidate = self.dir.join(filename);
        let mut n = 1;
        while reserved.contains(&candidate) || path_exists(&candidate).await {
            candidate = self.dir.join(format!("{stem} ({n}){ext}"));
            n += 1;
        }
        reserved.insert(candidate.clone());
        candidate
    }

    /// Frees the name of a download that never produced a file.
    async fn release_path(&self, path: &Path) {
        self.reserved.lock().await.remove(path);
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn save(
    client: reqwest::Client,
    source: DownloadSource,
    path: PathBuf,
) -> Result<PathBuf, String> {
    let bytes = match source {
        DownloadSource::Bytes(bytes) => bytes,
        DownloadSource::Url(url) => match transport::classify(&url) {
            Transport::Data => transport::decode_data_uri(&url),
            Transport::Http => transport::fetch_http(&client, &url).await,
            Transport::Blob | Transport::Unsupported => {
                Err(crate::error::TransportError::Unsupported(url.clone()))
            }
        }
        .map_err(|e| e.to_string())?,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create '{}': {e}", parent.display()))?;
    }
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| format!("cannot write '{}': {e}", path.display()))?;
    info!(path = %path.display(), size = bytes.len(), "Saved download");
    Ok(path)
}

impl DownloadTarget for DirectoryTarget {
    async fn start(&self, source: DownloadSource, filename: &str) -> Result<DownloadId, HostError> {
        if filename.trim().is_empty() {
            return Err(HostError::Download("empty file name".to_string()));
        }
        let path = self.reserve_path(filename).await;
        let id = DownloadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = tokio::spawn(save(self.client.clone(), source, path.clone()));
        let abort = task.abort_handle();
        self.running.lock().await.insert(
            id,
            RunningDownload {
                task: Some(task),
                abort,
                path,
            },
        );
        Ok(id)
    }

    async fn wait(&self, id: DownloadId) -> DownloadState {
        let task = {
            let mut running = self.running.lock().await;
            running.get_mut(&id).and_then(|d| d.task.take())
        };
        let Some(task) = task else {
            return DownloadState::Interrupted(format!("unknown download {}", id.0));
        };
        let state = match task.await {
            Ok(Ok(path)) => DownloadState::Complete { path },
            Ok(Err(reason)) => DownloadState::Interrupted(reason),
            Err(e) => DownloadState::Interrupted(e.to_string()),
        };
        let finished = self.running.lock().await.remove(&id);
        if let (Some(download), DownloadState::Interrupted(_)) = (finished, &state) {
            self.release_path(&download.path).await;
        }
        state
    }

    async fn cancel(&self, id: DownloadId) {
        let cancelled = self.running.lock().await.remove(&id);
        if let Some(download) = cancelled {
            download.abort.abort();
            self.release_path(&download.path).await;
        }
    }
}
