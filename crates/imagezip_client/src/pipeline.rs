// SPDX-License-Identifier: Apache-2.0

//! Resolve, fetch in fixed-size batches, and pack everything into one archive.

use std::path::PathBuf;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::archive;
use crate::error::DownloadError;
use crate::fetcher::{self, FetchContext, FetchMode};
use crate::filename::{UniqueNames, archive_name, entry_name};
use crate::host::{DownloadSource, DownloadState, DownloadTarget, PageHost, TabId};
use crate::models::message::{Diagnostic, DownloadResponse, ProgressEvent, Request};
use crate::models::page::{ImageDescriptor, PageData};
use crate::resolver;

const MAX_REPORTED_REASONS: usize = 5;

/// A finished archive and what went into it.
#[derive(Debug, Clone)]
pub(crate) struct Bundle {
    pub archive_name: String,
    pub bytes: Vec<u8>,
    pub downloaded: usize,
    pub total: usize,
    pub improved: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of one descriptor, before it is merged into the run.
struct ImageResult {
    entry: Option<(String, Vec<u8>)>,
    improved: bool,
    diagnostic: Diagnostic,
    failure_reasons: Vec<String>,
}

/// Everything accumulated so far; each batch consumes it and hands back the next one.
#[derive(Default)]
struct BatchState {
    entries: Vec<(String, Vec<u8>)>,
    names: UniqueNames,
    diagnostics: Vec<Diagnostic>,
    improved: usize,
    failure_reasons: Vec<String>,
    processed: usize,
}

impl BatchState {
    /// Merges a batch's results in input order, whatever order they finished in.
    fn absorb(mut self, results: Vec<ImageResult>) -> Self {
        for result in results {
            self.processed += 1;
            if let Some((name, bytes)) = result.entry {
                let name = self.names.claim(&name);
                self.entries.push((name, bytes));
                if result.improved {
                    self.improved += 1;
                }
            }
            for reason in result.failure_reasons {
                if !self.failure_reasons.contains(&reason) {
                    self.failure_reasons.push(reason);
                }
            }
            self.diagnostics.push(result.diagnostic);
        }
        self
    }
}

async fn process_image<H: PageHost>(
    ctx: &FetchContext<H>,
    index: usize,
    descriptor: &ImageDescriptor,
    mode: FetchMode,
    tab: Option<TabId>,
) -> ImageResult {
    let candidates = match mode {
        FetchMode::Normal => resolver::resolve_candidates(descriptor, ctx.config.max_candidates),
        FetchMode::HighRes => {
            resolver::resolve_high_res(&ctx.client, descriptor, ctx.config.max_candidates).await
        }
    };
    debug!(index, candidates = candidates.len(), "Resolved candidates");

    let outcome = fetcher::fetch(ctx, descriptor, &candidates, mode, tab).await;
    let failure_reasons: Vec<String> = outcome.failures.iter().map(|e| e.summary()).collect();
    let mut diagnostic = Diagnostic::pending(index, &descriptor.url);

    match outcome.asset {
        Some(asset) => {
            let name = entry_name(descriptor.filename.as_deref(), index, &asset.url);
            let improved = asset.url != descriptor.url.trim();
            diagnostic.chosen_url = Some(asset.url);
            diagnostic.chosen_size = asset.bytes.len() as i64;
            diagnostic.reason = Some(asset.reason);
            ImageResult {
                entry: Some((name, asset.bytes)),
                improved,
                diagnostic,
                failure_reasons,
            }
        }
        None => {
            diagnostic.error = Some(
                failure_reasons
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "no candidate URL".to_string()),
            );
            warn!(index, url = %descriptor.url, "Image could not be downloaded");
            ImageResult {
                entry: None,
                improved: false,
                diagnostic,
                failure_reasons: if failure_reasons.is_empty() {
                    vec!["no candidate URL".to_string()]
                } else {
                    failure_reasons
                },
            }
        }
    }
}

/// Downloads every image of `page` and packs the successes into one archive.
///
/// `progress` is called once per finished batch.
pub(crate) async fn download_images<H, F>(
    ctx: &FetchContext<H>,
    page: &PageData,
    mut progress: F,
) -> Result<Bundle, DownloadError>
where
    H: PageHost,
    F: FnMut(ProgressEvent),
{
    if page.images.is_empty() {
        return Err(DownloadError::NoImages);
    }
    let total = page.images.len();
    let mode = if page.high_res() {
        FetchMode::HighRes
    } else {
        FetchMode::Normal
    };
    let tab = page.tab_id.map(TabId);
    let batch_size = ctx.config.batch_size();
    info!(total, ?mode, batch_size, "Downloading images");

    let mut state = BatchState::default();
    for (batch_index, batch) in page.images.chunks(batch_size).enumerate() {
        let first = batch_index * batch_size;
        let results = join_all(
            batch
                .iter()
                .enumerate()
                .map(|(offset, descriptor)| process_image(ctx, first + offset, descriptor, mode, tab)),
        )
        .await;
        state = state.absorb(results);
        progress(ProgressEvent {
            current: state.processed,
            total,
        });
    }

    if state.entries.is_empty() {
        let mut reasons = state.failure_reasons;
        reasons.truncate(MAX_REPORTED_REASONS);
        return Err(DownloadError::NothingDownloaded { reasons });
    }

    let bytes = archive::build(
        state
            .entries
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice())),
    )?;
    let downloaded = state.entries.len();
    info!(downloaded, total, size = bytes.len(), "Archive built");

    Ok(Bundle {
        archive_name: archive_name(page.zip_name.as_deref(), &page.title),
        bytes,
        downloaded,
        total,
        improved: state.improved,
        diagnostics: state.diagnostics,
    })
}

/// Hands the archive to the host's download capability and waits for it to land.
pub(crate) async fn publish<T: DownloadTarget>(
    target: &T,
    bundle: &Bundle,
) -> Result<PathBuf, DownloadError> {
    let id = target
        .start(DownloadSource::Bytes(bundle.bytes.clone()), &bundle.archive_name)
        .await
        .map_err(|e| DownloadError::Publish(e.to_string()))?;
    match target.wait(id).await {
        DownloadState::Complete { path } => Ok(path),
        DownloadState::Interrupted(reason) => Err(DownloadError::Publish(reason)),
    }
}

/// Answers one popup message. Every failure is reported in the response.
pub(crate) async fn handle_request<H, T, F>(
    ctx: &FetchContext<H>,
    target: &T,
    request: Request,
    progress: F,
) -> DownloadResponse
where
    H: PageHost,
    T: DownloadTarget,
    F: FnMut(ProgressEvent),
{
    let Request::DownloadImages { data } = request;
    let bundle = match download_images(ctx, &data, progress).await {
        Ok(bundle) => bundle,
        Err(e) => return DownloadResponse::failed(e.to_string()),
    };
    if let Err(e) = publish(target, &bundle).await {
        return DownloadResponse::failed(e.to_string());
    }

    let mut response = DownloadResponse::succeeded(bundle.downloaded, bundle.total);
    if data.high_res() {
        response.improved_count = Some(bundle.improved);
    }
    if ctx.config.diagnostics {
        response.diagnostics = Some(bundle.diagnostics);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::error::HostError;
    use crate::fetcher::tests::ScriptedHost;
    use crate::host::{DownloadId, ScriptOutput};
    use std::io::{Cursor, Read};
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(batch_size: usize) -> FetchContext<ScriptedHost> {
        let config = FetchConfig {
            batch_size,
            ..FetchConfig::default()
        };
        FetchContext::new(
            config,
            reqwest::Client::new(),
            ScriptedHost::returning(Ok(ScriptOutput::Nothing)),
        )
    }

    async fn serve(server: &MockServer, at: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(template)
            .mount(server)
            .await;
    }

    fn page(images: Vec<ImageDescriptor>) -> PageData {
        PageData {
            images,
            title: "Test page".to_string(),
            ..PageData::default()
        }
    }

    fn entry_names(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("zip");
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).expect("entry");
                let mut data = Vec::new();
                file.read_to_end(&mut data).expect("read");
                (file.name().to_string(), data)
            })
            .collect()
    }

    /// Keeps what it was given in memory.
    #[derive(Default)]
    struct MemoryTarget {
        saved: Mutex<Vec<(String, Vec<u8>)>>,
        reject: Option<String>,
    }

    impl DownloadTarget for MemoryTarget {
        async fn start(&self, source: DownloadSource, filename: &str) -> Result<DownloadId, HostError> {
            if let Some(reason) = &self.reject {
                return Err(HostError::Download(reason.clone()));
            }
            let DownloadSource::Bytes(bytes) = source else {
                return Err(HostError::Download("expected bytes".to_string()));
            };
            let mut saved = self.saved.lock().expect("saved lock");
            saved.push((filename.to_string(), bytes));
            Ok(DownloadId(saved.len() as u64))
        }

        async fn wait(&self, id: DownloadId) -> DownloadState {
            DownloadState::Complete {
                path: PathBuf::from(format!("/downloads/{}", id.0)),
            }
        }

        async fn cancel(&self, _id: DownloadId) {}
    }

    #[tokio::test]
    async fn archive_order_follows_input_not_completion() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/a.jpg",
            ResponseTemplate::new(200)
                .set_body_bytes(b"A".to_vec())
                .set_delay(Duration::from_millis(300)),
        )
        .await;
        serve(&server, "/b.jpg", ResponseTemplate::new(200).set_body_bytes(b"B".to_vec())).await;
        serve(&server, "/c.jpg", ResponseTemplate::new(200).set_body_bytes(b"C".to_vec())).await;

        let ctx = context(2);
        let images = ["a", "b", "c"]
            .iter()
            .map(|n| ImageDescriptor {
                filename: Some(n.to_string()),
                ..ImageDescriptor::new(format!("{}/{n}.jpg", server.uri()))
            })
            .collect();
        let mut events = Vec::new();
        let bundle = download_images(&ctx, &page(images), |e| events.push(e))
            .await
            .expect("bundle");

        assert_eq!(
            entry_names(bundle.bytes),
            vec![
                ("a.jpg".to_string(), b"A".to_vec()),
                ("b.jpg".to_string(), b"B".to_vec()),
                ("c.jpg".to_string(), b"C".to_vec()),
            ]
        );
        assert_eq!(
            events,
            vec![
                ProgressEvent { current: 2, total: 3 },
                ProgressEvent { current: 3, total: 3 },
            ]
        );
        assert_eq!(bundle.archive_name, "Test_page.zip");
    }

    #[tokio::test]
    async fn failed_images_are_dropped_but_counted() {
        let server = MockServer::start().await;
        serve(&server, "/ok.png", ResponseTemplate::new(200).set_body_bytes(b"png".to_vec())).await;
        serve(&server, "/gone.png", ResponseTemplate::new(404)).await;

        let ctx = context(3);
        let images = vec![
            ImageDescriptor::new(format!("{}/gone.png", server.uri())),
            ImageDescriptor::new(format!("{}/ok.png", server.uri())),
        ];
        let bundle = download_images(&ctx, &page(images), |_| {}).await.expect("bundle");

        assert_eq!(bundle.downloaded, 1);
        assert_eq!(bundle.total, 2);
        assert_eq!(bundle.diagnostics.len(), 2);
        assert_eq!(bundle.diagnostics[0].chosen_size, -1);
        assert_eq!(bundle.diagnostics[0].error.as_deref(), Some("HTTP 404"));
        assert_eq!(bundle.diagnostics[1].chosen_size, 3);
        assert_eq!(
            entry_names(bundle.bytes),
            vec![("image_2.png".to_string(), b"png".to_vec())]
        );
    }

    #[tokio::test]
    async fn colliding_names_get_suffixes() {
        let server = MockServer::start().await;
        serve(&server, "/1.jpg", ResponseTemplate::new(200).set_body_bytes(b"1".to_vec())).await;
        serve(&server, "/2.jpg", ResponseTemplate::new(200).set_body_bytes(b"2".to_vec())).await;

        let ctx = context(3);
        let images = ["1", "2"]
            .iter()
            .map(|n| ImageDescriptor {
                filename: Some("same name".to_string()),
                ..ImageDescriptor::new(format!("{}/{n}.jpg", server.uri()))
            })
            .collect();
        let bundle = download_images(&ctx, &page(images), |_| {}).await.expect("bundle");
        let names: Vec<String> = entry_names(bundle.bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["same_name.jpg", "same_name_2.jpg"]);
    }

    #[tokio::test]
    async fn everything_failing_is_an_error_not_an_empty_archive() {
        let server = MockServer::start().await;
        serve(&server, "/x.jpg", ResponseTemplate::new(500)).await;

        let ctx = context(3);
        let images = vec![
            ImageDescriptor::new(format!("{}/x.jpg", server.uri())),
            ImageDescriptor::new("ftp://e.com/y.jpg"),
            ImageDescriptor::new(""),
        ];
        let err = download_images(&ctx, &page(images), |_| {})
            .await
            .expect_err("nothing downloaded");
        match err {
            DownloadError::NothingDownloaded { reasons } => assert_eq!(
                reasons,
                vec!["HTTP 500", "unsupported URL scheme", "no candidate URL"]
            ),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn empty_page_is_rejected() {
        let ctx = context(3);
        let err = download_images(&ctx, &page(vec![]), |_| {}).await.expect_err("empty");
        assert!(matches!(err, DownloadError::NoImages));
    }

    #[tokio::test]
    async fn request_round_trip_reports_counts_and_saves_archive() {
        let server = MockServer::start().await;
        serve(&server, "/full.jpg", ResponseTemplate::new(200).set_body_bytes(vec![9u8; 64])).await;
        serve(&server, "/thumb.jpg", ResponseTemplate::new(200).set_body_bytes(vec![9u8; 8])).await;

        let mut ctx = context(3);
        ctx.config.diagnostics = true;
        let target = MemoryTarget::default();
        let mut data = page(vec![ImageDescriptor {
            srcset_best: Some(format!("{}/full.jpg", server.uri())),
            ..ImageDescriptor::new(format!("{}/thumb.jpg", server.uri()))
        }]);
        data.high_res = Some(true);
        data.zip_name = Some("my pics".to_string());

        let response =
            handle_request(&ctx, &target, Request::DownloadImages { data }, |_| {}).await;
        assert!(response.success, "{response:?}");
        assert_eq!(response.downloaded_count, Some(1));
        assert_eq!(response.total_count, Some(1));
        assert_eq!(response.improved_count, Some(1));
        let diagnostics = response.diagnostics.expect("diagnostics");
        assert_eq!(diagnostics[0].chosen_size, 64);

        let saved = target.saved.lock().expect("saved lock");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "my_pics.zip");
    }

    #[tokio::test]
    async fn publish_failure_is_reported_verbatim() {
        let server = MockServer::start().await;
        serve(&server, "/a.jpg", ResponseTemplate::new(200).set_body_bytes(b"a".to_vec())).await;

        let ctx = context(3);
        let target = MemoryTarget {
            reject: Some("disk full".to_string()),
            ..MemoryTarget::default()
        };
        let data = page(vec![ImageDescriptor::new(format!("{}/a.jpg", server.uri()))]);
        let response =
            handle_request(&ctx, &target, Request::DownloadImages { data }, |_| {}).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("download rejected: disk full"));
    }
}
