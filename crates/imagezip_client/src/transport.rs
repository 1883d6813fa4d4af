// SPDX-License-Identifier: Apache-2.0

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::{HostError, TransportError};
use crate::host::{PageHost, PageScript, ScriptOutput, TabId};

/// How the bytes behind a URL have to be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transport {
    Data,
    Blob,
    Http,
    Unsupported,
}

pub(crate) fn classify(url: &str) -> Transport {
    let scheme = url
        .trim_start()
        .split_once(':')
        .map(|(scheme, _)| scheme.to_ascii_lowercase());
    match scheme.as_deref() {
        Some("data") => Transport::Data,
        Some("blob") => Transport::Blob,
        Some("http") | Some("https") => Transport::Http,
        _ => Transport::Unsupported,
    }
}

/// Decodes `data:[<mediatype>][;base64],<payload>`. Non-base64 payloads are taken as-is.
pub(crate) fn decode_data_uri(url: &str) -> Result<Vec<u8>, TransportError> {
    let trimmed = url.trim();
    let rest = match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("data:") => &trimmed[5..],
        _ => return Err(TransportError::MalformedDataUri),
    };
    let (meta, payload) = rest
        .split_once(',')
        .ok_or(TransportError::MalformedDataUri)?;
    let is_base64 = meta
        .split(';')
        .any(|param| param.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(compact)?
    } else {
        payload.as_bytes().to_vec()
    };
    if bytes.is_empty() {
        return Err(TransportError::Empty("data URI".to_string()));
    }
    Ok(bytes)
}

/// GETs `url` with the shared client (and its cookies); anything but 2xx fails.
pub(crate) async fn fetch_http(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, TransportError> {
    let http_err = |source| TransportError::Http {
        url: url.to_string(),
        source,
    };
    let response = client.get(url).send().await.map_err(http_err)?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            url: url.to_string(),
            status,
        });
    }
    let bytes = response.bytes().await.map_err(http_err)?;
    if bytes.is_empty() {
        return Err(TransportError::Empty(url.to_string()));
    }
    Ok(bytes.to_vec())
}

/// Asks the page that created a `blob:` URL to read it for us.
pub(crate) async fn fetch_blob<H: PageHost>(
    host: &H,
    tab: Option<TabId>,
    url: &str,
) -> Result<Vec<u8>, TransportError> {
    let tab = tab.ok_or(HostError::NoLivePage)?;
    let output = host
        .execute(
            tab,
            PageScript::FetchBlob {
                url: url.to_string(),
            },
        )
        .await?;
    match output {
        ScriptOutput::Bytes(bytes) | ScriptOutput::Fetched { bytes, .. } if !bytes.is_empty() => {
            Ok(bytes)
        }
        _ => Err(TransportError::Empty(url.to_string())),
    }
}

/// Fetches one candidate through whichever transport its scheme needs.
pub(crate) async fn acquire<H: PageHost>(
    client: &reqwest::Client,
    host: &H,
    tab: Option<TabId>,
    url: &str,
) -> Result<Vec<u8>, TransportError> {
    match classify(url) {
        Transport::Data => decode_data_uri(url),
        Transport::Blob => fetch_blob(host, tab, url).await,
        Transport::Http => fetch_http(client, url).await,
        Transport::Unsupported => Err(TransportError::Unsupported(url.to_string())),
    }
}

impl TransportError {
    /// Short, URL-free description used when reporting why nothing downloaded.
    pub(crate) fn summary(&self) -> String {
        match self {
            TransportError::MalformedDataUri | TransportError::Base64(_) => {
                "malformed data URI".to_string()
            }
            TransportError::Http { source, .. } if source.is_timeout() => {
                "request timed out".to_string()
            }
            TransportError::Http { .. } => "network error".to_string(),
            TransportError::Status { status, .. } => format!("HTTP {}", status.as_u16()),
            TransportError::Empty(_) => "empty response".to_string(),
            TransportError::Unsupported(_) => "unsupported URL scheme".to_string(),
            TransportError::Host(HostError::LoadFailed { .. }) => "page failed to load".to_string(),
            TransportError::Host(e) => e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct BlobTab;

    impl PageHost for BlobTab {
        async fn open_tab(&self, _url: &str) -> Result<TabId, HostError> {
            Err(HostError::Script("not used".to_string()))
        }

        async fn wait_loaded(&self, _tab: TabId) -> Result<(), HostError> {
            Ok(())
        }

        async fn execute(&self, tab: TabId, script: PageScript) -> Result<ScriptOutput, HostError> {
            match script {
                PageScript::FetchBlob { url } if tab == TabId(3) && url.starts_with("blob:") => {
                    Ok(ScriptOutput::Bytes(b"blobby".to_vec()))
                }
                _ => Err(HostError::Script("fetch threw".to_string())),
            }
        }

        async fn close_tab(&self, _tab: TabId) -> Result<(), HostError> {
            Ok(())
        }
    }

    #[test]
    fn classifies_by_scheme() {
        assert_eq!(classify("data:image/png;base64,AA"), Transport::Data);
        assert_eq!(classify("BLOB:https://e.com/x"), Transport::Blob);
        assert_eq!(classify("https://e.com/a.jpg"), Transport::Http);
        assert_eq!(classify("http://e.com/a.jpg"), Transport::Http);
        assert_eq!(classify("ftp://e.com/a.jpg"), Transport::Unsupported);
        assert_eq!(classify("/relative.jpg"), Transport::Unsupported);
    }

    #[test]
    fn decodes_base64_and_plain_data_uris() {
        assert_eq!(
            decode_data_uri("data:image/png;base64,aGVs\nbG8=").expect("decode"),
            b"hello"
        );
        assert_eq!(decode_data_uri("data:,plain").expect("decode"), b"plain");
        assert!(matches!(
            decode_data_uri("data:image/png;base64"),
            Err(TransportError::MalformedDataUri)
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64,***"),
            Err(TransportError::Base64(_))
        ));
        assert!(decode_data_uri("data:image/png;base64,").is_err());
    }

    #[tokio::test]
    async fn http_non_success_is_a_candidate_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/denied.jpg"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        assert_eq!(
            fetch_http(&client, &format!("{}/ok.jpg", server.uri())).await.expect("ok"),
            vec![1, 2, 3]
        );
        let err = fetch_http(&client, &format!("{}/denied.jpg", server.uri()))
            .await
            .expect_err("403");
        assert_eq!(err.summary(), "HTTP 403");
    }

    #[tokio::test]
    async fn blobs_need_the_source_tab() {
        let client = reqwest::Client::new();
        let url = "blob:https://e.com/5f3e";
        assert_eq!(
            acquire(&client, &BlobTab, Some(TabId(3)), url).await.expect("blob"),
            b"blobby"
        );
        assert!(matches!(
            acquire(&client, &BlobTab, None, url).await,
            Err(TransportError::Host(HostError::NoLivePage))
        ));
        assert!(acquire(&client, &BlobTab, Some(TabId(4)), url).await.is_err());
    }
}
