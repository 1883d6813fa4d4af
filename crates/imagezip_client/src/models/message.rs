// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use super::candidate::CandidateReason;
use super::page::PageData;

/// Messages accepted from the popup.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "camelCase")]
pub(crate) enum Request {
    DownloadImages { data: PageData },
}

/// Pushed after every finished batch.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "action", rename = "downloadProgress")]
pub(crate) struct ProgressEvent {
    pub current: usize,
    pub total: usize,
}

/// What happened to a single descriptor.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Diagnostic {
    pub index: usize,
    pub orig_url: String,
    pub chosen_url: Option<String>,
    /// Bytes archived, -1 when nothing was fetched.
    pub chosen_size: i64,
    pub reason: Option<CandidateReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Diagnostic {
    pub(crate) fn pending(index: usize, orig_url: &str) -> Self {
        Self {
            index,
            orig_url: orig_url.to_string(),
            chosen_url: None,
            chosen_size: -1,
            reason: None,
            error: None,
        }
    }
}

/// Reply to a `downloadImages` request.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DownloadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improved_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Vec<Diagnostic>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadResponse {
    pub(crate) fn succeeded(downloaded_count: usize, total_count: usize) -> Self {
        Self {
            success: true,
            downloaded_count: Some(downloaded_count),
            total_count: Some(total_count),
            improved_count: None,
            diagnostics: None,
            error: None,
        }
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            downloaded_count: None,
            total_count: None,
            improved_count: None,
            diagnostics: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_is_tagged_by_action() {
        let raw = json!({
            "action": "downloadImages",
            "data": {"images": [{"url": "https://e.com/a.jpg"}], "title": "t"}
        });
        let Request::DownloadImages { data } = serde_json::from_value(raw).expect("request");
        assert_eq!(data.images[0].url, "https://e.com/a.jpg");
    }

    #[test]
    fn responses_serialize_to_wire_shape() {
        let mut ok = DownloadResponse::succeeded(2, 3);
        ok.improved_count = Some(1);
        assert_eq!(
            serde_json::to_value(&ok).expect("json"),
            json!({"success": true, "downloadedCount": 2, "totalCount": 3, "improvedCount": 1})
        );
        assert_eq!(
            serde_json::to_value(DownloadResponse::failed("boom")).expect("json"),
            json!({"success": false, "error": "boom"})
        );
        assert_eq!(
            serde_json::to_value(ProgressEvent { current: 3, total: 9 }).expect("json"),
            json!({"action": "downloadProgress", "current": 3, "total": 9})
        );
    }

    #[test]
    fn diagnostic_reason_is_kebab_case() {
        let mut diag = Diagnostic::pending(0, "https://e.com/a.jpg");
        diag.reason = Some(CandidateReason::NoQuerySize);
        let value = serde_json::to_value(diag).expect("json");
        assert_eq!(value["reason"], "no-query-size");
        assert_eq!(value["chosenSize"], -1);
        assert!(value.get("error").is_none());
    }
}
