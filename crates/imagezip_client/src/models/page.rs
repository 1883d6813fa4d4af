// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// One logical image scraped from a page.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageDescriptor {
    /// The source the page actually displays.
    #[serde(default)]
    pub url: String,
    /// Link target wrapping the image, either an image itself or a page showing it.
    #[serde(default)]
    pub href: Option<String>,
    /// Widest `srcset` entry, already resolved by the scraper.
    #[serde(default)]
    pub srcset_best: Option<String>,
    /// Suggested file name, usually the `alt` text.
    #[serde(default)]
    pub filename: Option<String>,
    /// Preview URL shown in the popup; never fetched here.
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl ImageDescriptor {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub(crate) fn href(&self) -> Option<&str> {
        self.href.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }

    pub(crate) fn srcset_best(&self) -> Option<&str> {
        self.srcset_best
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Everything the popup sends along with a download request.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageData {
    #[serde(default)]
    pub images: Vec<ImageDescriptor>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub zip_name: Option<String>,
    #[serde(default)]
    pub high_res: Option<bool>,
    /// Tab the images were scraped from; needed to read `blob:` URLs.
    #[serde(default)]
    pub tab_id: Option<i64>,
}

impl PageData {
    pub(crate) fn high_res(&self) -> bool {
        self.high_res.unwrap_or(false)
    }
}
