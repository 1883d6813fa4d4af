// SPDX-License-Identifier: Apache-2.0

//! Image discovery over page markup. These run wherever a page is available: on
//! markup fetched for `href` resolution, or as the script executed in a hidden tab.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("img selector"));
static OG_IMAGE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[property="og:image"], meta[name="og:image"]"#)
        .expect("og:image selector")
});
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));

static DIRECT_IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(jpe?g|png|webp|gif|avif|bmp|svg)(\?|#|$)").expect("image link regex")
});

/// True when `url` names an image file rather than a page.
pub(crate) fn looks_like_image_link(url: &str) -> bool {
    DIRECT_IMAGE_LINK.is_match(url)
}

/// Raw `src` value of every `<img>` in document order.
pub(crate) fn extract_img_sources(markup: &str) -> Vec<String> {
    let document = Html::parse_document(markup);
    document
        .select(&IMG_SELECTOR)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(str::to_string)
        .collect()
}

/// Picks the entry with the largest width (`800w`) or density (`2x`) descriptor.
/// Entries without a descriptor count as `1x`.
pub(crate) fn best_srcset_entry(srcset: &str) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for chunk in srcset.split(',') {
        let mut bits = chunk.split_whitespace();
        let Some(url) = bits.next() else {
            continue;
        };
        let score = match bits.next().map(str::to_ascii_lowercase) {
            Some(token) if token.ends_with('w') => token
                .trim_end_matches('w')
                .parse::<f64>()
                .unwrap_or(1.0),
            Some(token) if token.ends_with('x') => {
                token.trim_end_matches('x').parse::<f64>().unwrap_or(1.0)
            }
            _ => 1.0,
        };
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((url, score));
        }
    }
    best.map(|(url, _)| url.to_string())
}

fn is_hidden(img: &ElementRef<'_>) -> bool {
    if img.value().attr("hidden").is_some() {
        return true;
    }
    img.value()
        .attr("style")
        .map(|style| {
            let compact: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            compact.contains("display:none") || compact.contains("visibility:hidden")
        })
        .unwrap_or(false)
}

fn absolutize(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    let joined = base.join(raw).ok()?;
    match joined.scheme() {
        "http" | "https" | "data" | "blob" => Some(joined.to_string()),
        _ => None,
    }
}

/// Every image a viewer of the page could see, longest URL first.
///
/// Longer URLs tend to carry the more specific (and usually larger) rendition, so
/// ties in length keep document order. Inline `data:` and `blob:` sources come
/// after every http(s) URL, since lazy-load placeholders are long inline SVGs.
pub(crate) fn collect_page_images(markup: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(markup);
    let mut found: Vec<String> = Vec::new();

    if let Some(og) = document
        .select(&OG_IMAGE_SELECTOR)
        .filter_map(|meta| meta.value().attr("content"))
        .find_map(|content| absolutize(content, &base))
    {
        found.push(og);
    }

    for img in document.select(&IMG_SELECTOR) {
        if is_hidden(&img) {
            continue;
        }
        if let Some(src) = img.value().attr("src").and_then(|s| absolutize(s, &base)) {
            found.push(src);
        }
        if let Some(best) = img
            .value()
            .attr("srcset")
            .and_then(best_srcset_entry)
            .and_then(|s| absolutize(&s, &base))
        {
            found.push(best);
        }
    }

    for anchor in document.select(&ANCHOR_SELECTOR) {
        if let Some(href) = anchor
            .value()
            .attr("href")
            .filter(|href| looks_like_image_link(href))
            .and_then(|href| absolutize(href, &base))
        {
            found.push(href);
        }
    }

    let mut seen = HashSet::new();
    found.retain(|url| seen.insert(url.clone()));
    found.sort_by_key(|url| (!is_network_url(url), Reverse(url.len())));
    found
}

fn is_network_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
