// SPDX-License-Identifier: Apache-2.0

//! Turns one scraped image into a ranked list of URLs worth trying.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::config::MAX_CANDIDATES;
use crate::models::candidate::{Candidate, CandidateReason};
use crate::models::page::ImageDescriptor;
use crate::page_scan::{extract_img_sources, looks_like_image_link};

const BASE_WEIGHT: i32 = 4;
const HREF_IMAGE_WEIGHT: i32 = 6;
const SRCSET_WEIGHT: i32 = 5;
const NO_QUERY_SIZE_WEIGHT: i32 = 4;
const HREF_PAGE_LARGE_WEIGHT: i32 = 6;
const HREF_PAGE_OTHER_WEIGHT: i32 = 2;

const SIZE_QUERY_KEYS: &[&str] = &["w", "h", "width", "height", "size", "quality", "q"];

/// A textual rewrite of the base URL that may reveal a larger rendition.
struct RewriteRule {
    pattern: &'static str,
    replacement: &'static str,
    reason: CandidateReason,
    weight: i32,
}

const REWRITE_RULES: &[RewriteRule] = &[
    // photo_640x800.jpg, photo-640x800.jpg, photo640x800.jpg
    RewriteRule {
        pattern: r"(?i)[_-]?\d{2,5}x\d{2,5}(\.[a-z]{2,5})([?#]|$)",
        replacement: "$1$2",
        reason: CandidateReason::StripDims,
        weight: 4,
    },
    // photo-640x800x.jpg, photo-640x800xc.jpg
    RewriteRule {
        pattern: r"(?i)[_-]\d{2,5}x\d{2,5}x[a-z0-9]*(\.[a-z]{2,5})([?#]|$)",
        replacement: "$1$2",
        reason: CandidateReason::StripSuffixDims,
        weight: 4,
    },
    RewriteRule {
        pattern: r"(?i)/thumbs?/",
        replacement: "/",
        reason: CandidateReason::Rewrite,
        weight: 3,
    },
    RewriteRule {
        pattern: r"(?i)/thumbnails?/",
        replacement: "/",
        reason: CandidateReason::Rewrite,
        weight: 3,
    },
    RewriteRule {
        pattern: r"(?i)/(small|preview|previews|lowres|low|mini)/",
        replacement: "/",
        reason: CandidateReason::Rewrite,
        weight: 3,
    },
    RewriteRule {
        pattern: r"(?i)[_-](thumb|thumbnail|small|preview|lowres|low|tn|sm)(\.[a-z]{2,5})([?#]|$)",
        replacement: "$2$3",
        reason: CandidateReason::Rewrite,
        weight: 3,
    },
];

static COMPILED_RULES: LazyLock<Vec<(Regex, &'static RewriteRule)>> = LazyLock::new(|| {
    REWRITE_RULES
        .iter()
        .map(|rule| (Regex::new(rule.pattern).expect("rewrite rule regex"), rule))
        .collect()
});

static LARGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)large|full|orig|hd|big").expect("large marker regex"));

fn is_http(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// The base URL without size and quality query parameters, if any were present.
fn strip_size_query(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    let kept: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(key, _)| !SIZE_QUERY_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)))
        .collect();
    if kept.len() == pairs.len() {
        return None;
    }

    parsed.set_query(None);
    if !kept.is_empty() {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in kept {
            serializer.append_pair(key, value);
        }
        parsed.set_query(Some(&serializer.finish()));
    }
    let stripped = parsed.to_string();
    (stripped != url).then_some(stripped)
}

/// Candidates derivable without touching the network, in generation order.
pub(crate) fn candidates_for(descriptor: &ImageDescriptor) -> Vec<Candidate> {
    let mut out = Vec::new();
    let url = descriptor.url.trim();

    if !url.is_empty() {
        out.push(Candidate::new(url, CandidateReason::Base, BASE_WEIGHT));
    }
    if let Some(href) = descriptor.href().filter(|href| looks_like_image_link(href)) {
        out.push(Candidate::new(href, CandidateReason::HrefImage, HREF_IMAGE_WEIGHT));
    }
    if let Some(srcset) = descriptor.srcset_best() {
        out.push(Candidate::new(srcset, CandidateReason::Srcset, SRCSET_WEIGHT));
    }
    if url.is_empty() || !is_http(url) {
        return out;
    }

    if let Some(stripped) = strip_size_query(url) {
        out.push(Candidate::new(
            stripped,
            CandidateReason::NoQuerySize,
            NO_QUERY_SIZE_WEIGHT,
        ));
    }
    for (regex, rule) in COMPILED_RULES.iter() {
        let rewritten = regex.replace(url, rule.replacement);
        if rewritten != url {
            out.push(Candidate::new(rewritten.into_owned(), rule.reason, rule.weight));
        }
    }
    out
}

/// Scores every `<img>` found on the page behind `href`.
pub(crate) fn page_candidates(href: &str, markup: &str) -> Vec<Candidate> {
    let Ok(base) = Url::parse(href) else {
        return Vec::new();
    };
    extract_img_sources(markup)
        .into_iter()
        .filter_map(|src| base.join(&src).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|u| {
            let url = u.to_string();
            let weight = if LARGE_MARKER.is_match(&url) {
                HREF_PAGE_LARGE_WEIGHT
            } else {
                HREF_PAGE_OTHER_WEIGHT
            };
            Candidate::new(url, CandidateReason::HrefImg, weight)
        })
        .collect()
}

/// Orders by weight (rule priority breaks ties, then generation order), drops
/// repeated URLs keeping the best-ranked one, and caps the list.
pub(crate) fn rank(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| a.reason.priority().cmp(&b.reason.priority()))
    });
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.url.clone()));
    candidates.truncate(limit);
    candidates
}

pub(crate) fn resolve_candidates(descriptor: &ImageDescriptor, limit: usize) -> Vec<Candidate> {
    rank(candidates_for(descriptor), limit)
}

/// Ranked, unique URLs for `descriptor`; never touches the network.
pub(crate) fn resolve(descriptor: &ImageDescriptor) -> Vec<String> {
    resolve_candidates(descriptor, MAX_CANDIDATES)
        .into_iter()
        .map(|c| c.url)
        .collect()
}

/// Like [`resolve_candidates`], but also looks inside the page `href` points to.
///
/// A failing page fetch only means fewer candidates.
pub(crate) async fn resolve_high_res(
    client: &reqwest::Client,
    descriptor: &ImageDescriptor,
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates = candidates_for(descriptor);

    if let Some(href) = descriptor
        .href()
        .filter(|href| !looks_like_image_link(href) && is_http(href))
    {
        match fetch_href(client, href).await {
            Ok(HrefBody::Image) => {
                candidates.push(Candidate::new(href, CandidateReason::Href, HREF_IMAGE_WEIGHT));
            }
            Ok(HrefBody::Markup(markup)) => {
                candidates.extend(page_candidates(href, &markup));
            }
            Err(e) => {
                debug!(href = %href, error = %e, "Could not inspect linked page");
            }
        }
    }

    rank(candidates, limit)
}

enum HrefBody {
    Image,
    Markup(String),
}

async fn fetch_href(client: &reqwest::Client, href: &str) -> Result<HrefBody, reqwest::Error> {
    let response = client.get(href).send().await?.error_for_status()?;
    let is_image = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false);
    if is_image {
        return Ok(HrefBody::Image);
    }
    Ok(HrefBody::Markup(response.text().await?))
}
