// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Why a URL was proposed for an image.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum CandidateReason {
    Base,
    HrefImage,
    Srcset,
    Href,
    NoQuerySize,
    StripDims,
    StripSuffixDims,
    Rewrite,
    HrefImg,
    /// Found by loading the linked page in a hidden tab.
    PageFallback,
    /// Inline `data:` payload.
    Data,
}

impl CandidateReason {
    /// Tie-break rank among equal weights; lower runs first.
    pub(crate) fn priority(self) -> u8 {
        match self {
            CandidateReason::Base => 1,
            CandidateReason::HrefImage => 2,
            CandidateReason::Srcset => 3,
            CandidateReason::Href => 4,
            CandidateReason::NoQuerySize => 5,
            CandidateReason::StripDims => 6,
            CandidateReason::StripSuffixDims => 7,
            CandidateReason::Rewrite => 8,
            CandidateReason::HrefImg => 9,
            CandidateReason::PageFallback => 10,
            CandidateReason::Data => 11,
        }
    }
}

/// A URL that might hold the full-size version of an image.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub url: String,
    pub reason: CandidateReason,
    pub weight: i32,
}

impl Candidate {
    pub(crate) fn new(url: impl Into<String>, reason: CandidateReason, weight: i32) -> Self {
        Self {
            url: url.into(),
            reason,
            weight,
        }
    }
}
