// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

pub(crate) const MAX_FILENAME_CHARS: usize = 120;
const DEFAULT_EXTENSION: &str = ".jpg";
const DEFAULT_ARCHIVE_STEM: &str = "Images_Page";

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".bmp", ".svg", ".tif", ".tiff",
];

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static PATH_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.([a-z0-9]{2,6})$").expect("extension regex"));

/// Replaces characters that are forbidden in file names, collapses whitespace runs
/// into a single `_` and caps the result at 120 characters.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    WHITESPACE_RUN
        .replace_all(&replaced, "_")
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect()
}

/// Extension (with the leading dot) of the URL's path, `.jpg` when there is none.
pub(crate) fn extract_extension(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return DEFAULT_EXTENSION.to_string();
    };
    let last_segment = parsed.path().rsplit('/').next().unwrap_or("");
    PATH_EXTENSION
        .captures(last_segment)
        .and_then(|caps| caps.get(1))
        .map(|ext| format!(".{}", ext.as_str()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn has_image_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Archive entry name for the image at `index` (zero-based) fetched from `chosen_url`.
pub(crate) fn entry_name(filename: Option<&str>, index: usize, chosen_url: &str) -> String {
    let stem = match filename.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => sanitize_filename(name),
        None => format!("image_{}", index + 1),
    };
    if has_image_extension(&stem) {
        stem
    } else {
        format!("{}{}", stem, extract_extension(chosen_url))
    }
}

/// Name of the output archive: the zip name when given, else the page title.
pub(crate) fn archive_name(zip_name: Option<&str>, title: &str) -> String {
    let raw = zip_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| title.trim());
    let mut stem = sanitize_filename(raw);
    if stem.to_ascii_lowercase().ends_with(".zip") {
        stem.truncate(stem.len() - 4);
    }
    if stem.is_empty() {
        stem = DEFAULT_ARCHIVE_STEM.to_string();
    }
    format!("{stem}.zip")
}

/// Hands out entry names, suffixing repeats with `_2`, `_3`, ... before the extension.
#[derive(Debug, Default)]
pub(crate) struct UniqueNames {
    seen: HashMap<String, usize>,
}

impl UniqueNames {
    pub(crate) fn claim(&mut self, name: &str) -> String {
        let key = name.to_lowercase();
        let Some(&taken) = self.seen.get(&key) else {
            self.seen.insert(key, 1);
            return name.to_string();
        };

        let (stem, ext) = match name.rfind('.') {
            Some(dot) if dot > 0 => name.split_at(dot),
            _ => (name, ""),
        };
        let mut count = taken;
        loop {
            count += 1;
            let candidate = format!("{stem}_{count}{ext}");
            let candidate_key = candidate.to_lowercase();
            if !self.seen.contains_key(&candidate_key) {
                self.seen.insert(key, count);
                self.seen.insert(candidate_key, 1);
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_forbidden_characters_and_whitespace() {
        let out = sanitize_filename("a<b>c:d\"e/f\\g|h?i*j   k\tl");
        assert_eq!(out, "a_b_c_d_e_f_g_h_i_j_k_l");
        for forbidden in ['<', '>', ':', '"', '/', '\\', '|', '?', '*', ' ', '\t'] {
            assert!(!out.contains(forbidden));
        }
    }

    #[test]
    fn sanitize_caps_length_on_char_boundaries() {
        let long = "é".repeat(300);
        let out = sanitize_filename(&long);
        assert_eq!(out.chars().count(), MAX_FILENAME_CHARS);
        assert!(sanitize_filename(&"x".repeat(500)).len() <= MAX_FILENAME_CHARS);
    }

    #[test]
    fn extension_comes_from_url_path_only() {
        assert_eq!(extract_extension("https://cdn.example.com/a/photo.PNG?w=20"), ".PNG");
        assert_eq!(extract_extension("https://example.com/img.webp#frag"), ".webp");
        assert_eq!(extract_extension("https://example.com/a.b/image"), ".jpg");
        assert_eq!(extract_extension("not a url"), ".jpg");
        assert_eq!(extract_extension("data:image/png;base64,AAAA"), ".jpg");
    }

    #[test]
    fn entry_name_defaults_to_one_based_index() {
        assert_eq!(entry_name(None, 0, "https://e.com/x.png"), "image_1.png");
        assert_eq!(entry_name(Some("  "), 4, "https://e.com/x"), "image_5.jpg");
        assert_eq!(entry_name(Some("My cat"), 0, "https://e.com/c.gif"), "My_cat.gif");
        assert_eq!(entry_name(Some("img_0.jpg"), 0, "https://e.com/c.png"), "img_0.jpg");
    }

    #[test]
    fn archive_name_prefers_zip_name_then_title() {
        assert_eq!(archive_name(Some("holiday pics"), "Title"), "holiday_pics.zip");
        assert_eq!(archive_name(None, "Gallery: day 1"), "Gallery__day_1.zip");
        assert_eq!(archive_name(Some("bundle.zip"), "t"), "bundle.zip");
        assert_eq!(archive_name(None, "   "), "Images_Page.zip");
    }

    #[test]
    fn unique_names_suffix_collisions() {
        let mut names = UniqueNames::default();
        assert_eq!(names.claim("photo.jpg"), "photo.jpg");
        assert_eq!(names.claim("photo.jpg"), "photo_2.jpg");
        assert_eq!(names.claim("PHOTO.jpg"), "PHOTO_3.jpg");
        assert_eq!(names.claim("photo_2.jpg"), "photo_2_2.jpg");
        assert_eq!(names.claim("README"), "README");
        assert_eq!(names.claim("README"), "README_2");
    }
}
