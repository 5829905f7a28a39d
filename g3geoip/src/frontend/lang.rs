/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;

use g3_geoip_dataset::LocalizedNames;

pub(super) const DEFAULT_LANGUAGE: &str = "en";

struct LanguageRange<'a> {
    tag: &'a str,
    quality: f32,
}

impl<'a> LanguageRange<'a> {
    fn parse(s: &'a str) -> Option<Self> {
        let mut parts = s.split(';');
        let tag = parts.next()?.trim();
        if tag.is_empty() {
            return None;
        }
        let mut quality = 1.0;
        for p in parts {
            if let Some((k, v)) = p.split_once('=')
                && k.trim().eq_ignore_ascii_case("q")
            {
                quality = f32::from_str(v.trim()).ok()?;
            }
        }
        if !(0.0..=1.0).contains(&quality) {
            return None;
        }
        Some(LanguageRange { tag, quality })
    }

    fn base(&self) -> String {
        let primary = self.tag.split(['-', '_']).next().unwrap_or_default();
        primary.to_ascii_lowercase()
    }
}

/// Pick the language for localized names from an `Accept-Language` value.
///
/// Ranges are tried by quality, highest first, and the first one whose base
/// language has a name in `names` wins. Falls back to [`DEFAULT_LANGUAGE`].
pub(super) fn negotiate(header: &str, names: &LocalizedNames) -> String {
    let mut ranges: Vec<LanguageRange> = header.split(',').filter_map(LanguageRange::parse).collect();
    ranges.sort_by(|a, b| b.quality.total_cmp(&a.quality));

    for range in ranges {
        if range.tag == "*" || range.quality == 0.0 {
            continue;
        }
        let base = range.base();
        if names.contains_key(&base) {
            return base;
        }
    }
    DEFAULT_LANGUAGE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(langs: &[(&str, &str)]) -> LocalizedNames {
        langs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn pick_language() {
        let n = names(&[
            ("en", "Romania"),
            ("de", "Rumänien"),
            ("ro", "România"),
            ("fr", "Roumanie"),
        ]);
        assert_eq!(negotiate("de", &n), "de");
        assert_eq!(negotiate("de-DE", &n), "de");
        assert_eq!(negotiate("de-DE, en", &n), "de");
        assert_eq!(negotiate("en-US, de-DE", &n), "en");
        assert_eq!(
            negotiate("fr-CH, fr;q=0.9, en;q=0.8, de;q=0.7, *;q=0.5", &n),
            "fr"
        );
        assert_eq!(
            negotiate("en;q=0.1, de;q=0.8, fr;q=0.7, *;q=0.5", &n),
            "de"
        );
    }

    #[test]
    fn fallback() {
        let n = names(&[("en", "Romania"), ("de", "Rumänien")]);
        assert_eq!(
            negotiate("fr-CH, fr;q=0.9, en;q=0.8, de;q=0.7, *;q=0.5", &n),
            "en"
        );

        let n = LocalizedNames::new();
        assert_eq!(
            negotiate("fr-CH, fr;q=0.9, en;q=0.8, de;q=0.7, *;q=0.5", &n),
            "en"
        );
        assert_eq!(negotiate("", &n), "en");
    }

    #[test]
    fn malformed_ranges() {
        let n = names(&[("en", "Romania"), ("de", "Rumänien")]);
        assert_eq!(negotiate("de;q=abc, en;q=0.2", &n), "en");
        assert_eq!(negotiate("de;q=2", &n), "en");
        assert_eq!(negotiate(" , ;q=1", &n), "en");
    }
}
