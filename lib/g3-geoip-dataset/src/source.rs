/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use url::Url;

/// Local cache file used for remote sources when none is configured.
pub const DEFAULT_CACHE_FILE: &str = "./db.gz";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatasetSource {
    Local(PathBuf),
    Remote { url: Url, cache_path: PathBuf },
}

impl DatasetSource {
    /// Build a source from a `--db` style string.
    ///
    /// Strings that parse as `http` or `https` URLs are remote sources cached at
    /// `cache_path` (or [`DEFAULT_CACHE_FILE`]), everything else is a local path.
    pub fn parse(s: &str, cache_path: Option<&Path>) -> Self {
        match Url::parse(s) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => DatasetSource::Remote {
                url,
                cache_path: cache_path
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE)),
            },
            _ => DatasetSource::Local(PathBuf::from(s)),
        }
    }

    /// The file the dataset is loaded from.
    pub fn file_path(&self) -> &Path {
        match self {
            DatasetSource::Local(path) => path,
            DatasetSource::Remote { cache_path, .. } => cache_path,
        }
    }

    pub fn remote_url(&self) -> Option<&Url> {
        match self {
            DatasetSource::Local(_) => None,
            DatasetSource::Remote { url, .. } => Some(url),
        }
    }

    #[inline]
    pub fn is_remote(&self) -> bool {
        matches!(self, DatasetSource::Remote { .. })
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::Local(path) => write!(f, "{}", path.display()),
            DatasetSource::Remote { url, cache_path } => {
                write!(f, "{url} (cached at {})", cache_path.display())
            }
        }
    }
}

/// Return the directory containing `path`, creating it if missing.
pub(crate) fn ensure_parent_dir(path: &Path) -> io::Result<PathBuf> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
