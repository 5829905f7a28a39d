/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use log::debug;
use tokio::fs::File;

/// A uniquely named download target beside the cache file.
///
/// The file is removed on drop unless it has been installed. If the drop
/// happens after the cache file was moved aside, the backup is put back.
pub(crate) struct TempDownload {
    path: PathBuf,
    installed: bool,
    moved_aside: Option<(PathBuf, PathBuf)>,
}

impl TempDownload {
    pub(crate) async fn create(cache_path: &Path) -> anyhow::Result<(Self, File)> {
        let dir = crate::source::ensure_parent_dir(cache_path)
            .map_err(|e| anyhow!("failed to create dir for {}: {e}", cache_path.display()))?;
        let path = dir.join(temp_file_name(cache_path));
        let file = File::create(&path)
            .await
            .map_err(|e| anyhow!("failed to create temp file {}: {e}", path.display()))?;
        Ok((
            TempDownload {
                path,
                installed: false,
                moved_aside: None,
            },
            file,
        ))
    }

    #[inline]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Move the current cache file to `<cache_path>.bak`, if there is one.
    async fn backup(&mut self, cache_path: &Path) {
        let bak_path = backup_path(cache_path);
        match tokio::fs::rename(cache_path, &bak_path).await {
            Ok(_) => self.moved_aside = Some((bak_path, cache_path.to_path_buf())),
            Err(e) => debug!("no backup of {}: {e}", cache_path.display()),
        }
    }

    /// Move the downloaded file into `cache_path`.
    ///
    /// The current cache file is kept as `<cache_path>.bak` if possible. On
    /// failure the current cache file is put back and the temp file removed.
    pub(crate) async fn install(mut self, cache_path: &Path) -> anyhow::Result<()> {
        self.backup(cache_path).await;
        crate::source::ensure_parent_dir(cache_path)
            .map_err(|e| anyhow!("failed to create dir for {}: {e}", cache_path.display()))?;
        tokio::fs::rename(&self.path, cache_path)
            .await
            .map_err(|e| {
                anyhow!(
                    "failed to rename {} to {}: {e}",
                    self.path.display(),
                    cache_path.display()
                )
            })?;
        self.installed = true;
        Ok(())
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if self.installed {
            return;
        }
        let _ = std::fs::remove_file(&self.path);
        if let Some((bak_path, cache_path)) = self.moved_aside.take()
            && !cache_path.exists()
            && std::fs::rename(&bak_path, &cache_path).is_ok()
        {
            debug!("restored {} from backup", cache_path.display());
        }
    }
}

pub(crate) fn backup_path(cache_path: &Path) -> PathBuf {
    let mut s = cache_path.as_os_str().to_os_string();
    s.push(".bak");
    PathBuf::from(s)
}

fn temp_file_name(cache_path: &Path) -> OsString {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut name = OsString::from(".");
    name.push(cache_path.file_name().unwrap_or_else(|| OsStr::new("dataset")));
    name.push(format!(".{nanos}.{:08x}.download", fastrand::u32(..)));
    name
}
