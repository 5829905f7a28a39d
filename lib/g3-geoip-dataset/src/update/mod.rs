/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{DatasetConfig, DatasetError, DatasetLoader, DatasetStore, Notifier, SwapOutcome};

mod fetch;
pub use fetch::{DatasetFetcher, FetchOutcome, HttpFetcher, http_date};

mod install;
use install::TempDownload;

/// When a remote dataset should be downloaded again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// only when there is no usable local cache
    #[default]
    IfMissing,
    /// whenever the remote resource is newer than the local cache and differs
    /// from the dataset in service
    IfModified,
}

impl FromStr for UpdatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "if_missing" | "missing" => Ok(UpdatePolicy::IfMissing),
            "if_modified" | "modified" => Ok(UpdatePolicy::IfModified),
            _ => Err(anyhow!("unsupported update policy {s}")),
        }
    }
}

/// Keeps the local cache of a remote dataset fresh.
pub(crate) struct DatasetUpdater {
    url: Url,
    cache_path: PathBuf,
    loader: DatasetLoader,
    store: Arc<DatasetStore>,
    notifier: Arc<Notifier>,
    fetcher: Arc<dyn DatasetFetcher>,
    policy: UpdatePolicy,
    update_interval: Duration,
    retry_interval: Duration,
}

impl DatasetUpdater {
    /// Returns `None` if the source is not a remote one.
    pub(crate) fn new(
        config: &DatasetConfig,
        loader: DatasetLoader,
        store: Arc<DatasetStore>,
        notifier: Arc<Notifier>,
        fetcher: Arc<dyn DatasetFetcher>,
    ) -> Option<Self> {
        let url = config.source.remote_url()?.clone();
        Some(DatasetUpdater {
            url,
            cache_path: config.source.file_path().to_path_buf(),
            loader,
            store,
            notifier,
            fetcher,
            policy: config.update_policy,
            update_interval: config.update_interval,
            retry_interval: config.retry_interval,
        })
    }

    pub(crate) fn spawn(self, quit: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.into_running(quit))
    }

    async fn into_running(self, quit: CancellationToken) {
        loop {
            if quit.is_cancelled() {
                break;
            }
            let wait = if self.run_cycle().await {
                self.update_interval
            } else {
                self.retry_interval
            };
            tokio::select! {
                biased;

                _ = quit.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        debug!("stopped updating from {}", self.url);
    }

    /// Run one update cycle, returns false if it failed.
    async fn run_cycle(&self) -> bool {
        self.notifier.send_info("starting update");
        let ok = match self.run_update().await {
            Ok(_) => true,
            Err(e) => {
                warn!("dataset update from {} failed: {e}", self.url);
                self.notifier.send_error(e);
                false
            }
        };
        self.notifier.send_info("finished update");
        ok
    }

    async fn run_update(&self) -> Result<(), DatasetError> {
        let if_modified_since = match self.policy {
            UpdatePolicy::IfMissing => {
                let cache_exists = tokio::fs::try_exists(&self.cache_path)
                    .await
                    .unwrap_or(false);
                if cache_exists && self.store.with_active(|_| ()).is_some() {
                    self.notifier.send_info("no update needed");
                    return Ok(());
                }
                None
            }
            UpdatePolicy::IfModified => modified_time(&self.cache_path).await,
        };

        self.notifier
            .send_info(format!("downloading dataset from {}", self.url));
        let (tmp, mut file) = TempDownload::create(&self.cache_path)
            .await
            .map_err(DatasetError::Download)?;
        let outcome = self
            .fetcher
            .fetch(&self.url, if_modified_since, &mut file)
            .await
            .map_err(DatasetError::Download)?;
        file.sync_all()
            .await
            .map_err(|e| DatasetError::Download(anyhow!("failed to sync temp file: {e}")))?;
        drop(file);

        match outcome {
            FetchOutcome::NotModified => {
                self.notifier.send_info("no update needed");
                return Ok(());
            }
            FetchOutcome::Downloaded(size) => {
                debug!("downloaded {size} bytes to {}", tmp.path().display());
            }
        }

        let handle = self
            .loader
            .load_blocking(tmp.path())
            .await
            .map_err(DatasetError::Download)?;
        if self.policy == UpdatePolicy::IfModified
            && self.store.with_active(|h| h.fingerprint()) == Some(handle.fingerprint())
        {
            self.notifier.send_info("no update needed");
            return Ok(());
        }

        tmp.install(&self.cache_path)
            .await
            .map_err(DatasetError::Install)?;

        let fingerprint = handle.fingerprint();
        match self.store.swap(handle) {
            SwapOutcome::Installed => info!("installed dataset {fingerprint} from {}", self.url),
            SwapOutcome::Unchanged => debug!("dataset {fingerprint} already loaded by watcher"),
            SwapOutcome::Rejected => debug!("store closed, dataset {fingerprint} dropped"),
        }
        Ok(())
    }
}

async fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    meta.modified().ok().map(DateTime::<Utc>::from)
}
