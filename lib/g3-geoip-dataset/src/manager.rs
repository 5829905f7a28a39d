/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::update::DatasetUpdater;
use crate::watch::SourceWatcher;
use crate::{
    DatasetConfig, DatasetError, DatasetFetcher, DatasetLoader, DatasetSource, DatasetStore,
    DatasetSubscription, GeoIpRecord, HttpFetcher, Notifier,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    Ready,
    Closed,
}

/// Owns the dataset store and the background tasks that keep it fresh.
pub struct DatasetManager {
    source: Arc<DatasetSource>,
    store: Arc<DatasetStore>,
    notifier: Arc<Notifier>,
    quit: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    join_timeout: Duration,
}

impl DatasetManager {
    /// Open the dataset, remote sources are downloaded over http(s).
    pub async fn open(config: DatasetConfig) -> Result<Self, DatasetError> {
        let fetcher = HttpFetcher::new(config.download_timeout).map_err(DatasetError::Open)?;
        DatasetManager::open_with_fetcher(config, Arc::new(fetcher)).await
    }

    /// Open the dataset with a custom fetcher for remote sources.
    ///
    /// A local source must be loadable or this fails. A remote source without
    /// a usable cache opens at once and becomes available after the first
    /// successful download.
    pub async fn open_with_fetcher(
        config: DatasetConfig,
        fetcher: Arc<dyn DatasetFetcher>,
    ) -> Result<Self, DatasetError> {
        let source = Arc::new(config.source.clone());
        let notifier = Arc::new(Notifier::new(config.channel_capacity));
        let store = Arc::new(DatasetStore::new(notifier.clone()));
        let loader = DatasetLoader::new(source.clone(), config.format);

        let path = source.file_path();
        match loader.load_blocking(path).await {
            Ok(handle) => {
                info!(
                    "loaded dataset {} from {}",
                    handle.fingerprint(),
                    path.display()
                );
                store.swap(handle);
            }
            Err(e) => {
                if source.is_remote() {
                    debug!("no usable dataset cache at {}: {e:?}", path.display());
                } else {
                    return Err(DatasetError::Open(e));
                }
            }
        }

        let quit = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        if config.watch {
            let watcher = SourceWatcher::new(
                loader.clone(),
                store.clone(),
                notifier.clone(),
                config.poll_interval,
            );
            let task = watcher.spawn(quit.child_token()).map_err(|e| {
                store.close();
                DatasetError::Open(anyhow!("failed to watch {}: {e}", path.display()))
            })?;
            tasks.push(task);
        }

        if let Some(updater) =
            DatasetUpdater::new(&config, loader, store.clone(), notifier.clone(), fetcher)
        {
            tasks.push(updater.spawn(quit.child_token()));
        }

        Ok(DatasetManager {
            source,
            store,
            notifier,
            quit,
            tasks: Mutex::new(tasks),
            join_timeout: config.join_timeout,
        })
    }

    #[inline]
    pub fn source(&self) -> &DatasetSource {
        &self.source
    }

    /// Find the record for `ip`.
    ///
    /// Returns `Ok(None)` if the dataset has no record for it and
    /// [`DatasetError::Unavailable`] if no dataset is in service.
    pub fn resolve(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, DatasetError> {
        self.store.lookup(ip)
    }

    /// Time the dataset in service was loaded.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.store.last_updated()
    }

    pub fn subscribe(&self) -> DatasetSubscription {
        self.notifier.subscribe()
    }

    pub fn state(&self) -> ManagerState {
        if self.store.is_closed() {
            ManagerState::Closed
        } else {
            ManagerState::Ready
        }
    }

    /// Close the store and stop the background tasks.
    ///
    /// The store is closed before the tasks are joined, so a download that
    /// finishes during close is dropped. Tasks that do not stop within the join
    /// timeout are aborted. Calling it more than once is fine, later calls
    /// return once the first one is done.
    pub async fn close(&self) {
        self.quit.cancel();

        let mut tasks = self.tasks.lock().await;
        self.store.close();
        for mut task in tasks.drain(..) {
            match tokio::time::timeout(self.join_timeout, &mut task).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("dataset task failed: {e}"),
                Err(_) => {
                    warn!("dataset task not stopped in {:?}, abort it", self.join_timeout);
                    task.abort();
                }
            }
        }
        drop(tasks);
    }
}

impl Drop for DatasetManager {
    fn drop(&mut self) {
        self.quit.cancel();
    }
}
