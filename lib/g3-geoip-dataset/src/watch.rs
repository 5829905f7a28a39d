/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{DatasetError, DatasetLoader, DatasetStore, Notifier, SwapOutcome};

/// Reloads the dataset whenever its file is rewritten or replaced.
pub(crate) struct SourceWatcher {
    path: PathBuf,
    loader: DatasetLoader,
    store: Arc<DatasetStore>,
    notifier: Arc<Notifier>,
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    poll_interval: Duration,
}

impl SourceWatcher {
    pub(crate) fn new(
        loader: DatasetLoader,
        store: Arc<DatasetStore>,
        notifier: Arc<Notifier>,
        poll_interval: Duration,
    ) -> Self {
        SourceWatcher {
            path: loader.source().file_path().to_path_buf(),
            loader,
            store,
            notifier,
            poll_interval,
        }
    }

    async fn reload(&self) {
        match self.loader.load_blocking(&self.path).await {
            Ok(handle) => {
                let fingerprint = handle.fingerprint();
                match self.store.swap(handle) {
                    SwapOutcome::Installed => {
                        info!("reloaded dataset {fingerprint} from {}", self.path.display())
                    }
                    SwapOutcome::Unchanged => {
                        debug!("dataset file {} changed but content is the same", self.path.display())
                    }
                    SwapOutcome::Rejected => {}
                }
            }
            Err(e) => {
                warn!("failed to reload dataset from {}: {e:?}", self.path.display());
                self.notifier.send_error(DatasetError::Reload(e));
            }
        }
    }

    /// Register the watch and spawn the watch task.
    ///
    /// Must be called inside a tokio runtime.
    #[cfg(target_os = "linux")]
    pub(crate) fn spawn(self, quit: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
        use futures_util::StreamExt;
        use inotify::{Inotify, WatchMask};

        let dir = crate::source::ensure_parent_dir(&self.path)
            .map_err(|e| anyhow!("failed to create dir for {}: {e}", self.path.display()))?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("invalid dataset file path {}", self.path.display()))?
            .to_os_string();

        let inotify =
            Inotify::init().map_err(|e| anyhow!("failed to init inotify instance: {e}"))?;
        inotify
            .watches()
            .add(&dir, WatchMask::CLOSE_WRITE | WatchMask::MOVED_TO)
            .map_err(|e| anyhow!("failed to watch dir {}: {e}", dir.display()))?;
        let buffer = [0u8; 4096];
        let mut event_stream = inotify
            .into_event_stream(buffer)
            .map_err(|e| anyhow!("failed to create inotify event stream: {e}"))?;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = quit.cancelled() => break,
                    r = event_stream.next() => {
                        match r {
                            Some(Ok(ev)) => {
                                if ev.name.as_deref() == Some(file_name.as_os_str()) {
                                    debug!("dataset file {} changed: {:?}", self.path.display(), ev.mask);
                                    self.reload().await;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("inotify watch failed: {e}");
                            }
                            None => {
                                warn!("inotify watch ended unexpected");
                                break;
                            }
                        }
                    }
                }
            }
            drop(event_stream);
            debug!("stopped watching {}", self.path.display());
        });
        Ok(handle)
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn spawn(self, quit: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
        use std::time::SystemTime;

        fn file_stamp(path: &std::path::Path) -> Option<(SystemTime, u64)> {
            let meta = std::fs::metadata(path).ok()?;
            Some((meta.modified().ok()?, meta.len()))
        }

        crate::source::ensure_parent_dir(&self.path)
            .map_err(|e| anyhow!("failed to create dir for {}: {e}", self.path.display()))?;

        let handle = tokio::spawn(async move {
            let mut last = file_stamp(&self.path);
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    _ = quit.cancelled() => break,
                    _ = interval.tick() => {
                        let cur = file_stamp(&self.path);
                        if cur.is_some() && cur != last {
                            last = cur;
                            self.reload().await;
                        }
                    }
                }
            }
            debug!("stopped watching {}", self.path.display());
        });
        Ok(handle)
    }
}
