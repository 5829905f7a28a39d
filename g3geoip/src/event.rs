/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use g3_geoip_dataset::DatasetSubscription;

/// Log dataset notifications until the dataset is closed.
pub fn spawn_event_logger(mut sub: DatasetSubscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                r = sub.opened.recv() => match r {
                    Ok(ev) => info!(
                        "database loaded: {} (fingerprint {}, loaded at {})",
                        ev.source,
                        ev.fingerprint,
                        ev.loaded_at.to_rfc3339()
                    ),
                    Err(RecvError::Lagged(n)) => warn!("missed {n} database opened events"),
                    Err(RecvError::Closed) => break,
                },
                r = sub.error.recv() => match r {
                    Ok(e) => warn!("database error: {e}"),
                    Err(RecvError::Lagged(n)) => warn!("missed {n} database error events"),
                    Err(RecvError::Closed) => break,
                },
                r = sub.info.recv() => match r {
                    Ok(msg) => info!("database info: {msg}"),
                    Err(RecvError::Lagged(n)) => debug!("missed {n} database info events"),
                    Err(RecvError::Closed) => break,
                },
                _ = sub.closed.wait() => {
                    info!("database closed");
                    break;
                }
            }
        }
    })
}
