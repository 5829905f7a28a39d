/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use log::info;
use tokio_util::sync::CancellationToken;

/// Cancel `quit` on the first SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
pub fn register(quit: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let kinds = [
        ("SIGINT", SignalKind::interrupt()),
        ("SIGTERM", SignalKind::terminate()),
        ("SIGQUIT", SignalKind::quit()),
    ];
    for (name, kind) in kinds {
        let mut sig =
            signal(kind).map_err(|e| anyhow!("failed to create {name} listener: {e}"))?;
        let quit = quit.clone();
        tokio::spawn(async move {
            tokio::select! {
                r = sig.recv() => {
                    if r.is_some() {
                        info!("got {name}, shutting down");
                        quit.cancel();
                    }
                }
                _ = quit.cancelled() => {}
            }
        });
    }
    Ok(())
}

#[cfg(windows)]
pub fn register(quit: CancellationToken) -> anyhow::Result<()> {
    let mut sig = tokio::signal::windows::ctrl_c()
        .map_err(|e| anyhow!("failed to create ctrl-c listener: {e}"))?;
    tokio::spawn(async move {
        tokio::select! {
            r = sig.recv() => {
                if r.is_some() {
                    info!("got ctrl-c, shutting down");
                    quit.cancel();
                }
            }
            _ = quit.cancelled() => {}
        }
    });
    Ok(())
}
