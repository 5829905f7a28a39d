/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use ::log::{info, warn};
use anyhow::{Context, anyhow};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use g3_geoip_dataset::DatasetManager;

pub mod config;
use config::GeoIpConfig;

pub mod opts;

pub mod log;

mod event;
pub use event::spawn_event_logger;

mod frontend;
pub use frontend::build_router;

mod signal;

pub async fn run(config: GeoIpConfig) -> anyhow::Result<()> {
    let dataset_config = config.dataset.build();
    info!("opening database {}", dataset_config.source());
    let manager = DatasetManager::open(dataset_config)
        .await
        .context("failed to open database")?;
    let manager = Arc::new(manager);
    let event_logger = spawn_event_logger(manager.subscribe());
    if let Some(t) = manager.last_updated() {
        info!("database ready, loaded at {}", t.to_rfc3339());
    }

    let quit = CancellationToken::new();
    let r = serve(&config, manager.clone(), quit).await;

    manager.close().await;
    if let Err(e) = event_logger.await {
        warn!("event logger failed: {e}");
    }
    r
}

async fn serve(
    config: &GeoIpConfig,
    manager: Arc<DatasetManager>,
    quit: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.server.listen)
        .await
        .map_err(|e| anyhow!("failed to listen on {}: {e}", config.server.listen))?;
    signal::register(quit.clone()).context("failed to setup signal handler")?;

    let access_log = (!config.server.silent).then(crate::log::access_logger);
    let app = build_router(manager, &config.server, access_log);
    info!("http server listening on {}", config.server.listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(quit.cancelled_owned())
    .await
    .map_err(|e| anyhow!("http server failed: {e}"))
}
