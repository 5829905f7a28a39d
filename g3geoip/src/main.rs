/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use log::{debug, error};

fn main() -> anyhow::Result<()> {
    let Some(proc_args) = g3geoip::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    // set up process logger early, only proc args is used inside
    let _log_guard = g3geoip::log::setup(&proc_args).context("failed to setup logger")?;

    let config = g3geoip::config::load(&proc_args).context("failed to load config")?;
    if let Some(path) = &proc_args.config_file {
        debug!("loaded config from {}", path.display());
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to start runtime: {e}"))?;
    match rt.block_on(g3geoip::run(config)) {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{e:?}");
            Err(e)
        }
    }
}
