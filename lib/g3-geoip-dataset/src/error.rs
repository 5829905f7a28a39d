/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    /// the initial dataset or the initial watch registration failed
    #[error("failed to open dataset: {0:#}")]
    Open(anyhow::Error),
    /// no dataset is in service, either not yet downloaded or already closed
    #[error("no dataset available")]
    Unavailable,
    #[error("failed to reload dataset: {0:#}")]
    Reload(anyhow::Error),
    #[error("failed to download dataset: {0:#}")]
    Download(anyhow::Error),
    #[error("failed to install dataset: {0:#}")]
    Install(anyhow::Error),
    #[error("dataset query failed: {0}")]
    Query(String),
}

impl DatasetError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DatasetError::Unavailable)
    }
}
