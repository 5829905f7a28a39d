/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::IF_MODIFIED_SINCE;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// the remote resource has not changed since the given time
    NotModified,
    /// the payload has been written, with the number of bytes
    Downloaded(u64),
}

/// Downloads a remote dataset.
#[async_trait]
pub trait DatasetFetcher: Send + Sync {
    /// Write the remote payload to `dest`.
    ///
    /// If `if_modified_since` is set and the remote resource is older, nothing
    /// should be written and [`FetchOutcome::NotModified`] returned.
    async fn fetch(
        &self,
        url: &Url,
        if_modified_since: Option<DateTime<Utc>>,
        dest: &mut File,
    ) -> anyhow::Result<FetchOutcome>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("g3-geoip-dataset/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow!("failed to build http client: {e}"))?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl DatasetFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        if_modified_since: Option<DateTime<Utc>>,
        dest: &mut File,
    ) -> anyhow::Result<FetchOutcome> {
        let mut req = self.client.get(url.clone());
        if let Some(time) = if_modified_since {
            req = req.header(IF_MODIFIED_SINCE, http_date(time));
        }
        let mut rsp = req
            .send()
            .await
            .map_err(|e| anyhow!("failed to send request to {url}: {e}"))?;
        if rsp.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !rsp.status().is_success() {
            return Err(anyhow!("unexpected response status {}", rsp.status()));
        }

        let mut size = 0u64;
        while let Some(chunk) = rsp
            .chunk()
            .await
            .map_err(|e| anyhow!("failed to read response body: {e}"))?
        {
            dest.write_all(&chunk)
                .await
                .map_err(|e| anyhow!("failed to write to temp file: {e}"))?;
            size += chunk.len() as u64;
        }
        dest.flush()
            .await
            .map_err(|e| anyhow!("failed to flush temp file: {e}"))?;
        Ok(FetchOutcome::Downloaded(size))
    }
}

/// Format as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
