/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use crate::{DatabaseFormat, DatasetSource, UpdatePolicy};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 3600);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct DatasetConfig {
    pub(crate) source: DatasetSource,
    pub(crate) format: DatabaseFormat,
    pub(crate) update_interval: Duration,
    pub(crate) retry_interval: Duration,
    pub(crate) update_policy: UpdatePolicy,
    pub(crate) watch: bool,
    pub(crate) channel_capacity: usize,
    pub(crate) download_timeout: Duration,
    pub(crate) join_timeout: Duration,
    pub(crate) poll_interval: Duration,
}

impl DatasetConfig {
    pub fn new(source: DatasetSource) -> Self {
        DatasetConfig {
            source,
            format: DatabaseFormat::Auto,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            update_policy: UpdatePolicy::default(),
            watch: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[inline]
    pub fn source(&self) -> &DatasetSource {
        &self.source
    }

    pub fn set_source(&mut self, source: DatasetSource) {
        self.source = source;
    }

    pub fn set_format(&mut self, format: DatabaseFormat) {
        self.format = format;
    }

    pub fn set_update_interval(&mut self, interval: Duration) {
        self.update_interval = interval;
    }

    pub fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }

    pub fn set_update_policy(&mut self, policy: UpdatePolicy) {
        self.update_policy = policy;
    }

    pub fn set_watch(&mut self, watch: bool) {
        self.watch = watch;
    }

    pub fn set_channel_capacity(&mut self, capacity: usize) {
        self.channel_capacity = capacity;
    }

    pub fn set_download_timeout(&mut self, timeout: Duration) {
        self.download_timeout = timeout;
    }

    pub fn set_join_timeout(&mut self, timeout: Duration) {
        self.join_timeout = timeout;
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }
}
