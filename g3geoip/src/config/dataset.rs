/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use g3_geoip_dataset::{DatabaseFormat, DatasetConfig, DatasetSource, UpdatePolicy};

use super::yaml;

/// Default database, used when neither the command line nor the config file sets one.
pub const DEFAULT_DB: &str = "https://download.db-ip.com/free/dbip-city-lite-2022-04.mmdb.gz";

#[derive(Clone, Debug)]
pub struct DatasetSettings {
    pub(crate) db: String,
    pub(crate) cache_file: Option<PathBuf>,
    pub(crate) format: DatabaseFormat,
    pub(crate) update_interval: Option<Duration>,
    pub(crate) retry_interval: Option<Duration>,
    pub(crate) update_policy: UpdatePolicy,
    pub(crate) watch: bool,
    pub(crate) channel_capacity: Option<usize>,
    pub(crate) download_timeout: Option<Duration>,
    pub(crate) join_timeout: Option<Duration>,
    pub(crate) poll_interval: Option<Duration>,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        DatasetSettings {
            db: DEFAULT_DB.to_string(),
            cache_file: None,
            format: DatabaseFormat::Auto,
            update_interval: None,
            retry_interval: None,
            update_policy: UpdatePolicy::default(),
            watch: true,
            channel_capacity: None,
            download_timeout: None,
            join_timeout: None,
            poll_interval: None,
        }
    }
}

impl DatasetSettings {
    pub(super) fn parse_yaml(v: &Yaml, conf_dir: &Path) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = v else {
            return Err(anyhow!("yaml type for 'dataset' should be 'map'"));
        };

        let mut settings = DatasetSettings::default();
        yaml::foreach_kv(map, |k, v| settings.set(k, v, conf_dir))?;
        Ok(settings)
    }

    fn set(&mut self, k: &str, v: &Yaml, conf_dir: &Path) -> anyhow::Result<()> {
        match yaml::normalize(k).as_str() {
            "db" | "source" => {
                let s = yaml::as_string(v)?;
                if s.is_empty() {
                    return Err(anyhow!("empty db value"));
                }
                self.db = if s.contains("://") {
                    s
                } else {
                    yaml::as_file_path(v, conf_dir)?.to_string_lossy().into_owned()
                };
                Ok(())
            }
            "cache_file" => {
                self.cache_file = Some(yaml::as_file_path(v, conf_dir)?);
                Ok(())
            }
            "format" => {
                let s = yaml::as_string(v)?;
                self.format = DatabaseFormat::from_str(&s)?;
                Ok(())
            }
            "update_interval" => {
                let d = yaml::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                self.update_interval = Some(d);
                Ok(())
            }
            "retry_interval" => {
                let d = yaml::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                self.retry_interval = Some(d);
                Ok(())
            }
            "update_policy" => {
                let s = yaml::as_string(v)?;
                self.update_policy = UpdatePolicy::from_str(&s)?;
                Ok(())
            }
            "watch" => {
                self.watch = yaml::as_bool(v)?;
                Ok(())
            }
            "channel_capacity" | "notify_channel_capacity" => {
                let n = yaml::as_usize(v)?;
                if n == 0 {
                    return Err(anyhow!("channel capacity should not be 0"));
                }
                self.channel_capacity = Some(n);
                Ok(())
            }
            "download_timeout" => {
                self.download_timeout = Some(yaml::as_duration(v)?);
                Ok(())
            }
            "join_timeout" | "shutdown_timeout" => {
                self.join_timeout = Some(yaml::as_duration(v)?);
                Ok(())
            }
            "poll_interval" => {
                self.poll_interval = Some(yaml::as_duration(v)?);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    pub fn build(&self) -> DatasetConfig {
        let source = DatasetSource::parse(&self.db, self.cache_file.as_deref());
        let mut config = DatasetConfig::new(source);
        config.set_format(self.format);
        config.set_update_policy(self.update_policy);
        config.set_watch(self.watch);
        if let Some(d) = self.update_interval {
            config.set_update_interval(d);
        }
        if let Some(d) = self.retry_interval {
            config.set_retry_interval(d);
        }
        if let Some(n) = self.channel_capacity {
            config.set_channel_capacity(n);
        }
        if let Some(d) = self.download_timeout {
            config.set_download_timeout(d);
        }
        if let Some(d) = self.join_timeout {
            config.set_join_timeout(d);
        }
        if let Some(d) = self.poll_interval {
            config.set_poll_interval(d);
        }
        config
    }
}
