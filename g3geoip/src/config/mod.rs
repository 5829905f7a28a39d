/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader};

use crate::opts::ProcArgs;

mod yaml;

mod dataset;
pub use dataset::{DEFAULT_DB, DatasetSettings};

mod server;
pub use server::ServerConfig;

#[derive(Clone, Debug, Default)]
pub struct GeoIpConfig {
    pub dataset: DatasetSettings,
    pub server: ServerConfig,
}

impl GeoIpConfig {
    fn parse_doc(doc: &Yaml, conf_dir: &Path) -> anyhow::Result<Self> {
        let mut config = GeoIpConfig::default();
        match doc {
            Yaml::Hash(map) => {
                yaml::foreach_kv(map, |k, v| match yaml::normalize(k).as_str() {
                    "dataset" => {
                        config.dataset = DatasetSettings::parse_yaml(v, conf_dir)?;
                        Ok(())
                    }
                    "server" => {
                        config.server = ServerConfig::parse_yaml(v)?;
                        Ok(())
                    }
                    _ => Err(anyhow!("invalid key {k}")),
                })?;
            }
            Yaml::Null => {}
            _ => return Err(anyhow!("yaml type for the main config should be 'map'")),
        }
        Ok(config)
    }

    fn parse_str(s: &str, conf_dir: &Path) -> anyhow::Result<Self> {
        let docs = YamlLoader::load_from_str(s).map_err(|e| anyhow!("invalid yaml: {e}"))?;
        match docs.first() {
            Some(doc) => GeoIpConfig::parse_doc(doc, conf_dir),
            None => Ok(GeoIpConfig::default()),
        }
    }

    fn apply_args(&mut self, args: &ProcArgs) {
        if let Some(db) = &args.db {
            self.dataset.db.clone_from(db);
        }
        if let Some(cache_file) = &args.cache_file {
            self.dataset.cache_file = Some(cache_file.clone());
        }
        if let Some(d) = args.update_interval {
            self.dataset.update_interval = Some(d);
        }
        if let Some(d) = args.retry_interval {
            self.dataset.retry_interval = Some(d);
        }
        if let Some(addr) = args.listen {
            self.server.listen = addr;
        } else {
            if let Some(host) = args.host {
                self.server.listen.set_ip(host);
            }
            if let Some(port) = args.port {
                self.server.listen.set_port(port);
            }
        }
        if let Some(d) = args.read_timeout {
            self.server.read_timeout = d;
        }
        if let Some(d) = args.write_timeout {
            self.server.write_timeout = d;
        }
        if args.use_x_forwarded_for {
            self.server.use_x_forwarded_for = true;
        }
        if args.silent {
            self.server.silent = true;
        }
    }
}

/// Build the process config, command line values take precedence over the config file.
pub fn load(args: &ProcArgs) -> anyhow::Result<GeoIpConfig> {
    let mut config = match &args.config_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read config file {}: {e}", path.display()))?;
            let conf_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            GeoIpConfig::parse_str(&content, conf_dir)
                .context(format!("failed to parse config file {}", path.display()))?
        }
        None => GeoIpConfig::default(),
    };
    config.apply_args(args);
    Ok(config)
}
