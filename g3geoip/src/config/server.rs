/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::anyhow;
use yaml_rust::Yaml;

use super::yaml;

const DEFAULT_LISTEN_PORT: u16 = 8080;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub use_x_forwarded_for: bool,
    pub silent: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            use_x_forwarded_for: false,
            silent: false,
        }
    }
}

impl ServerConfig {
    pub(super) fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = v else {
            return Err(anyhow!("yaml type for 'server' should be 'map'"));
        };

        let mut config = ServerConfig::default();
        yaml::foreach_kv(map, |k, v| match yaml::normalize(k).as_str() {
            "listen" => {
                config.listen = yaml::as_sockaddr(v)?;
                Ok(())
            }
            "read_timeout" => {
                config.read_timeout = yaml::as_duration(v)?;
                Ok(())
            }
            "write_timeout" => {
                config.write_timeout = yaml::as_duration(v)?;
                Ok(())
            }
            "use_x_forwarded_for" => {
                config.use_x_forwarded_for = yaml::as_bool(v)?;
                Ok(())
            }
            "silent" => {
                config.silent = yaml::as_bool(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        })?;
        Ok(config)
    }
}
