/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::str::FromStr;

use anyhow::anyhow;

use crate::{DatasetError, GeoIpRecord};

mod native;
pub use native::NativeCsvDb;

mod mmdb;
pub use mmdb::MaxMindDb;

const MAXMIND_METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";
const MAXMIND_METADATA_SEARCH_SIZE: usize = 128 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DatabaseFormat {
    #[default]
    Auto,
    MaxMind,
    NativeCsv,
}

impl DatabaseFormat {
    fn detect(data: &[u8]) -> Self {
        let tail_start = data.len().saturating_sub(MAXMIND_METADATA_SEARCH_SIZE);
        if memchr::memmem::rfind(&data[tail_start..], MAXMIND_METADATA_MARKER).is_some() {
            DatabaseFormat::MaxMind
        } else {
            DatabaseFormat::NativeCsv
        }
    }
}

impl FromStr for DatabaseFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DatabaseFormat::Auto),
            "mmdb" | "maxmind" => Ok(DatabaseFormat::MaxMind),
            "csv" | "native" => Ok(DatabaseFormat::NativeCsv),
            _ => Err(anyhow!("unsupported database format {s}")),
        }
    }
}

/// A parsed, queryable geolocation database.
pub enum GeoIpDatabase {
    MaxMind(MaxMindDb),
    NativeCsv(NativeCsvDb),
}

impl GeoIpDatabase {
    /// Parse the decompressed database content.
    pub fn parse(data: Vec<u8>, format: DatabaseFormat) -> anyhow::Result<Self> {
        let format = match format {
            DatabaseFormat::Auto => DatabaseFormat::detect(&data),
            f => f,
        };
        match format {
            DatabaseFormat::MaxMind => MaxMindDb::parse(data).map(GeoIpDatabase::MaxMind),
            _ => NativeCsvDb::parse(&data).map(GeoIpDatabase::NativeCsv),
        }
    }

    pub fn format(&self) -> DatabaseFormat {
        match self {
            GeoIpDatabase::MaxMind(_) => DatabaseFormat::MaxMind,
            GeoIpDatabase::NativeCsv(_) => DatabaseFormat::NativeCsv,
        }
    }

    /// Returns `Ok(None)` if the address is not covered by the database.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, DatasetError> {
        match self {
            GeoIpDatabase::MaxMind(db) => db.lookup(ip),
            GeoIpDatabase::NativeCsv(db) => Ok(db.lookup(ip)),
        }
    }
}
