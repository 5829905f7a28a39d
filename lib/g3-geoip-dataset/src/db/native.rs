/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::str::FromStr;

use anyhow::anyhow;
use ip_network::IpNetwork;
use ip_network_table::IpNetworkTable;

use crate::{GeoIpRecord, LocalizedNames};

const NATIVE_CSV_COLUMNS: usize = 13;
const NATIVE_CSV_LANG: &str = "en";
const NATIVE_CSV_TRAILER: &str = "# rows=";

/// The native csv dataset.
///
/// Each row has the columns:
/// `network,country_code,country_name,region_code,region_name,city,postal_code,
/// time_zone,latitude,longitude,metro_code,continent_code,continent_name`
///
/// The last line must be the trailer `# rows=<N>`, where N is the number of
/// rows above it. A file without a matching trailer has been truncated.
pub struct NativeCsvDb {
    table: IpNetworkTable<GeoIpRecord>,
    count: usize,
}

impl NativeCsvDb {
    pub(super) fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let (data, expected_rows) = split_trailer(data)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(data);

        let mut table = IpNetworkTable::new();
        let mut count = 0usize;
        for (i, row) in reader.records().enumerate() {
            let row = row.map_err(|e| anyhow!("failed to read row #{i}: {e}"))?;
            if row.len() != NATIVE_CSV_COLUMNS {
                return Err(anyhow!(
                    "invalid row #{i}: expect {NATIVE_CSV_COLUMNS} columns but got {}",
                    row.len()
                ));
            }

            let network = IpNetwork::from_str(&row[0])
                .map_err(|e| anyhow!("invalid network in row #{i}: {e}"))?;
            let record = GeoIpRecord {
                country_code: optional_str(&row[1]),
                country: localized(&row[2]),
                region_code: optional_str(&row[3]),
                region: localized(&row[4]),
                city: localized(&row[5]),
                postal_code: optional_str(&row[6]),
                time_zone: optional_str(&row[7]),
                latitude: optional_value::<f64>(&row[8])
                    .map_err(|e| anyhow!("invalid latitude in row #{i}: {e}"))?,
                longitude: optional_value::<f64>(&row[9])
                    .map_err(|e| anyhow!("invalid longitude in row #{i}: {e}"))?,
                metro_code: optional_value::<u32>(&row[10])
                    .map_err(|e| anyhow!("invalid metro code in row #{i}: {e}"))?,
                continent_code: optional_str(&row[11]),
                continent: localized(&row[12]),
            };
            table.insert(network, record);
            count += 1;
        }

        if count == 0 {
            return Err(anyhow!("no valid record found"));
        }
        if count != expected_rows {
            return Err(anyhow!(
                "expect {expected_rows} rows but got {count}, the file may be truncated"
            ));
        }
        Ok(NativeCsvDb { table, count })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(super) fn lookup(&self, ip: IpAddr) -> Option<GeoIpRecord> {
        self.table.longest_match(ip).map(|(_net, r)| r.clone())
    }
}

/// Split off the row count trailer, returns the rows part and the count.
fn split_trailer(data: &[u8]) -> anyhow::Result<(&[u8], usize)> {
    let end = data
        .iter()
        .rposition(|c| !c.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(0);
    let data = &data[..end];
    let line_start = memchr::memrchr(b'\n', data).map(|p| p + 1).unwrap_or(0);
    let line = std::str::from_utf8(&data[line_start..])
        .map_err(|_| anyhow!("no row count trailer found, the file may be truncated"))?;
    let Some(count) = line.trim().strip_prefix(NATIVE_CSV_TRAILER) else {
        return Err(anyhow!("no row count trailer found, the file may be truncated"));
    };
    let count = usize::from_str(count.trim())
        .map_err(|e| anyhow!("invalid row count trailer {line}: {e}"))?;
    Ok((&data[..line_start], count))
}

fn optional_str(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn optional_value<T: FromStr>(s: &str) -> Result<Option<T>, T::Err> {
    if s.is_empty() {
        Ok(None)
    } else {
        T::from_str(s).map(Some)
    }
}

fn localized(s: &str) -> LocalizedNames {
    let mut names = LocalizedNames::new();
    if !s.is_empty() {
        names.insert(NATIVE_CSV_LANG.to_string(), s.to_string());
    }
    names
}
