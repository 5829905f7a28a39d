/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;

use csv::{Terminator, WriterBuilder};
use serde::Serialize;

use g3_geoip_dataset::GeoIpRecord;

const COORDINATE_PLACES: i32 = 4;

#[derive(Debug, Default, PartialEq, Serialize)]
pub(crate) struct ResponseRecord {
    pub(crate) ip: String,
    pub(crate) country_code: String,
    pub(crate) country_name: String,
    pub(crate) region_code: String,
    pub(crate) region_name: String,
    pub(crate) city: String,
    pub(crate) zip_code: String,
    pub(crate) time_zone: String,
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
    pub(crate) metro_code: u32,
    pub(crate) continent: String,
}

impl ResponseRecord {
    pub(crate) fn empty(ip: IpAddr) -> Self {
        ResponseRecord {
            ip: ip.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn new(ip: IpAddr, record: &GeoIpRecord, lang: &str) -> Self {
        let name = |v: Option<&str>| v.unwrap_or_default().to_string();
        ResponseRecord {
            ip: ip.to_string(),
            country_code: record.country_code.clone().unwrap_or_default(),
            country_name: name(record.country_name(lang)),
            region_code: record.region_code.clone().unwrap_or_default(),
            region_name: name(record.region_name(lang)),
            city: name(record.city_name(lang)),
            zip_code: record.postal_code.clone().unwrap_or_default(),
            time_zone: record.time_zone.clone().unwrap_or_default(),
            latitude: round_float(record.latitude.unwrap_or_default(), COORDINATE_PLACES),
            longitude: round_float(record.longitude.unwrap_or_default(), COORDINATE_PLACES),
            metro_code: record.metro_code.unwrap_or_default(),
            continent: name(record.continent_name(lang)),
        }
    }

    /// One CRLF terminated csv line.
    pub(crate) fn to_csv(&self) -> anyhow::Result<Vec<u8>> {
        let mut w = WriterBuilder::new()
            .terminator(Terminator::CRLF)
            .from_writer(Vec::with_capacity(128));
        let latitude = format!("{:.4}", self.latitude);
        let longitude = format!("{:.4}", self.longitude);
        let metro_code = self.metro_code.to_string();
        w.write_record([
            self.ip.as_str(),
            self.country_code.as_str(),
            self.country_name.as_str(),
            self.region_code.as_str(),
            self.region_name.as_str(),
            self.city.as_str(),
            self.zip_code.as_str(),
            self.time_zone.as_str(),
            latitude.as_str(),
            longitude.as_str(),
            metro_code.as_str(),
        ])?;
        w.into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush csv writer: {}", e.error()))
    }
}

/// Round at `places` decimals, a fraction of at least one half goes up.
fn round_float(val: f64, places: i32) -> f64 {
    let pow = 10f64.powi(places);
    let digit = pow * val;
    let rounded = if digit.fract() >= 0.5 {
        digit.ceil()
    } else {
        digit.floor()
    };
    rounded / pow
}
