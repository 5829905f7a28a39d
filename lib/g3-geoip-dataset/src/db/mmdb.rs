/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;

use anyhow::anyhow;
use maxminddb::{MaxMindDBError, Reader};
use serde::Deserialize;

use crate::{DatasetError, GeoIpRecord, LocalizedNames};

#[derive(Deserialize)]
struct CityQuery {
    continent: Option<PlaceQuery>,
    country: Option<PlaceQuery>,
    subdivisions: Option<Vec<PlaceQuery>>,
    city: Option<PlaceQuery>,
    location: Option<LocationQuery>,
    postal: Option<PostalQuery>,
}

#[derive(Deserialize)]
struct PlaceQuery {
    code: Option<String>,
    iso_code: Option<String>,
    names: Option<LocalizedNames>,
}

#[derive(Deserialize)]
struct LocationQuery {
    latitude: Option<f64>,
    longitude: Option<f64>,
    metro_code: Option<u32>,
    time_zone: Option<String>,
}

#[derive(Deserialize)]
struct PostalQuery {
    code: Option<String>,
}

impl From<CityQuery> for GeoIpRecord {
    fn from(q: CityQuery) -> Self {
        let mut record = GeoIpRecord::default();
        if let Some(continent) = q.continent {
            record.continent_code = continent.code;
            record.continent = continent.names.unwrap_or_default();
        }
        if let Some(country) = q.country {
            record.country_code = country.iso_code;
            record.country = country.names.unwrap_or_default();
        }
        if let Some(region) = q.subdivisions.and_then(|v| v.into_iter().next()) {
            record.region_code = region.iso_code;
            record.region = region.names.unwrap_or_default();
        }
        if let Some(city) = q.city {
            record.city = city.names.unwrap_or_default();
        }
        if let Some(location) = q.location {
            record.latitude = location.latitude;
            record.longitude = location.longitude;
            record.metro_code = location.metro_code;
            record.time_zone = location.time_zone;
        }
        if let Some(postal) = q.postal {
            record.postal_code = postal.code;
        }
        record
    }
}

/// A MaxMind DB (GeoIP2 / GeoLite2 / DB-IP city layout) held in memory.
pub struct MaxMindDb {
    reader: Reader<Vec<u8>>,
}

impl MaxMindDb {
    pub(super) fn parse(data: Vec<u8>) -> anyhow::Result<Self> {
        let reader =
            Reader::from_source(data).map_err(|e| anyhow!("invalid maxmind database: {e}"))?;
        Ok(MaxMindDb { reader })
    }

    pub(super) fn lookup(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, DatasetError> {
        match self.reader.lookup::<CityQuery>(ip) {
            Ok(q) => Ok(Some(q.into())),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(e) => Err(DatasetError::Query(e.to_string())),
        }
    }
}
