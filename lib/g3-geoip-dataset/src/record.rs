/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

/// Names keyed by language code, e.g. `en` or `pt-BR`.
pub type LocalizedNames = BTreeMap<String, String>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeoIpRecord {
    pub continent_code: Option<String>,
    pub continent: LocalizedNames,
    pub country_code: Option<String>,
    pub country: LocalizedNames,
    pub region_code: Option<String>,
    pub region: LocalizedNames,
    pub city: LocalizedNames,
    pub postal_code: Option<String>,
    pub time_zone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub metro_code: Option<u32>,
}

impl GeoIpRecord {
    pub fn country_name(&self, lang: &str) -> Option<&str> {
        self.country.get(lang).map(|s| s.as_str())
    }

    pub fn city_name(&self, lang: &str) -> Option<&str> {
        self.city.get(lang).map(|s| s.as_str())
    }

    pub fn region_name(&self, lang: &str) -> Option<&str> {
        self.region.get(lang).map(|s| s.as_str())
    }

    pub fn continent_name(&self, lang: &str) -> Option<&str> {
        self.continent.get(lang).map(|s| s.as_str())
    }
}
