/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;

use crate::{DatabaseFormat, DatasetError, DatasetSource, GeoIpDatabase, GeoIpRecord};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Hash of the decompressed dataset content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(data: &[u8]) -> Self {
        Fingerprint(*blake3::hash(data).as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// A parsed dataset together with where and when it was loaded.
///
/// The handle is immutable. The database it owns is released when the handle
/// is dropped.
pub struct DatasetHandle {
    db: GeoIpDatabase,
    source: Arc<DatasetSource>,
    loaded_at: DateTime<Utc>,
    fingerprint: Fingerprint,
}

impl DatasetHandle {
    pub fn new(db: GeoIpDatabase, source: Arc<DatasetSource>, fingerprint: Fingerprint) -> Self {
        DatasetHandle {
            db,
            source,
            loaded_at: Utc::now(),
            fingerprint,
        }
    }

    #[inline]
    pub fn source(&self) -> &Arc<DatasetSource> {
        &self.source
    }

    #[inline]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    #[inline]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    #[inline]
    pub fn format(&self) -> DatabaseFormat {
        self.db.format()
    }

    pub fn lookup(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, DatasetError> {
        self.db.lookup(ip)
    }
}

impl fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("source", &self.source)
            .field("format", &self.db.format())
            .field("loaded_at", &self.loaded_at)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Builds [`DatasetHandle`]s from files on disk.
#[derive(Clone)]
pub struct DatasetLoader {
    source: Arc<DatasetSource>,
    format: DatabaseFormat,
}

impl DatasetLoader {
    pub fn new(source: Arc<DatasetSource>, format: DatabaseFormat) -> Self {
        DatasetLoader { source, format }
    }

    #[inline]
    pub fn source(&self) -> &Arc<DatasetSource> {
        &self.source
    }

    /// Read, decompress if needed, fingerprint and parse the file at `path`.
    ///
    /// This does blocking IO and CPU heavy parsing, call it on a blocking thread.
    pub fn load(&self, path: &Path) -> anyhow::Result<DatasetHandle> {
        let data = read_dataset(path)?;
        let fingerprint = Fingerprint::of(&data);
        let db = GeoIpDatabase::parse(data, self.format)
            .map_err(|e| anyhow!("invalid dataset file {}: {e}", path.display()))?;
        Ok(DatasetHandle::new(db, self.source.clone(), fingerprint))
    }

    pub(crate) async fn load_blocking(&self, path: &Path) -> anyhow::Result<DatasetHandle> {
        let loader = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| anyhow!("dataset load task failed: {e}"))?
    }
}

fn read_dataset(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut f =
        File::open(path).map_err(|e| anyhow!("failed to open file {}: {e}", path.display()))?;
    let mut raw = Vec::new();
    f.read_to_end(&mut raw)
        .map_err(|e| anyhow!("failed to read file {}: {e}", path.display()))?;

    if raw.starts_with(&GZIP_MAGIC) {
        let mut data = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut data)
            .map_err(|e| anyhow!("failed to decompress gzip file {}: {e}", path.display()))?;
        Ok(data)
    } else {
        Ok(raw)
    }
}
