/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Hot reloaded IP geolocation dataset.
//!
//! A [`DatasetManager`] keeps exactly one parsed dataset in service while it is
//! replaced in the background, either when the local file changes or when a
//! newer copy has been downloaded from a remote location.

mod error;
pub use error::DatasetError;

mod source;
pub use source::{DEFAULT_CACHE_FILE, DatasetSource};

mod record;
pub use record::{GeoIpRecord, LocalizedNames};

pub mod db;
pub use db::{DatabaseFormat, GeoIpDatabase};

mod handle;
pub use handle::{DatasetHandle, DatasetLoader, Fingerprint};

mod notify;
pub use notify::{ClosedSignal, DatasetSubscription, Notifier, OpenedEvent, OpenedReceiver};

mod store;
pub use store::{DatasetStore, SwapOutcome};

mod watch;

pub mod update;
pub use update::{DatasetFetcher, FetchOutcome, HttpFetcher, UpdatePolicy};

mod config;
pub use config::DatasetConfig;

mod manager;
pub use manager::{DatasetManager, ManagerState};
