/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use log::debug;

use crate::{DatasetError, DatasetHandle, GeoIpRecord, Notifier, OpenedEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapOutcome {
    /// the new handle is now in service
    Installed,
    /// the new handle has the same content as the active one and is dropped
    Unchanged,
    /// the store has been closed and the new handle is dropped
    Rejected,
}

struct ActiveDataset {
    handle: DatasetHandle,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct WriterState {
    closed: bool,
    last_updated: Option<DateTime<Utc>>,
}

/// Single slot holder of the dataset in service.
///
/// Readers load the slot without locking. Writers, which are swap and close,
/// are serialized by the writer mutex, so that no handle is installed after
/// close. Only the store drops handles that have been passed to it.
pub struct DatasetStore {
    active: ArcSwapOption<ActiveDataset>,
    writer: Mutex<WriterState>,
    notifier: Arc<Notifier>,
}

impl DatasetStore {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        DatasetStore {
            active: ArcSwapOption::new(None),
            writer: Mutex::new(WriterState::default()),
            notifier,
        }
    }

    pub fn swap(&self, handle: DatasetHandle) -> SwapOutcome {
        let mut state = self.writer.lock().unwrap();
        if state.closed {
            debug!("store closed, drop dataset {}", handle.fingerprint());
            return SwapOutcome::Rejected;
        }

        if let Some(cur) = self.active.load().as_ref() {
            if cur.handle.fingerprint() == handle.fingerprint() {
                debug!("dataset {} is already in service", handle.fingerprint());
                return SwapOutcome::Unchanged;
            }
        }

        let updated_at = match state.last_updated {
            Some(last) if last > handle.loaded_at() => last,
            _ => handle.loaded_at(),
        };
        state.last_updated = Some(updated_at);

        let event = OpenedEvent {
            source: handle.source().clone(),
            loaded_at: handle.loaded_at(),
            fingerprint: handle.fingerprint(),
        };
        let old = self
            .active
            .swap(Some(Arc::new(ActiveDataset { handle, updated_at })));
        // readers still holding the old one keep it alive until they finish
        drop(old);

        self.notifier.send_opened(event);
        SwapOutcome::Installed
    }

    pub fn lookup(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, DatasetError> {
        let Some(active) = self.active.load_full() else {
            return Err(DatasetError::Unavailable);
        };
        active.handle.lookup(ip)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.active.load().as_ref().map(|a| a.updated_at)
    }

    /// Run `f` against the handle in service, if any.
    pub fn with_active<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&DatasetHandle) -> R,
    {
        self.active.load().as_ref().map(|a| f(&a.handle))
    }

    pub fn is_closed(&self) -> bool {
        self.writer.lock().unwrap().closed
    }

    pub fn close(&self) {
        let mut state = self.writer.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        let old = self.active.swap(None);
        drop(old);
        self.notifier.fire_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::str::FromStr;

    use crate::{DatabaseFormat, DatasetSource, Fingerprint, GeoIpDatabase};

    fn handle(city: &str) -> DatasetHandle {
        let data = format!(
            "200.1.2.0/24,VE,Venezuela,,,{city},,,,,,SA,South America\n# rows=1\n"
        );
        let fingerprint = Fingerprint::of(data.as_bytes());
        let db = GeoIpDatabase::parse(data.into_bytes(), DatabaseFormat::NativeCsv).unwrap();
        let source = Arc::new(DatasetSource::Local(PathBuf::from("city.csv")));
        DatasetHandle::new(db, source, fingerprint)
    }

    fn city(store: &DatasetStore) -> String {
        let r = store
            .lookup(IpAddr::from_str("200.1.2.3").unwrap())
            .unwrap()
            .unwrap();
        r.city_name("en").unwrap().to_string()
    }

    #[tokio::test]
    async fn swap_and_lookup() {
        let notifier = Arc::new(Notifier::new(8));
        let mut sub = notifier.subscribe();
        let store = DatasetStore::new(notifier);

        assert!(store.lookup(IpAddr::from_str("200.1.2.3").unwrap()).unwrap_err().is_unavailable());
        assert!(store.last_updated().is_none());

        assert_eq!(store.swap(handle("Caracas")), SwapOutcome::Installed);
        assert_eq!(city(&store), "Caracas");
        let t1 = store.last_updated().unwrap();
        assert!(sub.opened.recv().await.is_ok());

        assert_eq!(store.swap(handle("Maracay")), SwapOutcome::Installed);
        assert_eq!(city(&store), "Maracay");
        assert!(store.last_updated().unwrap() >= t1);
        assert!(sub.opened.recv().await.is_ok());

        assert_eq!(store.swap(handle("Maracay")), SwapOutcome::Unchanged);
        assert!(sub.opened.try_recv().is_err());

        let r = store.lookup(IpAddr::from_str("127.0.0.1").unwrap()).unwrap();
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn close_releases_once() {
        let notifier = Arc::new(Notifier::new(8));
        let mut sub = notifier.subscribe();
        let store = DatasetStore::new(notifier);

        store.swap(handle("Caracas"));
        let _ = sub.opened.recv().await;

        store.close();
        assert!(store.is_closed());
        assert!(sub.closed.is_closed());
        assert!(store.last_updated().is_none());
        assert!(store.with_active(|_| ()).is_none());
        assert!(store.lookup(IpAddr::from_str("200.1.2.3").unwrap()).unwrap_err().is_unavailable());

        store.close();
        assert!(store.is_closed());

        // late installs are refused without notification
        assert_eq!(store.swap(handle("Maracay")), SwapOutcome::Rejected);
        assert!(sub.opened.try_recv().is_err());
        assert!(store.lookup(IpAddr::from_str("200.1.2.3").unwrap()).unwrap_err().is_unavailable());
    }

    #[test]
    fn concurrent_readers_see_whole_handles() {
        let notifier = Arc::new(Notifier::new(8));
        let store = Arc::new(DatasetStore::new(notifier));
        store.swap(handle("Caracas"));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let c = city(&store);
                        assert!(c == "Caracas" || c == "Maracay", "unexpected city {c}");
                    }
                })
            })
            .collect();
        for i in 0..100 {
            let name = if i % 2 == 0 { "Maracay" } else { "Caracas" };
            store.swap(handle(name));
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
