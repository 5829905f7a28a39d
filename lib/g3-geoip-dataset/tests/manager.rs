/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{Semaphore, broadcast};
use url::Url;

use g3_geoip_dataset::{
    DatasetConfig, DatasetError, DatasetFetcher, DatasetManager, DatasetSource, FetchOutcome,
    ManagerState, OpenedEvent, OpenedReceiver, UpdatePolicy,
};

const FIXTURE: &str = include_str!("../testdata/city.csv");
const MARACAY: &str = "200.1.2.0/24,VE,Venezuela,D,Aragua,Maracay,2101,America/Caracas,10.24694,-67.59583,,SA,South America\n# rows=1\n";
const EVENT_WAIT: Duration = Duration::from_secs(10);

fn caracas_ip() -> IpAddr {
    IpAddr::from_str("200.1.2.3").unwrap()
}

fn city_of(manager: &DatasetManager) -> String {
    let record = manager.resolve(caracas_ip()).unwrap().unwrap();
    record.city_name("en").unwrap().to_string()
}

fn write_fixture(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, FIXTURE).unwrap();
    path
}

async fn recv_within<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("no event received in time")
        .expect("event channel closed")
}

async fn recv_opened(rx: &mut OpenedReceiver) -> OpenedEvent {
    tokio::time::timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("no opened event received in time")
        .expect("opened channel closed")
}

async fn wait_until<F: Fn() -> bool>(f: F) {
    tokio::time::timeout(EVENT_WAIT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

enum Step {
    Data(Vec<u8>),
    NotModified,
    Fail,
}

/// Fetcher that replays a script, each call waits for a permit.
struct ScriptedFetcher {
    gate: Semaphore,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl ScriptedFetcher {
    fn new(steps: Vec<Step>, permits: usize) -> Arc<Self> {
        Arc::new(ScriptedFetcher {
            gate: Semaphore::new(permits),
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            since: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    async fn wait_calls(&self, n: usize) {
        tokio::time::timeout(EVENT_WAIT, async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("fetcher not called in time");
    }
}

#[async_trait]
impl DatasetFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        _url: &Url,
        if_modified_since: Option<DateTime<Utc>>,
        dest: &mut File,
    ) -> anyhow::Result<FetchOutcome> {
        self.gate.acquire().await?.forget();
        self.since.lock().unwrap().push(if_modified_since);
        let step = self.steps.lock().unwrap().pop_front();
        let r = match step {
            Some(Step::Data(data)) => {
                dest.write_all(&data).await?;
                Ok(FetchOutcome::Downloaded(data.len() as u64))
            }
            Some(Step::NotModified) => Ok(FetchOutcome::NotModified),
            Some(Step::Fail) => Err(anyhow!("connection reset")),
            None => Err(anyhow!("no more scripted response")),
        };
        self.calls.fetch_add(1, Ordering::AcqRel);
        r
    }
}

fn remote_config(cache_path: &Path) -> DatasetConfig {
    let source = DatasetSource::parse("https://example.net/city.csv.gz", Some(cache_path));
    let mut config = DatasetConfig::new(source);
    config.set_update_interval(Duration::from_secs(3600));
    config.set_retry_interval(Duration::from_secs(3600));
    config.set_join_timeout(Duration::from_millis(500));
    config
}

fn download_leftovers(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".download"))
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_fixture_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "city.csv");

    let manager = DatasetManager::open(DatasetConfig::new(DatasetSource::Local(path)))
        .await
        .unwrap();
    assert_eq!(manager.state(), ManagerState::Ready);
    assert!(manager.last_updated().is_some());

    let record = manager.resolve(caracas_ip()).unwrap().unwrap();
    assert_eq!(record.city_name("en"), Some("Caracas"));
    assert_eq!(record.country_name("en"), Some("Venezuela"));

    let not_found = manager
        .resolve(IpAddr::from_str("127.0.0.1").unwrap())
        .unwrap();
    assert!(not_found.is_none());

    let sub = manager.subscribe();
    manager.close().await;
    assert!(sub.closed.is_closed());
    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(manager.resolve(caracas_ip()).unwrap_err().is_unavailable());
    assert!(manager.last_updated().is_none());

    manager.close().await;
    assert_eq!(manager.state(), ManagerState::Closed);
}

#[tokio::test]
async fn subscribe_after_open_sees_initial_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "city.csv");

    let mut config = DatasetConfig::new(DatasetSource::Local(path.clone()));
    config.set_watch(false);
    let manager = DatasetManager::open(config).await.unwrap();

    let mut sub = manager.subscribe();
    let ev = sub.opened.try_recv().unwrap();
    assert_eq!(ev.source.file_path(), path.as_path());
    assert_eq!(Some(ev.loaded_at), manager.last_updated());
    assert!(matches!(sub.opened.try_recv(), Err(TryRecvError::Empty)));

    let mut other = manager.subscribe();
    assert_eq!(other.opened.try_recv().unwrap().fingerprint, ev.fingerprint);

    manager.close().await;
    let mut late = manager.subscribe();
    assert!(late.opened.try_recv().is_err());
}

#[tokio::test]
async fn local_open_failure() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.csv");
    let r = DatasetManager::open(DatasetConfig::new(DatasetSource::Local(missing))).await;
    assert!(matches!(r, Err(DatasetError::Open(_))));

    let malformed = dir.path().join("malformed.csv");
    std::fs::write(&malformed, "this is not a dataset").unwrap();
    let r = DatasetManager::open(DatasetConfig::new(DatasetSource::Local(malformed))).await;
    assert!(matches!(r, Err(DatasetError::Open(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_reload_on_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "city.csv");

    let mut config = DatasetConfig::new(DatasetSource::Local(path.clone()));
    config.set_poll_interval(Duration::from_millis(100));
    let manager = DatasetManager::open(config).await.unwrap();
    let before = manager.last_updated().unwrap();
    let mut sub = manager.subscribe();
    let initial = sub.opened.try_recv().unwrap();

    // replace via rename, as deploy tools do
    let staged = dir.path().join("city.csv.new");
    std::fs::write(&staged, MARACAY).unwrap();
    std::fs::rename(&staged, &path).unwrap();

    let ev = recv_opened(&mut sub.opened).await;
    assert_eq!(ev.source.file_path(), path.as_path());
    assert_ne!(ev.fingerprint, initial.fingerprint);
    assert_eq!(city_of(&manager), "Maracay");
    assert!(manager.last_updated().unwrap() >= before);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_malformed_reload_keeps_previous() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "city.csv");

    let mut config = DatasetConfig::new(DatasetSource::Local(path.clone()));
    config.set_poll_interval(Duration::from_millis(100));
    let manager = DatasetManager::open(config).await.unwrap();
    let before = manager.last_updated();
    let mut sub = manager.subscribe();
    assert!(sub.opened.try_recv().is_ok());

    std::fs::write(&path, "200.1.2.0/24,VE,broken").unwrap();

    let e = recv_within(&mut sub.error).await;
    assert!(matches!(e.as_ref(), DatasetError::Reload(_)));
    assert_eq!(city_of(&manager), "Caracas");
    assert_eq!(manager.last_updated(), before);
    assert!(sub.opened.try_recv().is_err());

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_truncated_reload_keeps_previous() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "city.csv");

    let mut config = DatasetConfig::new(DatasetSource::Local(path.clone()));
    config.set_poll_interval(Duration::from_millis(100));
    let manager = DatasetManager::open(config).await.unwrap();
    let before = manager.last_updated();
    let mut sub = manager.subscribe();
    assert!(sub.opened.try_recv().is_ok());

    // cut at a row boundary, every remaining row is well formed
    let cut = FIXTURE.find("8.8.8.0/24").unwrap();
    std::fs::write(&path, &FIXTURE[..cut]).unwrap();

    let e = recv_within(&mut sub.error).await;
    assert!(matches!(e.as_ref(), DatasetError::Reload(_)));
    let record = manager
        .resolve(IpAddr::from_str("8.8.8.8").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(record.city_name("en"), Some("Mountain View"));
    assert_eq!(manager.last_updated(), before);
    assert!(sub.opened.try_recv().is_err());

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_without_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("db.csv");

    let fetcher = ScriptedFetcher::new(vec![Step::Data(FIXTURE.as_bytes().to_vec())], 0);
    let manager = tokio::time::timeout(
        Duration::from_secs(2),
        DatasetManager::open_with_fetcher(remote_config(&cache), fetcher.clone()),
    )
    .await
    .expect("open should not wait for the download")
    .unwrap();
    assert_eq!(manager.state(), ManagerState::Ready);
    assert!(manager.resolve(caracas_ip()).unwrap_err().is_unavailable());
    assert!(manager.last_updated().is_none());

    let mut sub = manager.subscribe();
    fetcher.gate.add_permits(1);

    let ev = recv_opened(&mut sub.opened).await;
    assert!(ev.source.is_remote());
    assert_eq!(city_of(&manager), "Caracas");
    assert!(cache.exists());

    // the watcher sees the installed file too, but must not swap it in again
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(sub.opened.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(download_leftovers(dir.path()), 0);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_if_missing_uses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = write_fixture(dir.path(), "db.csv");

    let fetcher = ScriptedFetcher::new(vec![Step::Data(MARACAY.as_bytes().to_vec())], 8);
    let manager = DatasetManager::open_with_fetcher(remote_config(&cache), fetcher.clone())
        .await
        .unwrap();
    assert_eq!(city_of(&manager), "Caracas");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(city_of(&manager), "Caracas");

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_if_modified_not_modified() {
    let dir = tempfile::tempdir().unwrap();
    let cache = write_fixture(dir.path(), "db.csv");

    let fetcher = ScriptedFetcher::new(vec![Step::NotModified], 8);
    let mut config = remote_config(&cache);
    config.set_update_policy(UpdatePolicy::IfModified);
    let manager = DatasetManager::open_with_fetcher(config, fetcher.clone())
        .await
        .unwrap();

    fetcher.wait_calls(1).await;
    assert!(fetcher.since.lock().unwrap()[0].is_some());
    assert_eq!(city_of(&manager), "Caracas");
    assert_eq!(download_leftovers(dir.path()), 0);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_if_modified_same_content() {
    let dir = tempfile::tempdir().unwrap();
    let cache = write_fixture(dir.path(), "db.csv");

    let fetcher = ScriptedFetcher::new(vec![Step::Data(FIXTURE.as_bytes().to_vec())], 0);
    let mut config = remote_config(&cache);
    config.set_update_policy(UpdatePolicy::IfModified);
    let manager = DatasetManager::open_with_fetcher(config, fetcher.clone())
        .await
        .unwrap();
    let mut sub = manager.subscribe();
    let initial = sub.opened.try_recv().unwrap();
    fetcher.gate.add_permits(1);

    loop {
        let msg = recv_within(&mut sub.info).await;
        if msg.as_ref() == "finished update" {
            break;
        }
    }
    // identical payload is not installed
    assert!(!dir.path().join("db.csv.bak").exists());
    assert!(sub.opened.try_recv().is_err());
    assert_eq!(
        manager.subscribe().opened.try_recv().unwrap().fingerprint,
        initial.fingerprint
    );
    assert_eq!(download_leftovers(dir.path()), 0);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_if_modified_new_content() {
    let dir = tempfile::tempdir().unwrap();
    let cache = write_fixture(dir.path(), "db.csv");

    let fetcher = ScriptedFetcher::new(vec![Step::Data(MARACAY.as_bytes().to_vec())], 0);
    let mut config = remote_config(&cache);
    config.set_update_policy(UpdatePolicy::IfModified);
    let manager = DatasetManager::open_with_fetcher(config, fetcher.clone())
        .await
        .unwrap();
    let mut sub = manager.subscribe();
    let initial = sub.opened.try_recv().unwrap();
    fetcher.gate.add_permits(1);

    let ev = recv_opened(&mut sub.opened).await;
    assert_ne!(ev.fingerprint, initial.fingerprint);
    assert_eq!(city_of(&manager), "Maracay");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("db.csv.bak")).unwrap(),
        FIXTURE
    );
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), MARACAY);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_failure_then_retry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("db.csv");

    let fetcher = ScriptedFetcher::new(
        vec![
            Step::Fail,
            Step::Data(b"garbage".to_vec()),
            Step::Data(FIXTURE.as_bytes().to_vec()),
        ],
        0,
    );
    let mut config = remote_config(&cache);
    config.set_retry_interval(Duration::from_millis(50));
    let manager = DatasetManager::open_with_fetcher(config, fetcher.clone())
        .await
        .unwrap();
    let mut sub = manager.subscribe();
    fetcher.gate.add_permits(3);

    let e = recv_within(&mut sub.error).await;
    assert!(matches!(e.as_ref(), DatasetError::Download(_)));
    // a corrupt payload is never installed
    let e = recv_within(&mut sub.error).await;
    assert!(matches!(e.as_ref(), DatasetError::Download(_)));

    let _ = recv_opened(&mut sub.opened).await;
    assert_eq!(city_of(&manager), "Caracas");
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(download_leftovers(dir.path()), 0);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_aborts_stuck_download() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("db.csv");

    let fetcher = ScriptedFetcher::new(vec![Step::Data(FIXTURE.as_bytes().to_vec())], 0);
    let manager = Arc::new(
        DatasetManager::open_with_fetcher(remote_config(&cache), fetcher.clone())
            .await
            .unwrap(),
    );
    let sub = manager.subscribe();
    wait_until(|| download_leftovers(dir.path()) == 1).await;

    // the fetch never returns, both callers wait for the join timeout
    let m1 = manager.clone();
    let m2 = manager.clone();
    tokio::join!(m1.close(), m2.close());
    assert!(sub.closed.is_closed());
    assert_eq!(manager.state(), ManagerState::Closed);

    fetcher.gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fetcher.calls(), 0);
    assert!(manager.resolve(caracas_ip()).unwrap_err().is_unavailable());
    assert_eq!(download_leftovers(dir.path()), 0);
    assert!(!cache.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_rejects_download_finished_during_close() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("db.csv");

    let fetcher = ScriptedFetcher::new(vec![Step::Data(FIXTURE.as_bytes().to_vec())], 0);
    let mut config = remote_config(&cache);
    config.set_join_timeout(Duration::from_secs(30));
    let manager = Arc::new(
        DatasetManager::open_with_fetcher(config, fetcher.clone())
            .await
            .unwrap(),
    );
    let mut sub = manager.subscribe();
    wait_until(|| download_leftovers(dir.path()) == 1).await;

    let closing = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.close().await })
    };
    wait_until(|| manager.state() == ManagerState::Closed).await;

    let released = Instant::now();
    fetcher.gate.add_permits(1);
    tokio::time::timeout(EVENT_WAIT, closing)
        .await
        .expect("close not finished in time")
        .unwrap();
    // the updater finished on its own, long before the join timeout
    assert!(released.elapsed() < Duration::from_secs(10));
    assert_eq!(fetcher.calls(), 1);

    // installed to disk for the next start, never put in service
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), FIXTURE);
    assert!(manager.resolve(caracas_ip()).unwrap_err().is_unavailable());
    assert!(manager.last_updated().is_none());
    assert!(sub.opened.try_recv().is_err());
    assert_eq!(download_leftovers(dir.path()), 0);
}
