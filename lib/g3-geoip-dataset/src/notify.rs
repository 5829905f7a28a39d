/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::{DatasetError, DatasetSource, Fingerprint};

#[derive(Clone, Debug)]
pub struct OpenedEvent {
    pub source: Arc<DatasetSource>,
    pub loaded_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

/// Fan out of dataset lifecycle events.
///
/// Every subscriber has its own buffer for each stream. A slow subscriber only
/// lags behind, it never blocks the sender or the other subscribers.
///
/// A new subscription starts with the opened event of the dataset in service,
/// so the initial load is seen by subscribers created after it.
pub struct Notifier {
    current: Mutex<Option<OpenedEvent>>,
    opened: broadcast::Sender<OpenedEvent>,
    error: broadcast::Sender<Arc<DatasetError>>,
    info: broadcast::Sender<Arc<str>>,
    closed: CancellationToken,
}

impl Notifier {
    pub fn new(channel_capacity: usize) -> Self {
        let channel_capacity = channel_capacity.max(1);
        let (opened, _) = broadcast::channel(channel_capacity);
        let (error, _) = broadcast::channel(channel_capacity);
        let (info, _) = broadcast::channel(channel_capacity);
        Notifier {
            current: Mutex::new(None),
            opened,
            error,
            info,
            closed: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> DatasetSubscription {
        let current = self.current.lock().unwrap();
        DatasetSubscription {
            opened: OpenedReceiver {
                current: current.clone(),
                rx: self.opened.subscribe(),
            },
            error: self.error.subscribe(),
            info: self.info.subscribe(),
            closed: ClosedSignal(self.closed.clone()),
        }
    }

    pub(crate) fn send_opened(&self, event: OpenedEvent) {
        let mut current = self.current.lock().unwrap();
        *current = Some(event.clone());
        let _ = self.opened.send(event);
    }

    pub(crate) fn send_error(&self, e: DatasetError) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self.error.send(Arc::new(e));
    }

    pub(crate) fn send_info<T: Into<Arc<str>>>(&self, msg: T) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self.info.send(msg.into());
    }

    pub(crate) fn fire_closed(&self) {
        self.current.lock().unwrap().take();
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Receiving side of all four notification streams.
pub struct DatasetSubscription {
    pub opened: OpenedReceiver,
    pub error: broadcast::Receiver<Arc<DatasetError>>,
    pub info: broadcast::Receiver<Arc<str>>,
    pub closed: ClosedSignal,
}

/// Opened events, starting with the dataset in service at subscribe time.
pub struct OpenedReceiver {
    current: Option<OpenedEvent>,
    rx: broadcast::Receiver<OpenedEvent>,
}

impl OpenedReceiver {
    pub async fn recv(&mut self) -> Result<OpenedEvent, RecvError> {
        match self.current.take() {
            Some(ev) => Ok(ev),
            None => self.rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Result<OpenedEvent, TryRecvError> {
        match self.current.take() {
            Some(ev) => Ok(ev),
            None => self.rx.try_recv(),
        }
    }
}

/// One shot signal fired once the dataset store is closed.
#[derive(Clone)]
pub struct ClosedSignal(CancellationToken);

impl ClosedSignal {
    pub async fn wait(&self) {
        self.0.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }
}
