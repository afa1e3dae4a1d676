//! Background sync loop and control API.
//!
//! One worker task runs for the life of the service. While active it runs a
//! cycle (build request, exchange, apply) and then sleeps for the poll
//! interval. `sync_now` runs a cycle immediately. A single-flight guard keeps
//! the two from ever selecting overlapping batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::services::LocalStore;
use crate::state::{ConnectionState, SyncStatus};
use crate::sync::apply::ApplyReport;
use crate::sync::request::{BatchLimits, ClientIdentity};
use crate::sync::transport::{HttpTransport, SyncTransport, TransportError};
use crate::util::unix_timestamp_millis;

type ConnectedCallback = Box<dyn Fn() + Send + Sync>;
type DisconnectedCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Listeners fired when the connection state changes
#[derive(Default)]
pub struct StatusCallbacks {
    connected: Option<ConnectedCallback>,
    disconnected: Option<DisconnectedCallback>,
}

impl StatusCallbacks {
    #[must_use]
    pub fn on_connected(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.connected = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_disconnected(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Box::new(callback));
        self
    }
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CycleOutcome {
    Accepted,
    /// The service answered without `Success`
    Rejected,
    /// No usable response (timeout, connection, HTTP status, body)
    Failed(String),
}

/// Result of one sync cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub sent_changes: usize,
    pub polled_groups: usize,
    pub apply: ApplyReport,
}

#[derive(Debug, Default)]
struct StatusCell {
    state: ConnectionState,
    last_error: Option<String>,
    last_synced_at: Option<i64>,
}

struct ServiceInner {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    identity: ClientIdentity,
    limits: BatchLimits,
    poll_interval: Duration,
    request_timeout: Duration,
    active: AtomicBool,
    worker_started: AtomicBool,
    cycle_guard: tokio::sync::Mutex<()>,
    status: Mutex<StatusCell>,
    callbacks: StatusCallbacks,
}

/// Handle to the sync engine. Clones share one worker.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
}

impl SyncService {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        settings: &SyncSettings,
        callbacks: StatusCallbacks,
    ) -> Self {
        let identity = ClientIdentity {
            app_id: settings.app_id.clone(),
            device_id: store.device_id().to_string(),
            app_api_access_key: settings.app_api_access_key.clone(),
        };

        Self {
            inner: Arc::new(ServiceInner {
                store,
                transport,
                identity,
                limits: settings.batch_limits(),
                poll_interval: settings.poll_interval(),
                request_timeout: settings.request_timeout(),
                active: AtomicBool::new(false),
                worker_started: AtomicBool::new(false),
                cycle_guard: tokio::sync::Mutex::new(()),
                status: Mutex::new(StatusCell::default()),
                callbacks,
            }),
        }
    }

    /// Service talking to `settings.endpoint` over HTTP
    pub fn connect(
        store: LocalStore,
        settings: &SyncSettings,
        callbacks: StatusCallbacks,
    ) -> Result<Self> {
        let transport = HttpTransport::new(settings.endpoint.clone(), settings.request_timeout())?;
        Ok(Self::new(store, Arc::new(transport), settings, callbacks))
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    /// Activate periodic syncing, spawning the worker on first use.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Config("sync service requires a Tokio runtime".to_string()))?;

        self.inner.active.store(true, Ordering::SeqCst);
        if !self.inner.worker_started.swap(true, Ordering::SeqCst) {
            handle.spawn(run_worker(Arc::downgrade(&self.inner)));
            info!(
                "Sync worker started (interval {} ms)",
                self.inner.poll_interval.as_millis()
            );
        }
        Ok(())
    }

    /// Pause periodic syncing. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        debug!("Sync worker paused");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Run one cycle now, waiting for any cycle already in flight
    pub async fn sync_now(&self) -> Result<CycleReport> {
        self.inner.run_cycle().await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .status
            .lock()
            .map_or(ConnectionState::Disconnected, |status| status.state)
    }

    pub fn status(&self) -> Result<SyncStatus> {
        let pending_changes = self.inner.store.pending_count()?;
        let status = self
            .inner
            .status
            .lock()
            .map_err(|_| Error::LockPoisoned("sync status".to_string()))?;

        Ok(SyncStatus {
            state: status.state,
            active: self.is_active(),
            pending_changes,
            last_error: status.last_error.clone(),
            last_synced_at: status.last_synced_at,
        })
    }
}

async fn run_worker(inner: Weak<ServiceInner>) {
    loop {
        let Some(service) = inner.upgrade() else {
            break;
        };

        if service.active.load(Ordering::SeqCst) {
            if let Err(error) = service.run_cycle().await {
                warn!("Sync cycle failed: {error}");
            }
        }

        let interval = service.poll_interval;
        drop(service);
        tokio::time::sleep(interval).await;
    }
    debug!("Sync worker exited");
}

impl ServiceInner {
    async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_guard.lock().await;

        let batch = self
            .store
            .build_request(&self.identity, self.limits, unix_timestamp_millis())?;
        let sent_changes = batch.change_ids.len();
        let polled_groups = batch.request.groups.len();
        debug!("Sending {sent_changes} changes, polling {polled_groups} groups");

        let exchanged =
            tokio::time::timeout(self.request_timeout, self.transport.exchange(&batch.request))
                .await
                .unwrap_or(Err(TransportError::Timeout));
        let response = match exchanged {
            Ok(response) => response,
            Err(error) => {
                let reason = error.to_string();
                self.mark_disconnected(&reason);
                return Ok(CycleReport {
                    outcome: CycleOutcome::Failed(reason),
                    sent_changes,
                    polled_groups,
                    apply: ApplyReport::default(),
                });
            }
        };

        let apply =
            self.store
                .apply_response(&response, &batch.change_ids, unix_timestamp_millis())?;
        let outcome = if apply.accepted {
            self.mark_connected();
            debug!(
                "Sync cycle applied {} changes, {} deletes, {} deferred, {} skipped",
                apply.applied, apply.deleted, apply.deferred, apply.skipped
            );
            CycleOutcome::Accepted
        } else {
            self.mark_disconnected("sync service did not report success");
            CycleOutcome::Rejected
        };

        Ok(CycleReport {
            outcome,
            sent_changes,
            polled_groups,
            apply,
        })
    }

    fn mark_connected(&self) {
        let changed = self.update_status(|status| {
            let changed = status.state != ConnectionState::Connected;
            status.state = ConnectionState::Connected;
            status.last_error = None;
            status.last_synced_at = Some(unix_timestamp_millis());
            changed
        });

        if changed {
            info!("Sync connected");
            if let Some(callback) = &self.callbacks.connected {
                callback();
            }
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        warn!("Sync cycle failed: {reason}");
        let changed = self.update_status(|status| {
            let changed = status.state != ConnectionState::Disconnected;
            status.state = ConnectionState::Disconnected;
            status.last_error = Some(reason.to_string());
            changed
        });

        if changed {
            if let Some(callback) = &self.callbacks.disconnected {
                callback(reason);
            }
        }
    }

    /// Callbacks run after the lock is released
    fn update_status(&self, update: impl FnOnce(&mut StatusCell) -> bool) -> bool {
        match self.status.lock() {
            Ok(mut status) => update(&mut status),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}
