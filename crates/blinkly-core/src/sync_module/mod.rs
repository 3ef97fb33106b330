// ── Sync module (hub) ──
//
// One instance per hub. Owns the device map for its network, runs the
// throttled refresh cycle and reconciles the map against each snapshot.
// Reconciliation logic lives in `reconcile.rs`; this file holds the
// state machine, status reads and hub-level actions.

mod reconcile;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use blinkly_api::models::NetworkInfoResponse;
use blinkly_api::{Method, NetworkSnapshot, SessionManager};
use chrono::{DateTime, Utc};
use serde_json::json;
use strum::Display;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device::{Attributes, DeviceHandler, HubLink};
use crate::error::CoreError;
use crate::registry::DeviceRegistry;

pub use reconcile::{RefreshKind, RefreshOutcome, SkippedDevice};

/// Devices keyed by name.
pub type DeviceMap = BTreeMap<String, Arc<dyn DeviceHandler>>;

/// Refresh state machine. `Failed` is recoverable: the next refresh
/// moves back to `Refreshing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HubState {
    Uninitialized,
    Starting,
    Idle,
    Refreshing,
    Failed,
}

/// What kind of hub this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubKind {
    /// A physical sync module; one per network that has one.
    SyncModule,
    /// A pseudo-hub wrapping a single Wi-Fi device on a network without
    /// a sync module.
    Standalone { device_id: String },
}

/// Stable identity of a hub across snapshots.
pub fn hub_identity(network_id: &str, kind: &HubKind) -> String {
    match kind {
        HubKind::SyncModule => network_id.to_owned(),
        HubKind::Standalone { device_id } => format!("{network_id}:{device_id}"),
    }
}

/// Cached hub status from the last successful refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStatus {
    pub armed: Option<bool>,
    pub sync_id: Option<String>,
    pub serial: Option<String>,
    pub status: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_refresh`, used for throttling.
    pub last_refresh_at: Option<Instant>,
}

/// A hub and the devices it owns.
pub struct SyncModule {
    name: String,
    network_id: String,
    kind: HubKind,
    identity: String,
    session: Arc<SessionManager>,
    registry: Arc<DeviceRegistry>,
    refresh_interval: Duration,
    state: watch::Sender<HubState>,
    status: ArcSwap<HubStatus>,
    devices: ArcSwap<DeviceMap>,
    refreshing: AtomicBool,
}

impl SyncModule {
    pub fn new(
        name: impl Into<String>,
        network_id: impl Into<String>,
        kind: HubKind,
        session: Arc<SessionManager>,
        registry: Arc<DeviceRegistry>,
        refresh_interval: Duration,
    ) -> Self {
        let network_id = network_id.into();
        let identity = hub_identity(&network_id, &kind);
        let (state, _) = watch::channel(HubState::Uninitialized);
        Self {
            name: name.into(),
            network_id,
            kind,
            identity,
            session,
            registry,
            refresh_interval,
            state,
            status: ArcSwap::from_pointee(HubStatus::default()),
            devices: ArcSwap::from_pointee(DeviceMap::new()),
            refreshing: AtomicBool::new(false),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn kind(&self) -> &HubKind {
        &self.kind
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<HubState> {
        self.state.subscribe()
    }

    /// Cached armed state. Pure read, no network call.
    pub fn get_status(&self) -> Option<bool> {
        self.status.load().armed
    }

    pub fn status(&self) -> Arc<HubStatus> {
        self.status.load_full()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.status.load().last_refresh
    }

    /// Current device map. Cheap: shares the committed map.
    pub fn devices(&self) -> Arc<DeviceMap> {
        self.devices.load_full()
    }

    pub fn camera(&self, name: &str) -> Option<Arc<dyn DeviceHandler>> {
        self.devices.load().get(name).cloned()
    }

    pub fn attributes(&self) -> Attributes {
        let status = self.status.load();
        let mut attrs = Attributes::new();
        attrs.insert("name".into(), json!(self.name));
        attrs.insert("id".into(), json!(status.sync_id));
        attrs.insert("network_id".into(), json!(self.network_id));
        attrs.insert("serial".into(), json!(status.serial));
        attrs.insert("status".into(), json!(status.status));
        attrs.insert("armed".into(), json!(status.armed));
        attrs.insert(
            "last_refresh".into(),
            json!(status.last_refresh.map(|t| t.to_rfc3339())),
        );
        attrs
    }

    pub(crate) fn link(&self) -> HubLink {
        HubLink {
            identity: self.identity.clone(),
            name: self.name.clone(),
            network_id: self.network_id.clone(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// First discovery from `snapshot`. Returns `false` when the hub's
    /// own status could not be fetched; the hub is then `Failed` and the
    /// next refresh retries.
    pub async fn start(&self, snapshot: &NetworkSnapshot) -> bool {
        matches!(
            self.try_start(snapshot).await,
            Ok(RefreshOutcome {
                kind: RefreshKind::Refreshed,
                ..
            })
        )
    }

    /// [`start`](Self::start) with the full outcome.
    pub async fn try_start(&self, snapshot: &NetworkSnapshot) -> Result<RefreshOutcome, CoreError> {
        let Some(guard) = RefreshGuard::acquire(self, HubState::Starting) else {
            debug!(hub = %self.name, "start skipped: refresh in flight");
            return Ok(RefreshOutcome::coalesced(self.get_status()));
        };
        match self.reconcile(snapshot).await {
            Ok(outcome) => {
                guard.finish(HubState::Idle);
                info!(
                    hub = %self.name,
                    devices = outcome.added.len(),
                    skipped = outcome.skipped.len(),
                    "hub started"
                );
                Ok(outcome)
            }
            Err(e) => {
                guard.finish(HubState::Failed);
                warn!(hub = %self.name, error = %e, "hub start failed");
                Err(e)
            }
        }
    }

    /// Fetch a fresh snapshot and reconcile against it.
    ///
    /// Non-forced calls inside the refresh interval return
    /// `RefreshKind::Throttled` without a network call; calls made while
    /// a refresh is running return `RefreshKind::Coalesced`.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, CoreError> {
        if let Some(outcome) = self.throttled(force) {
            return Ok(outcome);
        }
        let Some(guard) = RefreshGuard::acquire(self, HubState::Refreshing) else {
            return Ok(RefreshOutcome::coalesced(self.get_status()));
        };
        let result = match self.fetch_snapshot().await {
            Ok(snapshot) => self.reconcile(&snapshot).await,
            Err(e) => Err(e),
        };
        self.finish_refresh(guard, result)
    }

    /// Reconcile against a snapshot the caller already fetched.
    pub async fn refresh_from(
        &self,
        snapshot: &NetworkSnapshot,
        force: bool,
    ) -> Result<RefreshOutcome, CoreError> {
        if let Some(outcome) = self.throttled(force) {
            return Ok(outcome);
        }
        let Some(guard) = RefreshGuard::acquire(self, HubState::Refreshing) else {
            return Ok(RefreshOutcome::coalesced(self.get_status()));
        };
        let result = self.reconcile(snapshot).await;
        self.finish_refresh(guard, result)
    }

    fn throttled(&self, force: bool) -> Option<RefreshOutcome> {
        if force {
            return None;
        }
        let status = self.status.load();
        let last = status.last_refresh_at?;
        (last.elapsed() < self.refresh_interval).then(|| {
            debug!(hub = %self.name, "refresh throttled");
            RefreshOutcome::throttled(status.armed)
        })
    }

    fn finish_refresh(
        &self,
        guard: RefreshGuard<'_>,
        result: Result<RefreshOutcome, CoreError>,
    ) -> Result<RefreshOutcome, CoreError> {
        match &result {
            Ok(outcome) => {
                guard.finish(HubState::Idle);
                if outcome.is_partial() {
                    warn!(hub = %self.name, stale = ?outcome.stale, "refresh completed with stale devices");
                } else {
                    debug!(hub = %self.name, "refresh complete");
                }
            }
            Err(e) => {
                guard.finish(HubState::Failed);
                warn!(hub = %self.name, error = %e, "hub refresh failed");
            }
        }
        result
    }

    async fn fetch_snapshot(&self) -> Result<NetworkSnapshot, CoreError> {
        let url = self
            .session
            .endpoints()?
            .homescreen(&self.session.account_id()?)?;
        Ok(self.session.get_json(url).await?)
    }

    /// Hub-level status for this refresh. A real sync module needs a
    /// network call for its armed flag; a standalone hub reads everything
    /// from the snapshot.
    async fn fetch_status(&self, snapshot: &NetworkSnapshot) -> Result<HubStatus, CoreError> {
        match &self.kind {
            HubKind::SyncModule => {
                let summary = snapshot.sync_module_for(&self.network_id).ok_or_else(|| {
                    CoreError::HubNotFound {
                        identifier: self.identity.clone(),
                    }
                })?;
                let url = self.session.endpoints()?.network(&self.network_id)?;
                let info: NetworkInfoResponse = self.session.get_json(url).await?;
                Ok(HubStatus {
                    armed: Some(info.network.armed),
                    sync_id: Some(summary.id.clone()),
                    serial: summary.serial.clone(),
                    status: summary.status.clone(),
                    ..HubStatus::default()
                })
            }
            HubKind::Standalone { device_id } => {
                let (_, entry) = snapshot
                    .devices()
                    .find(|(list, e)| list.can_stand_alone() && e.id == *device_id)
                    .ok_or_else(|| CoreError::HubNotFound {
                        identifier: self.identity.clone(),
                    })?;
                Ok(HubStatus {
                    armed: snapshot.network(&self.network_id).map(|n| n.armed),
                    sync_id: Some(entry.id.clone()),
                    serial: entry.serial.clone(),
                    status: Some(if entry.enabled { "online" } else { "offline" }.into()),
                    ..HubStatus::default()
                })
            }
        }
    }

    // ── Hub actions ──────────────────────────────────────────────────

    /// Arm or disarm the hub. Returns the raw response status.
    ///
    /// A standalone hub forwards to its single device.
    pub async fn arm(&self, armed: bool) -> Result<u16, CoreError> {
        match &self.kind {
            HubKind::SyncModule => {
                let url = self.session.endpoints()?.network_arm(
                    &self.session.account_id()?,
                    &self.network_id,
                    armed,
                )?;
                let response = self.session.request(Method::POST, url, None).await?;
                Ok(response.status)
            }
            HubKind::Standalone { .. } => {
                let device = self
                    .devices
                    .load()
                    .values()
                    .next()
                    .cloned()
                    .ok_or_else(|| CoreError::DeviceNotFound {
                        name: self.name.clone(),
                    })?;
                device.arm(armed).await
            }
        }
    }
}

// ── Refresh guard ────────────────────────────────────────────────────

/// Single-refresh-per-hub guard.
///
/// Dropping it without `finish` (the refresh future was abandoned)
/// restores the state the hub was in before the refresh began.
struct RefreshGuard<'a> {
    hub: &'a SyncModule,
    previous: HubState,
    finished: bool,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(hub: &'a SyncModule, state: HubState) -> Option<Self> {
        if hub
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let previous = hub.state.send_replace(state);
        Some(Self {
            hub,
            previous,
            finished: false,
        })
    }

    fn finish(mut self, state: HubState) {
        self.hub.state.send_replace(state);
        self.finished = true;
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(hub = %self.hub.name, "refresh abandoned");
            self.hub.state.send_replace(self.previous);
        }
        self.hub.refreshing.store(false, Ordering::Release);
    }
}
