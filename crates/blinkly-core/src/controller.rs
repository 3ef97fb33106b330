// ── Controller abstraction ──
//
// Single entry point for one account. Owns the session, the device
// registry and every hub; drives the global refresh cycle (one snapshot
// fetch fanned out to all hubs) and the optional background refresh task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use blinkly_api::{
    CredentialStore, HttpTransport, LoginOutcome, NetworkSnapshot, SessionInfo, SessionManager,
    Transport,
};
use futures_util::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::device::DeviceHandler;
use crate::error::CoreError;
use crate::registry::DeviceRegistry;
use crate::sync_module::{HubKind, RefreshKind, RefreshOutcome, SyncModule, hub_identity};

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    VerificationRequired,
    Connected,
    Failed,
}

// ── Refresh report ───────────────────────────────────────────────

/// Per-hub result of a global refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum HubRefresh {
    Refreshed(RefreshOutcome),
    /// The hub's own status could not be fetched. Siblings are unaffected.
    Failed(String),
}

/// Result of [`Controller::refresh`].
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub kind: RefreshKind,
    /// Keyed by hub name.
    pub hubs: BTreeMap<String, HubRefresh>,
    pub added_hubs: Vec<String>,
    pub removed_hubs: Vec<String>,
}

impl RefreshReport {
    fn skipped(kind: RefreshKind) -> Self {
        Self {
            kind,
            hubs: BTreeMap::new(),
            added_hubs: Vec::new(),
            removed_hubs: Vec::new(),
        }
    }

    /// Names of hubs whose refresh failed.
    pub fn failed_hubs(&self) -> Vec<&str> {
        self.hubs
            .iter()
            .filter(|(_, r)| matches!(r, HubRefresh::Failed(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// A hub discovered in a snapshot, before it is matched against the
/// current set.
struct HubSpec {
    identity: String,
    name: String,
    network_id: String,
    kind: HubKind,
}

type HubMap = BTreeMap<String, Arc<SyncModule>>;

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    session: Arc<SessionManager>,
    registry: Arc<DeviceRegistry>,
    /// Keyed by hub identity.
    hubs: ArcSwap<HubMap>,
    last_snapshot: ArcSwapOption<NetworkSnapshot>,
    last_refresh_at: ArcSwapOption<Instant>,
    /// Held by whoever is rewriting the hub set: `start` waits on it,
    /// `refresh` coalesces when it is taken.
    refresh_gate: Mutex<()>,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller over `transport` with the default registry.
    /// Does NOT log in.
    pub fn new(config: ControllerConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_parts(config, transport, DeviceRegistry::default(), None)
    }

    /// Create a controller over the reqwest transport built from `config`.
    pub fn with_http(
        config: ControllerConfig,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> Result<Self, CoreError> {
        let transport = HttpTransport::new(&config.transport_config())?;
        Ok(Self::with_parts(
            config,
            Arc::new(transport),
            DeviceRegistry::default(),
            store,
        ))
    }

    /// Full constructor: custom registry and optional credential store.
    pub fn with_parts(
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        registry: DeviceRegistry,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> Self {
        let mut session = SessionManager::new(transport);
        if let Some(base) = &config.base_url {
            session = session.with_base_url(base.clone());
        }
        if let Some(store) = store {
            session = session.with_credential_store(store);
        }
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                session: Arc::new(session),
                registry: Arc::new(registry),
                hubs: ArcSwap::from_pointee(HubMap::new()),
                last_snapshot: ArcSwapOption::empty(),
                last_refresh_at: ArcSwapOption::empty(),
                refresh_gate: Mutex::new(()),
                connection_state,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// The shared session, for callers issuing their own requests.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    // ── Authentication ───────────────────────────────────────────

    /// Log in with the configured credentials.
    pub async fn login(&self) -> Result<LoginOutcome, CoreError> {
        self.set_state(ConnectionState::Authenticating);
        match self
            .inner
            .session
            .login(self.inner.config.auth.to_login())
            .await
        {
            Ok(outcome) => {
                self.set_state(if outcome.needs_verification() {
                    ConnectionState::VerificationRequired
                } else {
                    ConnectionState::Connected
                });
                Ok(outcome)
            }
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                Err(e.into())
            }
        }
    }

    /// Complete a pending login with the emailed PIN.
    pub async fn submit_2fa(&self, code: &str) -> Result<SessionInfo, CoreError> {
        let info = self.inner.session.submit_2fa(code).await?;
        self.set_state(ConnectionState::Connected);
        Ok(info)
    }

    /// Restore a persisted session instead of logging in. Returns `false`
    /// when the store holds no record.
    ///
    /// The configured credentials back re-login when the record carries no
    /// password; the record's `unique_id` is kept either way.
    pub fn restore(&self) -> Result<bool, CoreError> {
        self.inner
            .session
            .set_credentials(self.inner.config.auth.to_login());
        let restored = self.inner.session.restore_from_store()?.is_some();
        if restored {
            self.set_state(ConnectionState::Connected);
        }
        Ok(restored)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Discover hubs, start each one and spawn the background refresh.
    ///
    /// Requires an authenticated session. A hub whose start fails stays
    /// registered in the `Failed` state and is retried by later refreshes.
    /// Calling `start` again re-reads the snapshot but never spawns a second
    /// background task.
    pub async fn start(&self) -> Result<(), CoreError> {
        {
            let _gate = self.inner.refresh_gate.lock().await;
            let snapshot = self.fetch_snapshot().await?;
            let report = self.apply_snapshot(&snapshot).await;
            self.inner.last_refresh_at.store(Some(Arc::new(Instant::now())));
            self.inner.last_snapshot.store(Some(Arc::new(snapshot)));
            info!(hubs = report.added_hubs.len(), "controller started");
        }

        let period = self.inner.config.background_refresh;
        if period > Duration::ZERO {
            let mut handles = self.inner.task_handles.lock().await;
            if handles.is_empty() {
                let ctrl = self.clone();
                let cancel = self.inner.cancel.clone();
                handles.push(tokio::spawn(refresh_task(ctrl, period, cancel)));
            } else {
                debug!("background refresh already running");
            }
        }
        Ok(())
    }

    /// Refresh every hub from one freshly fetched snapshot.
    ///
    /// Non-forced calls inside the refresh interval are throttled; a call
    /// made while a global refresh is running is coalesced. A hub that
    /// fails is reported in the result; only a failed snapshot fetch
    /// fails the call.
    pub async fn refresh(&self, force: bool) -> Result<RefreshReport, CoreError> {
        if !force && self.throttled() {
            debug!("global refresh throttled");
            return Ok(RefreshReport::skipped(RefreshKind::Throttled));
        }
        let Ok(_gate) = self.inner.refresh_gate.try_lock() else {
            return Ok(RefreshReport::skipped(RefreshKind::Coalesced));
        };

        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                match e {
                    CoreError::TwoFactorRequired => {
                        self.set_state(ConnectionState::VerificationRequired);
                    }
                    _ if e.is_auth_failure() => self.set_state(ConnectionState::Failed),
                    _ => {}
                }
                warn!(error = %e, "snapshot fetch failed");
                return Err(e);
            }
        };

        let report = self.apply_snapshot(&snapshot).await;
        self.inner.last_refresh_at.store(Some(Arc::new(Instant::now())));
        self.inner.last_snapshot.store(Some(Arc::new(snapshot)));
        Ok(report)
    }

    /// Cancel background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.set_state(ConnectionState::Disconnected);
        debug!("controller shut down");
    }

    /// Shut down and drop the session.
    pub async fn logout(&self) {
        self.shutdown().await;
        self.inner.session.logout().await;
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn hubs(&self) -> Vec<Arc<SyncModule>> {
        self.inner.hubs.load().values().cloned().collect()
    }

    /// Look up a hub by name.
    pub fn hub(&self, name: &str) -> Option<Arc<SyncModule>> {
        self.inner
            .hubs
            .load()
            .values()
            .find(|h| h.name() == name)
            .cloned()
    }

    /// Look up a hub by identity (`network_id`, or `network_id:device_id`
    /// for standalone hubs).
    pub fn hub_by_identity(&self, identity: &str) -> Option<Arc<SyncModule>> {
        self.inner.hubs.load().get(identity).cloned()
    }

    /// Find a device by name across all hubs.
    pub fn camera(&self, name: &str) -> Option<Arc<dyn DeviceHandler>> {
        self.inner.hubs.load().values().find_map(|h| h.camera(name))
    }

    /// Every device, keyed by name.
    pub fn cameras(&self) -> BTreeMap<String, Arc<dyn DeviceHandler>> {
        self.inner
            .hubs
            .load()
            .values()
            .flat_map(|h| {
                h.devices()
                    .iter()
                    .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// The snapshot from the last successful global refresh.
    pub fn last_snapshot(&self) -> Option<Arc<NetworkSnapshot>> {
        self.inner.last_snapshot.load_full()
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    // ── Internals ────────────────────────────────────────────────

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_replace(state);
    }

    fn throttled(&self) -> bool {
        self.inner
            .last_refresh_at
            .load()
            .as_ref()
            .is_some_and(|at| at.elapsed() < self.inner.config.refresh_interval)
    }

    async fn fetch_snapshot(&self) -> Result<NetworkSnapshot, CoreError> {
        let session = &self.inner.session;
        let url = session.endpoints()?.homescreen(&session.account_id()?)?;
        Ok(session.get_json(url).await?)
    }

    /// Reconcile the hub set against `snapshot`, start new hubs and
    /// refresh existing ones concurrently. The hub map is swapped only
    /// after every new hub has started.
    async fn apply_snapshot(&self, snapshot: &NetworkSnapshot) -> RefreshReport {
        let current = self.inner.hubs.load_full();
        let mut next = HubMap::new();
        let mut fresh = Vec::new();
        let mut report = RefreshReport::skipped(RefreshKind::Refreshed);

        for spec in discover_hubs(snapshot) {
            if next.contains_key(&spec.identity) {
                continue;
            }
            let hub = match current.get(&spec.identity) {
                Some(hub) => Arc::clone(hub),
                None => {
                    let hub = Arc::new(SyncModule::new(
                        spec.name,
                        spec.network_id,
                        spec.kind,
                        Arc::clone(&self.inner.session),
                        Arc::clone(&self.inner.registry),
                        self.inner.config.refresh_interval,
                    ));
                    fresh.push(Arc::clone(&hub));
                    hub
                }
            };
            next.insert(spec.identity, hub);
        }

        let existing: Vec<_> = next
            .values()
            .filter(|h| current.contains_key(h.identity()))
            .cloned()
            .collect();

        let (started, refreshed) = tokio::join!(
            join_all(fresh.iter().map(|hub| hub.try_start(snapshot))),
            join_all(existing.iter().map(|hub| hub.refresh_from(snapshot, true))),
        );

        for (hub, result) in fresh.iter().zip(started) {
            report.added_hubs.push(hub.name().to_owned());
            let entry = match result {
                Ok(outcome) => HubRefresh::Refreshed(outcome),
                Err(e) => HubRefresh::Failed(e.to_string()),
            };
            report.hubs.insert(hub.name().to_owned(), entry);
        }
        for (hub, result) in existing.iter().zip(refreshed) {
            let entry = match result {
                Ok(outcome) => HubRefresh::Refreshed(outcome),
                Err(e) => HubRefresh::Failed(e.to_string()),
            };
            report.hubs.insert(hub.name().to_owned(), entry);
        }

        report.removed_hubs = current
            .iter()
            .filter(|(identity, _)| !next.contains_key(*identity))
            .map(|(_, hub)| hub.name().to_owned())
            .collect();
        for name in &report.removed_hubs {
            info!(hub = %name, "hub removed");
        }

        self.inner.hubs.store(Arc::new(next));
        report
    }
}

/// Hubs implied by a snapshot: one per sync module, plus one standalone
/// hub per Wi-Fi device on a network without a sync module.
fn discover_hubs(snapshot: &NetworkSnapshot) -> Vec<HubSpec> {
    let mut specs = Vec::new();

    for summary in &snapshot.sync_modules {
        let name = snapshot
            .network(&summary.network_id)
            .map(|n| n.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| summary.name.clone());
        specs.push(HubSpec {
            identity: hub_identity(&summary.network_id, &HubKind::SyncModule),
            name,
            network_id: summary.network_id.clone(),
            kind: HubKind::SyncModule,
        });
    }

    for (list, entry) in snapshot.devices() {
        if snapshot.sync_module_for(&entry.network_id).is_some() {
            continue;
        }
        if !list.can_stand_alone() {
            debug!(device = %entry.name, "camera without a sync module ignored");
            continue;
        }
        let kind = HubKind::Standalone {
            device_id: entry.id.clone(),
        };
        specs.push(HubSpec {
            identity: hub_identity(&entry.network_id, &kind),
            name: entry.name.clone(),
            network_id: entry.network_id.clone(),
            kind,
        });
    }
    specs
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically refresh all hubs. An in-flight refresh is abandoned on
/// cancellation; hubs restore their pre-refresh state when it is dropped.
async fn refresh_task(controller: Controller, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = controller.refresh(false) => {
                        if let Err(e) = result {
                            warn!(error = %e, "periodic refresh failed");
                        }
                    }
                }
            }
        }
    }

    debug!("refresh task exiting");
}
