// ── Device map reconciliation ──
//
// Two phases. `plan` resolves every snapshot entry to a handler (reused
// or freshly constructed, nothing published) and the detail fetches run
// concurrently. `commit` then applies the results and swaps the map in
// one synchronous step, so an abandoned refresh never leaves a
// half-applied map behind.

use std::sync::Arc;

use blinkly_api::{DeviceEntry, DeviceList, NetworkSnapshot};
use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{DeviceMap, HubKind, HubStatus, SyncModule};
use crate::device::{DeviceContext, DeviceHandler};
use crate::error::CoreError;

/// How a refresh call was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// A reconciliation ran and was committed.
    Refreshed,
    /// Suppressed by the refresh interval; nothing was fetched.
    Throttled,
    /// Another refresh of the same hub was already running.
    Coalesced,
}

/// A snapshot entry that could not be turned into a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDevice {
    pub name: String,
    pub device_type: String,
}

/// Result of one `refresh` / `start` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub kind: RefreshKind,
    /// Armed state after the call (the cached one when nothing ran).
    pub armed: Option<bool>,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    /// Devices whose detail fetch failed; they serve cached attributes.
    pub stale: Vec<String>,
    pub skipped: Vec<SkippedDevice>,
}

impl RefreshOutcome {
    fn empty(kind: RefreshKind, armed: Option<bool>) -> Self {
        Self {
            kind,
            armed,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            stale: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub(crate) fn throttled(armed: Option<bool>) -> Self {
        Self::empty(RefreshKind::Throttled, armed)
    }

    pub(crate) fn coalesced(armed: Option<bool>) -> Self {
        Self::empty(RefreshKind::Coalesced, armed)
    }

    /// Whether the refresh succeeded with some devices left stale.
    pub fn is_partial(&self) -> bool {
        !self.stale.is_empty()
    }
}

/// A handler lined up for commit, not yet visible to readers.
struct Candidate {
    name: String,
    entry: DeviceEntry,
    device_type: Option<String>,
    handler: Arc<dyn DeviceHandler>,
    reused: bool,
}

impl SyncModule {
    /// Fetch hub status and device details for `snapshot`, then commit.
    ///
    /// Fails only when the hub's own status cannot be fetched; per-device
    /// failures are isolated into `RefreshOutcome::stale`.
    pub(super) async fn reconcile(
        &self,
        snapshot: &NetworkSnapshot,
    ) -> Result<RefreshOutcome, CoreError> {
        let status = self.fetch_status(snapshot).await?;
        let (candidates, skipped) = self.plan(snapshot);
        let details = join_all(
            candidates
                .iter()
                .map(|c| c.handler.fetch_detail(&c.entry)),
        )
        .await;
        Ok(self.commit(candidates, details, skipped, status))
    }

    /// Entries this hub owns in `snapshot`.
    fn owned_entries<'a>(&'a self, snapshot: &'a NetworkSnapshot) -> Vec<(DeviceList, &'a DeviceEntry)> {
        match &self.kind {
            HubKind::SyncModule => snapshot.devices_on(&self.network_id).collect(),
            HubKind::Standalone { device_id } => snapshot
                .devices()
                .filter(|(list, e)| list.can_stand_alone() && e.id == *device_id)
                .take(1)
                .collect(),
        }
    }

    fn plan(&self, snapshot: &NetworkSnapshot) -> (Vec<Candidate>, Vec<SkippedDevice>) {
        let current = self.devices.load();
        let link = self.link();
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for (list, entry) in self.owned_entries(snapshot) {
            let tag = entry.discriminator(list);
            let kind = match self.registry.resolve(tag) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(hub = %self.name, device = %entry.name, error = %e, "skipping device");
                    skipped.push(SkippedDevice {
                        name: entry.name.clone(),
                        device_type: tag.unwrap_or_default().to_owned(),
                    });
                    continue;
                }
            };

            let existing = current
                .get(&entry.name)
                .filter(|h| h.product_type() == kind.product_type)
                .cloned();
            let (handler, reused) = match existing {
                Some(handler) => (handler, true),
                None => {
                    let ctx = DeviceContext {
                        session: Arc::clone(&self.session),
                        hub: link.clone(),
                        entry: entry.clone(),
                        device_type: tag.map(str::to_owned),
                    };
                    ((kind.construct)(ctx), false)
                }
            };
            candidates.push(Candidate {
                name: entry.name.clone(),
                entry: entry.clone(),
                device_type: tag.map(str::to_owned),
                handler,
                reused,
            });
        }
        (candidates, skipped)
    }

    /// Apply detail results and publish the new map. Synchronous: no
    /// suspension point between the first handler update and the swap.
    fn commit(
        &self,
        candidates: Vec<Candidate>,
        details: Vec<Result<DeviceEntry, CoreError>>,
        skipped: Vec<SkippedDevice>,
        mut status: HubStatus,
    ) -> RefreshOutcome {
        let previous = self.devices.load_full();
        let mut outcome = RefreshOutcome::empty(RefreshKind::Refreshed, status.armed);
        outcome.skipped = skipped;
        let mut next = DeviceMap::new();

        for (candidate, detail) in candidates.into_iter().zip(details) {
            let Candidate {
                name,
                entry: _,
                device_type,
                handler,
                reused,
            } = candidate;

            match detail {
                Ok(entry) => handler.refresh(entry, device_type),
                Err(e) => {
                    warn!(hub = %self.name, device = %name, error = %e, "device detail fetch failed, keeping cached attributes");
                    handler.core().mark_stale();
                    outcome.stale.push(name.clone());
                }
            }

            if reused {
                outcome.updated.push(name.clone());
            } else {
                outcome.added.push(name.clone());
            }
            if next.insert(name.clone(), handler).is_some() {
                warn!(hub = %self.name, device = %name, "duplicate device name, keeping the later entry");
            }
        }

        outcome.removed = previous
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();

        status.last_refresh = Some(Utc::now());
        status.last_refresh_at = Some(Instant::now());

        debug!(
            hub = %self.name,
            devices = next.len(),
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "device map committed"
        );
        self.devices.store(Arc::new(next));
        self.status.store(Arc::new(status));
        outcome
    }
}
