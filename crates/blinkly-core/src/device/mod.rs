// ── Device handlers ──
//
// One handler per camera-like device. Handlers share `CameraCore` for
// state and request plumbing; each variant decides which actions it
// supports and which endpoints they hit. Variants are constructed only
// through the `DeviceRegistry`.

mod camera;
mod doorbell;
mod hawk;
mod mini;

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use blinkly_api::{DeviceEntry, Endpoints, Method, SessionManager};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::CoreError;

pub use camera::BasicCamera;
pub use doorbell::Doorbell;
pub use hawk::HawkCamera;
pub use mini::MiniCamera;

/// Attribute map surfaced to callers. Keys are stable strings.
pub type Attributes = BTreeMap<String, Value>;

// ── Taxonomy ─────────────────────────────────────────────────────────

/// Product family as the cloud names it in device-scoped URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ProductType {
    Catalina,
    Owl,
    Lotus,
    Hawk,
}

impl ProductType {
    /// Collection segment used by account-scoped device endpoints.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Catalina => "cameras",
            Self::Owl | Self::Hawk => "owls",
            Self::Lotus => "doorbells",
        }
    }
}

/// Optional action a handler may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Capability {
    Arm,
    Snapshot,
    Snooze,
    Record,
}

// ── Construction context ─────────────────────────────────────────────

/// Non-owning link from a device to the hub that lists it.
///
/// Holds the hub's identifiers only; resolve the hub itself through the
/// controller when needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLink {
    pub identity: String,
    pub name: String,
    pub network_id: String,
}

/// Everything a registry constructor needs to build a handler.
#[derive(Clone)]
pub struct DeviceContext {
    pub session: Arc<SessionManager>,
    pub hub: HubLink,
    pub entry: DeviceEntry,
    /// The discriminator the handler was resolved from, if any.
    pub device_type: Option<String>,
}

// ── Shared handler state ─────────────────────────────────────────────

/// Cached view of one device, replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraState {
    pub entry: DeviceEntry,
    /// The discriminator from the latest snapshot.
    pub device_type: Option<String>,
    pub stale: bool,
}

/// A snapshot or clip request accepted by the cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRequest {
    pub command_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// State and request plumbing shared by every variant.
///
/// Reads are lock-free. Network calls go through `action_gate`, so at
/// most one request per device is in flight at a time.
pub struct CameraCore {
    session: Arc<SessionManager>,
    hub: HubLink,
    state: ArcSwap<CameraState>,
    last_snapshot_request: ArcSwapOption<MediaRequest>,
    action_gate: Mutex<()>,
}

impl CameraCore {
    pub fn new(ctx: DeviceContext) -> Self {
        Self {
            session: ctx.session,
            hub: ctx.hub,
            state: ArcSwap::from_pointee(CameraState {
                entry: ctx.entry,
                device_type: ctx.device_type,
                stale: false,
            }),
            last_snapshot_request: ArcSwapOption::empty(),
            action_gate: Mutex::new(()),
        }
    }

    pub fn name(&self) -> String {
        self.state.load().entry.name.clone()
    }

    pub fn camera_id(&self) -> String {
        self.state.load().entry.id.clone()
    }

    /// The owning hub's network id, never the snapshot entry's.
    pub fn network_id(&self) -> &str {
        &self.hub.network_id
    }

    pub fn hub(&self) -> &HubLink {
        &self.hub
    }

    pub fn state(&self) -> Arc<CameraState> {
        self.state.load_full()
    }

    pub fn is_stale(&self) -> bool {
        self.state.load().stale
    }

    /// The last snapshot request, kept across refreshes.
    pub fn last_snapshot_request(&self) -> Option<Arc<MediaRequest>> {
        self.last_snapshot_request.load_full()
    }

    /// Replace the cached entry and type, and clear the stale flag.
    pub(crate) fn apply(&self, entry: DeviceEntry, device_type: Option<String>) {
        self.state.store(Arc::new(CameraState {
            entry,
            device_type,
            stale: false,
        }));
    }

    /// Keep the cached entry but flag it stale.
    pub(crate) fn mark_stale(&self) {
        let current = self.state.load_full();
        if !current.stale {
            self.state.store(Arc::new(CameraState {
                entry: current.entry.clone(),
                device_type: current.device_type.clone(),
                stale: true,
            }));
        }
    }

    pub fn attributes(&self) -> Attributes {
        let state = self.state.load();
        let entry = &state.entry;
        let extra = |key: &str| entry.extra.get(key).cloned().unwrap_or(Value::Null);

        let mut attrs = Attributes::new();
        attrs.insert("name".into(), json!(entry.name));
        attrs.insert("camera_id".into(), json!(entry.id));
        attrs.insert("network_id".into(), json!(self.hub.network_id));
        attrs.insert("serial".into(), json!(entry.serial));
        attrs.insert("enabled".into(), json!(entry.enabled));
        attrs.insert("thumbnail".into(), json!(entry.thumbnail));
        attrs.insert("type".into(), json!(state.device_type));
        attrs.insert("battery".into(), entry.battery.clone().unwrap_or(Value::Null));
        attrs.insert("temperature".into(), extra("temperature"));
        attrs.insert("wifi_strength".into(), extra("wifi_strength"));
        attrs.insert("last_record".into(), extra("last_record"));
        attrs.insert("sync_module".into(), json!(self.hub.name));
        attrs.insert("stale".into(), json!(state.stale));
        attrs
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub(crate) fn endpoints(&self) -> Result<Endpoints, CoreError> {
        Ok(self.session.endpoints()?)
    }

    pub(crate) fn account_id(&self) -> Result<String, CoreError> {
        Ok(self.session.account_id()?)
    }

    /// URL of an account-scoped action for this device.
    pub(crate) fn device_url(
        &self,
        product_type: ProductType,
        action: &str,
    ) -> Result<Url, CoreError> {
        Ok(self.endpoints()?.device_action(
            &self.account_id()?,
            &self.hub.network_id,
            product_type.collection(),
            &self.camera_id(),
            action,
        )?)
    }

    /// POST and return the raw status. No retry beyond the session's
    /// one re-login replay.
    pub(crate) async fn post(&self, url: Url, body: Option<Value>) -> Result<u16, CoreError> {
        let _gate = self.action_gate.lock().await;
        debug!(device = %self.name(), %url, "device action");
        let response = self.session.request(Method::POST, url, body).await?;
        Ok(response.status)
    }

    pub(crate) async fn get(&self, url: Url) -> Result<Value, CoreError> {
        let _gate = self.action_gate.lock().await;
        let response = self.session.request(Method::GET, url, None).await?;
        Ok(response.json)
    }

    /// Request a new thumbnail and remember the command id.
    pub(crate) async fn request_snapshot(&self, url: Url) -> Result<u16, CoreError> {
        let _gate = self.action_gate.lock().await;
        let response = self.session.request(Method::POST, url, None).await?;
        let command_id = match response.json.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        self.last_snapshot_request.store(Some(Arc::new(MediaRequest {
            command_id,
            requested_at: Utc::now(),
        })));
        Ok(response.status)
    }

    /// `{"snooze_time": seconds}` against the device's snooze endpoint.
    pub(crate) async fn snooze(&self, product_type: ProductType, seconds: i64) -> Result<u16, CoreError> {
        if seconds < 0 {
            return Err(CoreError::ValidationFailed {
                message: format!("snooze duration must be non-negative, got {seconds}"),
            });
        }
        let url = self.device_url(product_type, "snooze")?;
        self.post(url, Some(json!({ "snooze_time": seconds }))).await
    }
}

// ── Handler trait ────────────────────────────────────────────────────

/// Polymorphic device handler.
///
/// Actions a variant does not list in [`capabilities`](Self::capabilities)
/// fail with `CapabilityUnsupported` without touching the network.
#[async_trait]
pub trait DeviceHandler: Send + Sync {
    fn core(&self) -> &CameraCore;

    fn product_type(&self) -> ProductType;

    fn capabilities(&self) -> &'static [Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn name(&self) -> String {
        self.core().name()
    }

    fn is_stale(&self) -> bool {
        self.core().is_stale()
    }

    /// Cached attributes. Never touches the network.
    fn attributes(&self) -> Attributes {
        self.core().attributes()
    }

    /// Like [`attributes`](Self::attributes), but refuses to serve a stale cache.
    fn fresh_attributes(&self) -> Result<Attributes, CoreError> {
        if self.is_stale() {
            return Err(CoreError::StaleDevice { name: self.name() });
        }
        Ok(self.attributes())
    }

    /// Replace the cached attributes from a snapshot entry and the type
    /// it was listed under. Idempotent.
    fn refresh(&self, entry: DeviceEntry, device_type: Option<String>) {
        self.core().apply(entry, device_type);
    }

    /// Fetch per-device detail and merge it into `entry`. Variants fully
    /// described by the snapshot return it unchanged.
    async fn fetch_detail(&self, entry: &DeviceEntry) -> Result<DeviceEntry, CoreError> {
        Ok(entry.clone())
    }

    /// Enable or disable motion detection.
    async fn arm(&self, enabled: bool) -> Result<u16, CoreError>;

    /// Ask the device for a new thumbnail.
    async fn snap_picture(&self) -> Result<u16, CoreError>;

    /// Ask the device to record a clip.
    async fn record(&self) -> Result<u16, CoreError> {
        Err(self.unsupported(Capability::Record))
    }

    /// Suppress motion alerts for `seconds`.
    async fn snooze(&self, seconds: i64) -> Result<u16, CoreError> {
        let _ = seconds;
        Err(self.unsupported(Capability::Snooze))
    }

    fn unsupported(&self, capability: Capability) -> CoreError {
        CoreError::CapabilityUnsupported {
            capability,
            product_type: self.product_type(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn product_types_parse_and_map_to_collections() {
        assert_eq!(ProductType::from_str("hawk").unwrap(), ProductType::Hawk);
        assert_eq!(ProductType::Hawk.collection(), "owls");
        assert_eq!(ProductType::Lotus.collection(), "doorbells");
        assert_eq!(ProductType::Catalina.to_string(), "catalina");
        assert_eq!(Capability::Snapshot.as_ref(), "snapshot");
    }
}
