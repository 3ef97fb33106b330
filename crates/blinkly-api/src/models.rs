// Snapshot wire types
//
// The account "homescreen" document and the per-device detail payloads.
// Ids arrive as JSON numbers or strings depending on the endpoint and
// are normalized to strings on ingest. Unknown fields are kept in
// `extra` so device handlers can surface them without a schema change.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ── Id normalization ─────────────────────────────────────────────────

/// Deserialize a JSON string or number into a `String`.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Like [`string_or_number`], but `null` maps to `None`.
pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// `null` decodes as the type's default. A malformed field on one entry
/// must not fail the whole snapshot.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Free-form text field: strings pass through, scalars are stringified,
/// `null` and structured values become `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    })
}

// ── Homescreen ───────────────────────────────────────────────────────

/// Point-in-time description of every hub and device on the account.
///
/// Never mutated after it is fetched; refresh code passes it around by
/// reference or behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    #[serde(default)]
    pub networks: Vec<NetworkSummary>,
    #[serde(default)]
    pub sync_modules: Vec<SyncModuleSummary>,
    #[serde(default)]
    pub cameras: Vec<DeviceEntry>,
    #[serde(default)]
    pub owls: Vec<DeviceEntry>,
    #[serde(default)]
    pub doorbells: Vec<DeviceEntry>,
    #[serde(default)]
    pub hawks: Vec<DeviceEntry>,
}

impl NetworkSnapshot {
    pub fn network(&self, network_id: &str) -> Option<&NetworkSummary> {
        self.networks.iter().find(|n| n.id == network_id)
    }

    /// The sync module serving `network_id`, if the network has one.
    pub fn sync_module_for(&self, network_id: &str) -> Option<&SyncModuleSummary> {
        self.sync_modules.iter().find(|s| s.network_id == network_id)
    }

    /// Every device entry, tagged with the list it was found in.
    pub fn devices(&self) -> impl Iterator<Item = (DeviceList, &DeviceEntry)> {
        let cameras = self.cameras.iter().map(|e| (DeviceList::Cameras, e));
        let owls = self.owls.iter().map(|e| (DeviceList::Owls, e));
        let doorbells = self.doorbells.iter().map(|e| (DeviceList::Doorbells, e));
        let hawks = self.hawks.iter().map(|e| (DeviceList::Hawks, e));
        cameras.chain(owls).chain(doorbells).chain(hawks)
    }

    /// Device entries on one network.
    pub fn devices_on<'a>(
        &'a self,
        network_id: &'a str,
    ) -> impl Iterator<Item = (DeviceList, &'a DeviceEntry)> + 'a {
        self.devices().filter(move |(_, e)| e.network_id == network_id)
    }
}

/// Which homescreen list a device entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceList {
    Cameras,
    Owls,
    Doorbells,
    Hawks,
}

impl DeviceList {
    /// Discriminator implied by the list when the entry has no `type`.
    pub fn default_type(self) -> Option<&'static str> {
        match self {
            Self::Cameras => None,
            Self::Owls => Some("owl"),
            Self::Doorbells => Some("lotus"),
            Self::Hawks => Some("hawk"),
        }
    }

    /// Whether devices in this list can exist without a sync module.
    pub fn can_stand_alone(self) -> bool {
        !matches!(self, Self::Cameras)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub armed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncModuleSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub network_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One camera, mini, doorbell or hawk as listed in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub network_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub serial: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thumbnail: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub battery: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceEntry {
    /// The registry discriminator: the explicit `type`, else the list default.
    pub fn discriminator(&self, list: DeviceList) -> Option<&str> {
        self.device_type.as_deref().or_else(|| list.default_type())
    }

    /// A copy of this entry with `detail`'s keys overlaid on top.
    ///
    /// Keys in `detail` win; keys it lacks keep the snapshot value.
    pub fn with_detail(&self, detail: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut merged = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in detail {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(merged))
    }
}

// ── Detail payloads ──────────────────────────────────────────────────

/// `GET network/{id}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfoResponse {
    pub network: NetworkInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub armed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `GET network/{n}/camera/{c}/config` response. The first element of
/// `camera` is the device's detail record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraConfigResponse {
    #[serde(default)]
    pub camera: Vec<Map<String, Value>>,
}

impl CameraConfigResponse {
    pub fn detail(&self) -> Option<&Map<String, Value>> {
        self.camera.first()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_normalized_to_strings() {
        let entry: DeviceEntry = serde_json::from_value(json!({
            "name": "test",
            "id": 2,
            "serial": "foobar123",
            "enabled": true,
            "network_id": 1,
            "thumbnail": "/foo/bar"
        }))
        .unwrap();
        assert_eq!(entry.id, "2");
        assert_eq!(entry.network_id, "1");
        assert!(entry.extra.is_empty());
    }

    #[test]
    fn null_and_odd_fields_do_not_fail_the_snapshot() {
        let snap: NetworkSnapshot = serde_json::from_value(json!({
            "cameras": [
                {"id": 1, "network_id": 9, "name": null, "enabled": null, "type": 7},
                {"id": 2, "network_id": 9, "name": "porch", "serial": 12345, "thumbnail": {"url": "/x"}}
            ]
        }))
        .unwrap();
        let entries: Vec<_> = snap.devices_on("9").map(|(_, e)| e).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "");
        assert!(!entries[0].enabled);
        assert_eq!(entries[0].device_type.as_deref(), Some("7"));
        assert_eq!(entries[1].serial.as_deref(), Some("12345"));
        assert_eq!(entries[1].thumbnail, None);
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let snap: NetworkSnapshot = serde_json::from_value(json!({
            "networks": [{"id": 1234, "name": "home", "armed": true}]
        }))
        .unwrap();
        assert!(snap.sync_modules.is_empty());
        assert_eq!(snap.devices().count(), 0);
        assert!(snap.network("1234").unwrap().armed);
    }

    #[test]
    fn list_supplies_discriminator_when_type_is_absent() {
        let snap: NetworkSnapshot = serde_json::from_value(json!({
            "cameras": [{"id": 1, "network_id": 9, "name": "porch"}],
            "owls": [{"id": 2, "network_id": 9, "name": "den"}],
            "doorbells": [{"id": 3, "network_id": 9, "name": "door", "type": "doorbell"}],
        }))
        .unwrap();
        let tags: Vec<_> = snap
            .devices_on("9")
            .map(|(list, e)| e.discriminator(list).map(str::to_owned))
            .collect();
        assert_eq!(tags, vec![None, Some("owl".into()), Some("doorbell".into())]);
    }

    #[test]
    fn detail_overlays_entry() {
        let entry: DeviceEntry = serde_json::from_value(json!({
            "id": 5, "network_id": 9, "name": "yard", "thumbnail": "/old", "battery": "ok"
        }))
        .unwrap();
        let detail = json!({"thumbnail": "/new", "temperature": 68, "id": 5});
        let merged = entry.with_detail(detail.as_object().unwrap()).unwrap();
        assert_eq!(merged.thumbnail.as_deref(), Some("/new"));
        assert_eq!(merged.battery, Some(json!("ok")));
        assert_eq!(merged.extra.get("temperature"), Some(&json!(68)));
        assert_eq!(merged.id, "5");
    }
}
