// blinkly-core: hub and device synchronization on top of blinkly-api.

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod registry;
pub mod sync_module;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AuthCredentials, ControllerConfig, TlsVerification};
pub use controller::{ConnectionState, Controller, HubRefresh, RefreshReport};
pub use device::{Attributes, Capability, DeviceHandler, ProductType};
pub use error::CoreError;
pub use registry::{DeviceKind, DeviceRegistry};
pub use sync_module::{HubKind, HubState, RefreshKind, RefreshOutcome, SyncModule};
