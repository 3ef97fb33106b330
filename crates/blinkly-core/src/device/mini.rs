// Blink Mini ("owl"): Wi-Fi camera, optionally without a sync module.

use async_trait::async_trait;
use serde_json::json;

use super::{Capability, CameraCore, DeviceContext, DeviceHandler, ProductType};
use crate::error::CoreError;

const CAPABILITIES: &[Capability] = &[
    Capability::Arm,
    Capability::Snapshot,
    Capability::Snooze,
    Capability::Record,
];

pub struct MiniCamera {
    core: CameraCore,
}

impl MiniCamera {
    pub fn new(ctx: DeviceContext) -> Self {
        Self {
            core: CameraCore::new(ctx),
        }
    }
}

#[async_trait]
impl DeviceHandler for MiniCamera {
    fn core(&self) -> &CameraCore {
        &self.core
    }

    fn product_type(&self) -> ProductType {
        ProductType::Owl
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    /// Minis toggle motion detection through their config document.
    async fn arm(&self, enabled: bool) -> Result<u16, CoreError> {
        let url = self.core.device_url(ProductType::Owl, "config")?;
        self.core.post(url, Some(json!({ "enabled": enabled }))).await
    }

    async fn snap_picture(&self) -> Result<u16, CoreError> {
        let url = self.core.device_url(ProductType::Owl, "thumbnail")?;
        self.core.request_snapshot(url).await
    }

    async fn record(&self) -> Result<u16, CoreError> {
        let url = self.core.device_url(ProductType::Owl, "clip")?;
        self.core.post(url, None).await
    }

    async fn snooze(&self, seconds: i64) -> Result<u16, CoreError> {
        self.core.snooze(ProductType::Owl, seconds).await
    }
}
