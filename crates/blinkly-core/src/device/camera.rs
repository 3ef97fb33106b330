// Basic sync-module camera ("catalina", XT, XT2).
//
// Uses the network-scoped legacy paths and is the only variant whose
// snapshot entry is incomplete: refresh overlays the camera config
// record onto it.

use async_trait::async_trait;
use blinkly_api::DeviceEntry;
use blinkly_api::models::CameraConfigResponse;
use tracing::debug;

use super::{Capability, CameraCore, DeviceContext, DeviceHandler, ProductType};
use crate::error::CoreError;

const CAPABILITIES: &[Capability] = &[Capability::Arm, Capability::Snapshot, Capability::Record];

pub struct BasicCamera {
    core: CameraCore,
}

impl BasicCamera {
    pub fn new(ctx: DeviceContext) -> Self {
        Self {
            core: CameraCore::new(ctx),
        }
    }
}

#[async_trait]
impl DeviceHandler for BasicCamera {
    fn core(&self) -> &CameraCore {
        &self.core
    }

    fn product_type(&self) -> ProductType {
        ProductType::Catalina
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    async fn fetch_detail(&self, entry: &DeviceEntry) -> Result<DeviceEntry, CoreError> {
        let url = self
            .core
            .endpoints()?
            .camera_config(self.core.network_id(), &entry.id)?;
        let body = self.core.get(url).await?;
        let config: CameraConfigResponse = serde_json::from_value(body)
            .map_err(|e| CoreError::Internal(format!("camera config: {e}")))?;

        match config.detail() {
            Some(detail) => entry
                .with_detail(detail)
                .map_err(|e| CoreError::Internal(format!("camera config merge: {e}"))),
            None => {
                debug!(device = %entry.name, "camera config has no detail record");
                Ok(entry.clone())
            }
        }
    }

    async fn arm(&self, enabled: bool) -> Result<u16, CoreError> {
        let url = self.core.endpoints()?.camera_motion(
            self.core.network_id(),
            &self.core.camera_id(),
            enabled,
        )?;
        self.core.post(url, None).await
    }

    async fn snap_picture(&self) -> Result<u16, CoreError> {
        let url = self
            .core
            .endpoints()?
            .camera_thumbnail(self.core.network_id(), &self.core.camera_id())?;
        self.core.request_snapshot(url).await
    }

    async fn record(&self) -> Result<u16, CoreError> {
        let url = self
            .core
            .endpoints()?
            .camera_clip(self.core.network_id(), &self.core.camera_id())?;
        self.core.post(url, None).await
    }
}
