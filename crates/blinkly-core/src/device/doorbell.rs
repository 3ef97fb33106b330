// Blink Video Doorbell ("lotus"). Records only on press or motion, so
// there is no on-demand clip.

use async_trait::async_trait;

use super::{Capability, CameraCore, DeviceContext, DeviceHandler, ProductType};
use crate::error::CoreError;

const CAPABILITIES: &[Capability] = &[Capability::Arm, Capability::Snapshot, Capability::Snooze];

pub struct Doorbell {
    core: CameraCore,
}

impl Doorbell {
    pub fn new(ctx: DeviceContext) -> Self {
        Self {
            core: CameraCore::new(ctx),
        }
    }
}

#[async_trait]
impl DeviceHandler for Doorbell {
    fn core(&self) -> &CameraCore {
        &self.core
    }

    fn product_type(&self) -> ProductType {
        ProductType::Lotus
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    async fn arm(&self, enabled: bool) -> Result<u16, CoreError> {
        let action = if enabled { "enable" } else { "disable" };
        let url = self.core.device_url(ProductType::Lotus, action)?;
        self.core.post(url, None).await
    }

    async fn snap_picture(&self) -> Result<u16, CoreError> {
        let url = self.core.device_url(ProductType::Lotus, "thumbnail")?;
        self.core.request_snapshot(url).await
    }

    async fn snooze(&self, seconds: i64) -> Result<u16, CoreError> {
        self.core.snooze(ProductType::Lotus, seconds).await
    }
}
