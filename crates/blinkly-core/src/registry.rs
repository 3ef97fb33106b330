// ── Device registry ──
//
// Maps the snapshot's device-type discriminator to a handler
// constructor. New variants are added by registering a tag; nothing
// downstream branches on concrete handler types.

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::{
    BasicCamera, DeviceContext, DeviceHandler, Doorbell, HawkCamera, MiniCamera, ProductType,
};
use crate::error::CoreError;

/// Builds a handler for one snapshot entry.
pub type DeviceConstructor = fn(DeviceContext) -> Arc<dyn DeviceHandler>;

/// A registered handler kind.
///
/// `product_type` must match what the constructed handler reports; the
/// sync module reuses an existing handler only when the kinds agree.
#[derive(Clone, Copy)]
pub struct DeviceKind {
    pub product_type: ProductType,
    pub construct: DeviceConstructor,
}

impl std::fmt::Debug for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKind")
            .field("product_type", &self.product_type)
            .finish_non_exhaustive()
    }
}

fn basic_camera(ctx: DeviceContext) -> Arc<dyn DeviceHandler> {
    Arc::new(BasicCamera::new(ctx))
}

fn mini_camera(ctx: DeviceContext) -> Arc<dyn DeviceHandler> {
    Arc::new(MiniCamera::new(ctx))
}

fn doorbell(ctx: DeviceContext) -> Arc<dyn DeviceHandler> {
    Arc::new(Doorbell::new(ctx))
}

fn hawk_camera(ctx: DeviceContext) -> Arc<dyn DeviceHandler> {
    Arc::new(HawkCamera::new(ctx))
}

pub const BASIC_CAMERA: DeviceKind = DeviceKind {
    product_type: ProductType::Catalina,
    construct: basic_camera,
};

pub const MINI_CAMERA: DeviceKind = DeviceKind {
    product_type: ProductType::Owl,
    construct: mini_camera,
};

pub const DOORBELL: DeviceKind = DeviceKind {
    product_type: ProductType::Lotus,
    construct: doorbell,
};

pub const HAWK_CAMERA: DeviceKind = DeviceKind {
    product_type: ProductType::Hawk,
    construct: hawk_camera,
};

/// Discriminator → constructor table.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    kinds: HashMap<String, DeviceKind>,
    /// Used when an entry carries no discriminator at all.
    fallback: DeviceKind,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        let mut registry = Self::empty(BASIC_CAMERA);
        for tag in ["catalina", "default", "xt", "xt2"] {
            registry.register(tag, BASIC_CAMERA);
        }
        registry.register("owl", MINI_CAMERA);
        registry.register("mini", MINI_CAMERA);
        registry.register("lotus", DOORBELL);
        registry.register("doorbell", DOORBELL);
        registry.register("hawk", HAWK_CAMERA);
        registry
    }
}

impl DeviceRegistry {
    /// A registry with no tags; untyped entries resolve to `fallback`.
    pub fn empty(fallback: DeviceKind) -> Self {
        Self {
            kinds: HashMap::new(),
            fallback,
        }
    }

    /// Register (or replace) a tag. Tags are case-insensitive.
    pub fn register(&mut self, tag: impl Into<String>, kind: DeviceKind) -> Option<DeviceKind> {
        self.kinds.insert(tag.into().to_ascii_lowercase(), kind)
    }

    /// Resolve a discriminator. `None` means the entry declared no type.
    pub fn resolve(&self, tag: Option<&str>) -> Result<DeviceKind, CoreError> {
        let Some(tag) = tag else {
            return Ok(self.fallback);
        };
        self.kinds
            .get(&tag.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| CoreError::UnknownDeviceType {
                device_type: tag.to_owned(),
            })
    }

    /// Registered tags, unordered.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tags_resolve_to_expected_variants() {
        let registry = DeviceRegistry::default();
        let cases = [
            (None, ProductType::Catalina),
            (Some("catalina"), ProductType::Catalina),
            (Some("xt2"), ProductType::Catalina),
            (Some("owl"), ProductType::Owl),
            (Some("Mini"), ProductType::Owl),
            (Some("lotus"), ProductType::Lotus),
            (Some("doorbell"), ProductType::Lotus),
            (Some("hawk"), ProductType::Hawk),
        ];
        for (tag, expected) in cases {
            assert_eq!(registry.resolve(tag).unwrap().product_type, expected, "{tag:?}");
        }
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let err = DeviceRegistry::default().resolve(Some("superior")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownDeviceType { ref device_type } if device_type == "superior"));
    }

    #[test]
    fn new_tags_can_be_registered() {
        let mut registry = DeviceRegistry::default();
        assert!(registry.resolve(Some("floodlight")).is_err());
        registry.register("floodlight", HAWK_CAMERA);
        assert_eq!(
            registry.resolve(Some("floodlight")).unwrap().product_type,
            ProductType::Hawk
        );
        assert!(registry.tags().any(|t| t == "floodlight"));
    }
}
