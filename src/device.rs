//! Device emulation profiles
//!
//! A [`DeviceRegistry`] is an ordered list of [`DeviceProfile`]s keyed by
//! alias. The job matrix is built by crossing every discovered page with every
//! profile in the registry, so the registry order is also the capture order
//! for a single page.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 6.0; Nexus 5 Build/MRA58N) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/100.0.4896.88 Mobile Safari/537.36";
const IPAD_USER_AGENT: &str = "Mozilla/5.0 (iPad; CPU OS 11_0 like Mac OS X) AppleWebKit/604.1.34 (KHTML, like Gecko) Version/11.0 Mobile/15A5341f Safari/604.1";
const PIXEL_5_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 11; Pixel 5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.91 Mobile Safari/537.36";

/// Browser viewport emulated for a device
///
/// # Examples
///
/// ```rust
/// use websnap::Viewport;
///
/// let phone = Viewport {
///     width: 375,
///     height: 667,
///     device_scale_factor: 2.0,
///     mobile: true,
///     has_touch: true,
/// };
/// assert!(!phone.is_landscape());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in CSS pixels
    pub width: u32,

    /// Viewport height in CSS pixels
    pub height: u32,

    /// Device pixel ratio
    ///
    /// Values > 1.0 simulate high-density displays like Retina screens.
    pub device_scale_factor: f64,

    /// Whether to emulate a mobile device (meta viewport, overlay scrollbars)
    #[serde(default)]
    pub mobile: bool,

    /// Whether touch events are reported to the page
    #[serde(default)]
    pub has_touch: bool,
}

impl Viewport {
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 900,
            device_scale_factor: 1.0,
            mobile: false,
            has_touch: false,
        }
    }
}

/// Named emulation parameters applied to a rendering context before a capture
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceProfile {
    pub alias: String,
    pub user_agent: String,
    pub viewport: Viewport,
}

impl DeviceProfile {
    pub fn new(alias: impl Into<String>, user_agent: impl Into<String>, viewport: Viewport) -> Self {
        Self {
            alias: alias.into(),
            user_agent: user_agent.into(),
            viewport,
        }
    }

    pub fn desktop() -> Self {
        Self::new("desktop", DESKTOP_USER_AGENT, Viewport::default())
    }

    pub fn tablet() -> Self {
        Self::new(
            "tablet",
            IPAD_USER_AGENT,
            Viewport {
                width: 768,
                height: 1024,
                device_scale_factor: 2.0,
                mobile: true,
                has_touch: true,
            },
        )
    }

    pub fn mobile() -> Self {
        Self::new(
            "mobile",
            PIXEL_5_USER_AGENT,
            Viewport {
                width: 393,
                height: 851,
                device_scale_factor: 2.75,
                mobile: true,
                has_touch: true,
            },
        )
    }
}

/// Ordered, immutable catalog of device profiles
///
/// Profiles are stored behind `Arc` so jobs can share them without copying
/// user-agent strings for every page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "Vec<DeviceProfile>", into = "Vec<DeviceProfile>")]
pub struct DeviceRegistry {
    profiles: Vec<Arc<DeviceProfile>>,
}

impl DeviceRegistry {
    pub fn new(profiles: Vec<DeviceProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn get(&self, alias: &str) -> Option<&Arc<DeviceProfile>> {
        self.profiles.iter().find(|profile| profile.alias == alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceProfile>> {
        self.profiles.iter()
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.alias.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Restrict the registry to `aliases`, keeping registry order.
    ///
    /// Returns the first alias that is not registered as an error.
    pub fn select(&self, aliases: &[String]) -> Result<Self, String> {
        if let Some(unknown) = aliases.iter().find(|alias| self.get(alias).is_none()) {
            return Err(unknown.clone());
        }

        Ok(Self {
            profiles: self
                .profiles
                .iter()
                .filter(|profile| aliases.contains(&profile.alias))
                .cloned()
                .collect(),
        })
    }

    /// First alias registered more than once, if any.
    pub fn duplicate_alias(&self) -> Option<&str> {
        self.profiles.iter().enumerate().find_map(|(i, profile)| {
            self.profiles[..i]
                .iter()
                .any(|earlier| earlier.alias == profile.alias)
                .then_some(profile.alias.as_str())
        })
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(vec![
            DeviceProfile::desktop(),
            DeviceProfile::tablet(),
            DeviceProfile::mobile(),
        ])
    }
}

impl From<Vec<DeviceProfile>> for DeviceRegistry {
    fn from(profiles: Vec<DeviceProfile>) -> Self {
        Self::new(profiles)
    }
}

impl From<DeviceRegistry> for Vec<DeviceProfile> {
    fn from(registry: DeviceRegistry) -> Self {
        registry
            .profiles
            .into_iter()
            .map(|profile| Arc::try_unwrap(profile).unwrap_or_else(|shared| (*shared).clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_order() {
        let registry = DeviceRegistry::default();
        assert_eq!(registry.aliases(), vec!["desktop", "tablet", "mobile"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_default_profiles() {
        let registry = DeviceRegistry::default();

        let desktop = registry.get("desktop").unwrap();
        assert_eq!(desktop.viewport.width, 1440);
        assert_eq!(desktop.viewport.height, 900);
        assert_eq!(desktop.viewport.device_scale_factor, 1.0);

        let mobile = registry.get("mobile").unwrap();
        assert!(mobile.viewport.mobile);
        assert!(mobile.user_agent.contains("Pixel 5"));

        assert!(registry.get("watch").is_none());
    }

    #[test]
    fn test_select_keeps_registry_order() {
        let registry = DeviceRegistry::default();
        let selected = registry
            .select(&["mobile".to_string(), "desktop".to_string()])
            .unwrap();
        assert_eq!(selected.aliases(), vec!["desktop", "mobile"]);

        let err = registry.select(&["watch".to_string()]).unwrap_err();
        assert_eq!(err, "watch");
    }

    #[test]
    fn test_duplicate_alias() {
        assert!(DeviceRegistry::default().duplicate_alias().is_none());

        let registry = DeviceRegistry::new(vec![
            DeviceProfile::desktop(),
            DeviceProfile::mobile(),
            DeviceProfile::desktop(),
        ]);
        assert_eq!(registry.duplicate_alias(), Some("desktop"));
    }

    #[test]
    fn test_registry_serde_roundtrip_shape() {
        let json = serde_json::to_value(DeviceRegistry::default()).unwrap();
        assert!(json.is_array());
        assert_eq!(json[1]["alias"], "tablet");

        let parsed: DeviceRegistry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, DeviceRegistry::default());
    }
}
