//! Display mode planning.
//!
//! Given the original modes of a device group and the parsed resolution and
//! refresh rate targets, computes the new mode map to hand to the platform.
//! Resolution changes cover the whole group so duplicated displays stay in
//! sync; refresh rate changes cover the whole group only when the session
//! targets the primary display, otherwise just the requested device.

use std::collections::BTreeMap;

use crate::types::{DeviceId, DisplayMode, RefreshRate, Resolution};

/// Compute the new mode map for one apply cycle.
///
/// `group` is the duplicated group with the requested device at the head.
/// Devices absent from `originals` are left untouched.
pub(crate) fn plan_modes(
    resolution: Option<Resolution>,
    refresh_rate: Option<RefreshRate>,
    originals: &BTreeMap<DeviceId, DisplayMode>,
    group: &[DeviceId],
    primary_requested: bool,
) -> BTreeMap<DeviceId, DisplayMode> {
    let mut modes = originals.clone();

    if let Some(resolution) = resolution {
        for device_id in group {
            if let Some(mode) = modes.get_mut(device_id) {
                mode.resolution = resolution;
            }
        }
    }

    if let Some(refresh_rate) = refresh_rate {
        let limit = if primary_requested { group.len() } else { 1 };
        for device_id in group.iter().take(limit) {
            if let Some(mode) = modes.get_mut(device_id) {
                mode.refresh_rate = refresh_rate;
            }
        }
    }

    modes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(width: u32, height: u32, hz: u32) -> DisplayMode {
        DisplayMode {
            resolution: Resolution { width, height },
            refresh_rate: RefreshRate::from_hz(hz),
        }
    }

    fn originals() -> BTreeMap<DeviceId, DisplayMode> {
        BTreeMap::from([
            ("A".to_string(), mode(1920, 1080, 60)),
            ("B".to_string(), mode(2560, 1440, 144)),
        ])
    }

    #[test]
    fn test_resolution_covers_whole_group() {
        let group = vec!["A".to_string(), "B".to_string()];
        let modes = plan_modes(
            Some(Resolution {
                width: 3840,
                height: 2160,
            }),
            None,
            &originals(),
            &group,
            false,
        );

        assert_eq!(modes["A"].resolution.width, 3840);
        assert_eq!(modes["B"].resolution.width, 3840);
        assert_eq!(modes["A"].refresh_rate, RefreshRate::from_hz(60));
        assert_eq!(modes["B"].refresh_rate, RefreshRate::from_hz(144));
    }

    #[test]
    fn test_refresh_rate_head_only_for_specific_device() {
        let group = vec!["A".to_string(), "B".to_string()];
        let modes = plan_modes(None, Some(RefreshRate::from_hz(120)), &originals(), &group, false);

        assert_eq!(modes["A"].refresh_rate, RefreshRate::from_hz(120));
        assert_eq!(modes["B"].refresh_rate, RefreshRate::from_hz(144));
    }

    #[test]
    fn test_refresh_rate_covers_group_when_primary_requested() {
        let group = vec!["A".to_string(), "B".to_string()];
        let modes = plan_modes(None, Some(RefreshRate::from_hz(120)), &originals(), &group, true);

        assert_eq!(modes["A"].refresh_rate, RefreshRate::from_hz(120));
        assert_eq!(modes["B"].refresh_rate, RefreshRate::from_hz(120));
    }

    #[test]
    fn test_devices_outside_originals_are_skipped() {
        let group = vec!["A".to_string(), "C".to_string()];
        let modes = plan_modes(
            Some(Resolution {
                width: 1280,
                height: 720,
            }),
            None,
            &originals(),
            &group,
            false,
        );

        assert_eq!(modes["A"].resolution.height, 720);
        assert!(!modes.contains_key("C"));
    }

    #[test]
    fn test_no_targets_returns_originals() {
        let group = vec!["A".to_string()];
        let modes = plan_modes(None, None, &originals(), &group, false);
        assert_eq!(modes, originals());
    }
}
