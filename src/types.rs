//! Core types for display configuration
//!
//! This module defines the fundamental value types shared by the parser, the
//! topology resolver, the settings state machine, and the persistence layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a display device.
///
/// Computed from hardware identity by the platform backend, so it survives
/// process restarts and reboots. Never the OS-assigned display slot name,
/// which is only valid while a device is active.
pub type DeviceId = String;

/// Identifier for the graphics adapter a display output hangs off.
pub type AdapterId = u64;

/// An active display topology: groups of device IDs duplicating one image.
///
/// Both the group list and the members of each group are unordered; use
/// [`crate::topology::is_equivalent`] rather than `==` to compare topologies.
pub type Topology = Vec<Vec<DeviceId>>;

/// Activation state of a display device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// The device is connected but not part of the active topology
    Inactive,
    /// The device is active
    Active,
    /// The device is active and is (part of) the primary display
    Primary,
}

/// HDR state of a display device.
///
/// `Unknown` means the state cannot currently be read, commonly because the
/// device is inactive. It is never a valid target value for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdrState {
    /// HDR state cannot be read
    Unknown,
    /// HDR is supported and disabled
    Disabled,
    /// HDR is supported and enabled
    Enabled,
}

/// Display resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Refresh rate as an exact rational number.
///
/// Hardware reports rates like 59.995 Hz; storing them as floats would drift
/// when comparing against values we wrote ourselves. The rational form keeps
/// round trips exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshRate {
    /// Rate numerator
    pub numerator: u32,

    /// Rate denominator, always non-zero for parser-produced values
    pub denominator: u32,
}

impl RefreshRate {
    /// Whole-number rate in Hz.
    pub fn from_hz(hz: u32) -> Self {
        Self {
            numerator: hz,
            denominator: 1,
        }
    }

    /// Compare two rates with a tolerance of 1.0 Hz.
    ///
    /// Used only to decide whether a change is actually needed; values
    /// written back to the platform are always the exact rationals. Rates
    /// with a zero denominator never compare equal.
    pub fn fuzzy_eq(&self, other: &RefreshRate) -> bool {
        if self.denominator == 0 || other.denominator == 0 {
            return false;
        }
        let lhs = f64::from(self.numerator) / f64::from(self.denominator);
        let rhs = f64::from(other.numerator) / f64::from(other.denominator);
        (lhs - rhs).abs() <= 1.0
    }
}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

/// Full display mode: resolution plus refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMode {
    /// Active resolution
    pub resolution: Resolution,

    /// Active refresh rate
    pub refresh_rate: RefreshRate,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resolution, self.refresh_rate)
    }
}

/// The topology pair anchoring one modification episode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyPair {
    /// Topology before the first switch of the episode
    pub initial: Topology,

    /// Topology after the most recent switch
    pub modified: Topology,
}

/// One enumerated display device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable device identifier
    pub device_id: DeviceId,

    /// OS-assigned display name; empty while the device is inactive
    pub display_name: String,

    /// Human-readable monitor name
    pub friendly_name: String,

    /// Activation state
    pub state: DeviceState,

    /// HDR state; `Unknown` while the device is inactive
    pub hdr_state: HdrState,

    /// Adapter the output belongs to
    pub adapter_id: AdapterId,
}

/// Requested intent for the target device of an apply cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePrep {
    /// Leave the topology alone; the device must already be active
    #[default]
    NoOperation,
    /// Activate the device if it is not active yet
    EnsureActive,
    /// Activate the device and make it the primary display
    EnsurePrimary,
    /// Deactivate every other display group
    EnsureOnlyDisplay,
}
