//! Display platform abstraction
//!
//! The [`DisplayBackend`] trait is the seam between the settings state
//! machine and the OS display APIs. An implementation is picked once at
//! startup; everything above it is platform-neutral. [`MemoryBackend`]
//! implements the trait over plain data structures for tests and headless
//! operation.

mod memory;

pub use memory::{MemoryBackend, MemoryDevice, WriteOp};

use crate::topology;
use crate::types::{DeviceId, DeviceInfo, DisplayMode, HdrState, Topology};
use std::collections::BTreeMap;
use thiserror::Error;

/// Display platform error types
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The device ID does not exist on this host
    #[error("unknown display device: {0:?}")]
    UnknownDevice(String),

    /// The device exists but is not part of the active topology
    #[error("display device is not active: {0:?}")]
    DeviceInactive(String),

    /// The requested topology fails structural validation
    #[error("invalid display topology: {0}")]
    InvalidTopology(String),

    /// The request itself is malformed
    #[error("invalid display request: {0}")]
    InvalidRequest(String),

    /// The underlying platform call failed
    #[error("display platform call failed: {0}")]
    Api(String),
}

/// Structural limits of the display platform
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Maximum number of displays that may share one duplicated group
    pub max_group_size: usize,

    /// Source handles available per graphics adapter
    pub source_handles_per_adapter: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_group_size: 2,
            source_handles_per_adapter: 4,
        }
    }
}

/// Access to the host's display configuration.
///
/// Mutators are expected to be idempotent: a `set_*` call whose input
/// already matches the live state (modes compared with the fuzzy refresh
/// rate equality, topologies with order-insensitive equivalence, primary
/// with the current primary group, HDR with equality after skipping
/// `Unknown` targets) must succeed without touching the OS. Reads of
/// inactive devices fail with [`PlatformError::DeviceInactive`].
#[cfg_attr(test, mockall::automock)]
pub trait DisplayBackend: Send {
    /// Structural limits of this platform
    fn capabilities(&self) -> Capabilities;

    /// List every display device on the host, including inactive ones.
    ///
    /// Inactive devices report an empty display name and an `Unknown` HDR
    /// state.
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, PlatformError>;

    /// The OS path of an active device, `None` when the device is inactive
    /// or unknown
    fn get_active_path(&self, device_id: &str) -> Option<String>;

    /// The OS display name of an active device ("" when inactive or unknown)
    fn get_display_name(&self, device_id: &str) -> String;

    /// The human readable monitor name ("" when unknown)
    fn get_friendly_name(&self, device_id: &str) -> String;

    /// Current display modes of the given active devices
    fn get_modes(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<BTreeMap<DeviceId, DisplayMode>, PlatformError>;

    /// Change display modes.
    ///
    /// Every member of a duplicated group that appears in the map must be
    /// accompanied by its peers; duplicated displays share a mode.
    fn set_modes(&mut self, modes: &BTreeMap<DeviceId, DisplayMode>) -> Result<(), PlatformError>;

    /// Current HDR states of the given active devices
    fn get_hdr_states(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<BTreeMap<DeviceId, HdrState>, PlatformError>;

    /// Change HDR states.
    ///
    /// `Unknown` targets are skipped. A device whose current state cannot be
    /// read (non-HDR displays) fails the call when given a real target.
    fn set_hdr_states(
        &mut self,
        states: &BTreeMap<DeviceId, HdrState>,
    ) -> Result<(), PlatformError>;

    /// The currently active topology
    fn get_topology(&self) -> Result<Topology, PlatformError>;

    /// Switch the active topology
    fn set_topology(&mut self, topology: &Topology) -> Result<(), PlatformError>;

    /// Whether the platform can restore `topology` from its own records
    /// without the caller proving source handle feasibility
    fn can_recall_topology(&self, topology: &Topology) -> bool;

    /// Whether the device is (part of) the primary display group
    fn is_primary(&self, device_id: &str) -> Result<bool, PlatformError>;

    /// Make the device's duplicated group the primary one
    fn set_primary(&mut self, device_id: &str) -> Result<(), PlatformError>;

    /// Fast precondition probe: true when any mutation is certain to fail
    /// right now (session locked, display driver busy)
    fn will_definitely_fail(&self) -> bool;

    /// Validate a topology against this platform's group size ceiling
    fn is_topology_valid(&self, topology: &Topology) -> bool {
        topology::is_valid(topology, self.capabilities().max_group_size)
    }

    /// Order-insensitive topology comparison
    fn is_topology_equivalent(&self, lhs: &Topology, rhs: &Topology) -> bool {
        topology::is_equivalent(lhs, rhs)
    }
}
