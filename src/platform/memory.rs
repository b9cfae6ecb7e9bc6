//! In-memory display backend
//!
//! A [`DisplayBackend`] over plain data structures. Used by the test suite
//! and by headless hosts that want the settings state machine without real
//! display hardware. Every mutation is recorded in a write log so tests can
//! assert exactly which OS-level writes an operation would have performed,
//! and each write family supports failure injection.

use super::{Capabilities, DisplayBackend, PlatformError};
use crate::topology;
use crate::types::{AdapterId, DeviceId, DeviceInfo, DeviceState, DisplayMode, HdrState, Topology};
use std::collections::BTreeMap;

/// A display attached to a [`MemoryBackend`]
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    /// Stable device identifier
    pub device_id: DeviceId,

    /// Human readable monitor name
    pub friendly_name: String,

    /// Adapter the display is connected to
    pub adapter_id: AdapterId,

    /// Display mode the device starts with
    pub mode: DisplayMode,

    /// HDR state the device starts with (`Unknown` = not HDR capable)
    pub hdr_state: HdrState,
}

/// One recorded platform write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// A topology switch
    Topology,

    /// A primary display change
    Primary,

    /// A display mode change
    Modes,

    /// An HDR state change
    Hdr,
}

#[derive(Debug)]
struct LiveDisplay {
    device: MemoryDevice,
    mode: DisplayMode,
    hdr: HdrState,
    index: usize,
}

/// In-memory [`DisplayBackend`] implementation
#[derive(Debug, Default)]
pub struct MemoryBackend {
    displays: BTreeMap<DeviceId, LiveDisplay>,
    topology: Topology,
    primary: Vec<DeviceId>,
    seen: BTreeMap<Topology, Vec<DeviceId>>,
    capabilities: Capabilities,
    will_fail: bool,
    fail_topology: bool,
    fail_primary: bool,
    fail_modes: bool,
    fail_hdr: bool,
    log: Vec<WriteOp>,
    next_index: usize,
}

impl MemoryBackend {
    /// Create an empty backend with default capabilities
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the platform capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Attach a display. It starts inactive until a topology includes it.
    pub fn add_display(&mut self, device: MemoryDevice) {
        let index = self.next_index;
        self.next_index += 1;
        self.displays.insert(
            device.device_id.clone(),
            LiveDisplay {
                mode: device.mode,
                hdr: device.hdr_state,
                device,
                index,
            },
        );
    }

    /// Seed the live state without recording writes.
    ///
    /// Sets the active topology and the primary display as if the host
    /// booted that way. The topology is remembered for
    /// [`DisplayBackend::can_recall_topology`].
    pub fn boot(&mut self, topology: Topology, primary: &str) -> Result<(), PlatformError> {
        if !topology::is_valid(&topology, self.capabilities.max_group_size) {
            return Err(PlatformError::InvalidTopology(
                "boot topology failed validation".to_owned(),
            ));
        }
        for device_id in topology::device_list(&topology) {
            if !self.displays.contains_key(&device_id) {
                return Err(PlatformError::UnknownDevice(device_id));
            }
        }
        let Some(group) = group_of(&topology, primary) else {
            return Err(PlatformError::DeviceInactive(primary.to_owned()));
        };

        self.topology = topology;
        self.primary = group;
        self.remember();
        Ok(())
    }

    /// Every write performed so far, in order
    pub fn write_log(&self) -> &[WriteOp] {
        &self.log
    }

    /// Number of writes performed so far
    pub fn write_count(&self) -> usize {
        self.log.len()
    }

    /// Clear the write log
    pub fn reset_write_count(&mut self) {
        self.log.clear();
    }

    /// Make topology writes fail with a platform error
    pub fn fail_topology_writes(&mut self, fail: bool) {
        self.fail_topology = fail;
    }

    /// Make primary display writes fail with a platform error
    pub fn fail_primary_writes(&mut self, fail: bool) {
        self.fail_primary = fail;
    }

    /// Make display mode writes fail with a platform error
    pub fn fail_mode_writes(&mut self, fail: bool) {
        self.fail_modes = fail;
    }

    /// Make HDR writes fail with a platform error
    pub fn fail_hdr_writes(&mut self, fail: bool) {
        self.fail_hdr = fail;
    }

    /// Toggle the [`DisplayBackend::will_definitely_fail`] probe
    pub fn set_will_definitely_fail(&mut self, fail: bool) {
        self.will_fail = fail;
    }

    /// Current mode of a device, regardless of active state
    pub fn display_mode(&self, device_id: &str) -> Option<DisplayMode> {
        self.displays.get(device_id).map(|live| live.mode)
    }

    /// Current HDR state of a device, regardless of active state
    pub fn hdr_state(&self, device_id: &str) -> Option<HdrState> {
        self.displays.get(device_id).map(|live| live.hdr)
    }

    /// First member of the current primary group
    pub fn primary_device(&self) -> Option<DeviceId> {
        self.primary.first().cloned()
    }

    /// Record the live topology and its primary group, the way the OS keeps
    /// a database of every configuration it has materialized.
    fn remember(&mut self) {
        self.seen
            .insert(topology::normalize(&self.topology), self.primary.clone());
    }

    fn path_name(live: &LiveDisplay) -> String {
        format!("display-{}", live.index)
    }

    fn active(&self, device_id: &str) -> Result<&LiveDisplay, PlatformError> {
        let live = self
            .displays
            .get(device_id)
            .ok_or_else(|| PlatformError::UnknownDevice(device_id.to_owned()))?;
        if !topology::contains_device(&self.topology, device_id) {
            return Err(PlatformError::DeviceInactive(device_id.to_owned()));
        }
        Ok(live)
    }
}

fn group_of(topology: &Topology, device_id: &str) -> Option<Vec<DeviceId>> {
    topology
        .iter()
        .find(|group| group.iter().any(|id| id == device_id))
        .cloned()
}

impl DisplayBackend for MemoryBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, PlatformError> {
        Ok(self
            .displays
            .iter()
            .map(|(device_id, live)| {
                let active = topology::contains_device(&self.topology, device_id);
                let state = if self.primary.iter().any(|id| id == device_id) {
                    DeviceState::Primary
                } else if active {
                    DeviceState::Active
                } else {
                    DeviceState::Inactive
                };
                DeviceInfo {
                    device_id: device_id.clone(),
                    display_name: if active {
                        Self::path_name(live)
                    } else {
                        String::new()
                    },
                    friendly_name: live.device.friendly_name.clone(),
                    state,
                    hdr_state: if active { live.hdr } else { HdrState::Unknown },
                    adapter_id: live.device.adapter_id,
                }
            })
            .collect())
    }

    fn get_active_path(&self, device_id: &str) -> Option<String> {
        self.active(device_id).ok().map(Self::path_name)
    }

    fn get_display_name(&self, device_id: &str) -> String {
        self.get_active_path(device_id).unwrap_or_default()
    }

    fn get_friendly_name(&self, device_id: &str) -> String {
        self.displays
            .get(device_id)
            .map(|live| live.device.friendly_name.clone())
            .unwrap_or_default()
    }

    fn get_modes(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<BTreeMap<DeviceId, DisplayMode>, PlatformError> {
        if device_ids.is_empty() {
            return Err(PlatformError::InvalidRequest(
                "no devices specified".to_owned(),
            ));
        }

        let mut modes = BTreeMap::new();
        for device_id in device_ids {
            let live = self.active(device_id)?;
            modes.insert(device_id.clone(), live.mode);
        }
        Ok(modes)
    }

    fn set_modes(&mut self, modes: &BTreeMap<DeviceId, DisplayMode>) -> Result<(), PlatformError> {
        if modes.is_empty() {
            return Err(PlatformError::InvalidRequest(
                "no devices specified".to_owned(),
            ));
        }
        for device_id in modes.keys() {
            self.active(device_id)?;
        }
        for group in &self.topology {
            let touched = group.iter().filter(|id| modes.contains_key(*id)).count();
            if touched != 0 && touched != group.len() {
                return Err(PlatformError::InvalidRequest(
                    "duplicated displays must change modes together".to_owned(),
                ));
            }
        }

        let unchanged = modes.iter().all(|(device_id, mode)| {
            self.displays.get(device_id).is_some_and(|live| {
                live.mode.resolution == mode.resolution
                    && live.mode.refresh_rate.fuzzy_eq(&mode.refresh_rate)
            })
        });
        if unchanged {
            return Ok(());
        }

        if self.fail_modes {
            return Err(PlatformError::Api(
                "injected display mode write failure".to_owned(),
            ));
        }
        for (device_id, mode) in modes {
            if let Some(live) = self.displays.get_mut(device_id) {
                live.mode = *mode;
            }
        }
        self.log.push(WriteOp::Modes);
        Ok(())
    }

    fn get_hdr_states(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<BTreeMap<DeviceId, HdrState>, PlatformError> {
        if device_ids.is_empty() {
            return Err(PlatformError::InvalidRequest(
                "no devices specified".to_owned(),
            ));
        }

        let mut states = BTreeMap::new();
        for device_id in device_ids {
            let live = self.active(device_id)?;
            states.insert(device_id.clone(), live.hdr);
        }
        Ok(states)
    }

    fn set_hdr_states(
        &mut self,
        states: &BTreeMap<DeviceId, HdrState>,
    ) -> Result<(), PlatformError> {
        if states.is_empty() {
            return Err(PlatformError::InvalidRequest(
                "no devices specified".to_owned(),
            ));
        }

        let mut changes = Vec::new();
        for (device_id, target) in states {
            let live = self.active(device_id)?;
            if *target == HdrState::Unknown {
                continue;
            }
            if live.hdr == HdrState::Unknown {
                return Err(PlatformError::InvalidRequest(format!(
                    "display {device_id:?} does not report an HDR state"
                )));
            }
            if live.hdr != *target {
                changes.push((device_id.clone(), *target));
            }
        }
        if changes.is_empty() {
            return Ok(());
        }

        if self.fail_hdr {
            return Err(PlatformError::Api("injected HDR write failure".to_owned()));
        }
        for (device_id, target) in changes {
            if let Some(live) = self.displays.get_mut(&device_id) {
                live.hdr = target;
            }
        }
        self.log.push(WriteOp::Hdr);
        Ok(())
    }

    fn get_topology(&self) -> Result<Topology, PlatformError> {
        Ok(self.topology.clone())
    }

    fn set_topology(&mut self, topology: &Topology) -> Result<(), PlatformError> {
        if !self.is_topology_valid(topology) {
            return Err(PlatformError::InvalidTopology(
                "topology failed validation".to_owned(),
            ));
        }
        for device_id in topology::device_list(topology) {
            if !self.displays.contains_key(&device_id) {
                return Err(PlatformError::UnknownDevice(device_id));
            }
        }
        if topology::is_equivalent(&self.topology, topology) {
            return Ok(());
        }

        if self.fail_topology {
            return Err(PlatformError::Api(
                "injected topology write failure".to_owned(),
            ));
        }

        // A previously materialized topology comes back with the primary it
        // had at the time. Otherwise the primary follows its group across
        // the switch when it stays active, else the first group takes over.
        let recalled = self.seen.get(&topology::normalize(topology)).cloned();
        let previous_primary = self.primary.first().cloned();
        self.primary = recalled
            .or_else(|| previous_primary.and_then(|device_id| group_of(topology, &device_id)))
            .or_else(|| topology.first().cloned())
            .unwrap_or_default();

        self.topology = topology.clone();
        self.remember();
        self.log.push(WriteOp::Topology);
        Ok(())
    }

    fn can_recall_topology(&self, topology: &Topology) -> bool {
        if topology.is_empty() {
            return false;
        }
        let target = topology::normalize(topology);
        target.iter().all(|group| {
            self.seen
                .keys()
                .any(|known| known.iter().any(|candidate| candidate == group))
        })
    }

    fn is_primary(&self, device_id: &str) -> Result<bool, PlatformError> {
        if !self.displays.contains_key(device_id) {
            return Err(PlatformError::UnknownDevice(device_id.to_owned()));
        }
        Ok(self.primary.iter().any(|id| id == device_id))
    }

    fn set_primary(&mut self, device_id: &str) -> Result<(), PlatformError> {
        if !self.displays.contains_key(device_id) {
            return Err(PlatformError::UnknownDevice(device_id.to_owned()));
        }
        let Some(group) = group_of(&self.topology, device_id) else {
            return Err(PlatformError::DeviceInactive(device_id.to_owned()));
        };
        if self.primary.iter().any(|id| id == device_id) {
            return Ok(());
        }

        if self.fail_primary {
            return Err(PlatformError::Api(
                "injected primary display write failure".to_owned(),
            ));
        }
        self.primary = group;
        self.remember();
        self.log.push(WriteOp::Primary);
        Ok(())
    }

    fn will_definitely_fail(&self) -> bool {
        self.will_fail
    }
}
