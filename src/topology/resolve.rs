//! Topology resolution
//!
//! Computes the target topology for a device-prep request and proves that a
//! brand-new topology can actually be materialized within the adapters'
//! source-handle limits. Read-only with respect to the platform: resolution
//! never switches anything.

use crate::platform::{Capabilities, DisplayBackend, PlatformError};
use crate::topology;
use crate::types::{AdapterId, DeviceId, DeviceInfo, DevicePrep, DeviceState, Topology};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Result type for resolver operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Topology resolver error types
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The platform enumerated no display devices at all
    #[error("no display devices are available")]
    NoDevices,

    /// No device currently reports the primary state
    #[error("no primary display device found")]
    PrimaryNotFound,

    /// The requested device does not exist or cannot end up active
    #[error("display device not found: {0:?}")]
    DeviceNotFound(String),

    /// The current topology fails structural validation
    #[error("the current display topology is not valid")]
    InvalidTopology,

    /// Building the target topology would exceed an adapter's handle pool
    #[error("no free source handles left on adapter {0}")]
    SourceHandlesExhausted(AdapterId),

    /// Underlying platform failure while reading state
    #[error("display platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTopology {
    /// The concrete device the request resolved to (the current primary when
    /// no device ID was given)
    pub requested: DeviceId,

    /// The requested device plus every device sharing its group in the
    /// target topology, requested device first
    pub group: Vec<DeviceId>,

    /// The topology the settings state machine should switch to
    pub target: Topology,
}

/// Resolve a device-prep request against the current topology.
///
/// Looks up the requested device (the current primary when `device_id` is
/// empty), computes the target topology for `prep`, and, when the target is a
/// topology the platform has never materialized, verifies that source
/// handles suffice to build it. Errors are side-effect free.
pub fn resolve<B: DisplayBackend + ?Sized>(
    backend: &B,
    prep: DevicePrep,
    device_id: &str,
    current: &Topology,
) -> Result<ResolvedTopology> {
    let devices = backend.enumerate_devices()?;
    let requested = find_requested_device(&devices, device_id)?;
    let capabilities = backend.capabilities();

    if !topology::is_valid(current, capabilities.max_group_size) {
        return Err(ResolveError::InvalidTopology);
    }

    let primary_requested = device_id.is_empty();
    let group = duplicate_group(current, &requested);
    let target = determine_target(prep, primary_requested, &group, &requested, current);

    if !topology::contains_device(&target, &requested) {
        return Err(ResolveError::DeviceNotFound(requested));
    }

    if !topology::is_equivalent(current, &target) && !backend.can_recall_topology(&target) {
        allocate_source_handles(&target, &devices, &capabilities)?;
    }

    let group = duplicate_group(&target, &requested);
    Ok(ResolvedTopology {
        requested,
        group,
        target,
    })
}

/// Find the device a request refers to.
///
/// An empty ID means "whichever device is primary right now".
pub(crate) fn find_requested_device(
    devices: &[DeviceInfo],
    device_id: &str,
) -> Result<DeviceId> {
    if devices.is_empty() {
        return Err(ResolveError::NoDevices);
    }

    if device_id.is_empty() {
        devices
            .iter()
            .find(|device| device.state == DeviceState::Primary)
            .map(|device| device.device_id.clone())
            .ok_or(ResolveError::PrimaryNotFound)
    } else {
        devices
            .iter()
            .find(|device| device.device_id == device_id)
            .map(|device| device.device_id.clone())
            .ok_or_else(|| ResolveError::DeviceNotFound(device_id.to_owned()))
    }
}

/// The device plus its duplicating peers in `topology`, device first.
///
/// A device absent from the topology yields a singleton group.
pub(crate) fn duplicate_group(topology: &Topology, device_id: &str) -> Vec<DeviceId> {
    let mut group = vec![device_id.to_owned()];
    if let Some(peers) = topology
        .iter()
        .find(|candidates| candidates.iter().any(|id| id == device_id))
    {
        group.extend(peers.iter().filter(|id| *id != device_id).cloned());
    }
    group
}

/// Compute the target topology for a device-prep action.
///
/// `group` is the requested device's duplicate group in `current`.
/// `EnsurePrimary` degrades to `EnsureActive` here; making the device primary
/// is a post-topology step handled by the settings state machine.
pub(crate) fn determine_target(
    prep: DevicePrep,
    primary_requested: bool,
    group: &[DeviceId],
    device_id: &str,
    current: &Topology,
) -> Topology {
    let in_topology = topology::contains_device(current, device_id);

    match prep {
        DevicePrep::NoOperation => current.clone(),
        DevicePrep::EnsureOnlyDisplay => {
            if primary_requested {
                if current.len() > 1 {
                    vec![group.to_vec()]
                } else {
                    current.clone()
                }
            } else if in_topology {
                if group.len() > 1 || current.len() > 1 {
                    vec![vec![device_id.to_owned()]]
                } else {
                    current.clone()
                }
            } else {
                vec![vec![device_id.to_owned()]]
            }
        }
        DevicePrep::EnsureActive | DevicePrep::EnsurePrimary => {
            if primary_requested || in_topology {
                current.clone()
            } else {
                let mut target = current.clone();
                target.push(vec![device_id.to_owned()]);
                target
            }
        }
    }
}

/// Prove that a brand-new topology fits within the adapters' handle pools.
///
/// Each duplicate group consumes one source handle per adapter it touches;
/// handles are shared within a group and distinct across groups on the same
/// adapter. Assignment prefers the lowest free handle, matching how the
/// platform builds new display paths.
fn allocate_source_handles(
    target: &Topology,
    devices: &[DeviceInfo],
    capabilities: &Capabilities,
) -> Result<()> {
    let adapters: BTreeMap<&str, AdapterId> = devices
        .iter()
        .map(|device| (device.device_id.as_str(), device.adapter_id))
        .collect();
    let mut used: BTreeMap<AdapterId, BTreeSet<u32>> = BTreeMap::new();

    for group in target {
        let mut group_handles: BTreeMap<AdapterId, u32> = BTreeMap::new();
        for device_id in group {
            let adapter = *adapters
                .get(device_id.as_str())
                .ok_or_else(|| ResolveError::DeviceNotFound(device_id.clone()))?;
            if group_handles.contains_key(&adapter) {
                // The group already holds this adapter's handle.
                continue;
            }

            let taken = used.entry(adapter).or_default();
            let handle = (0..capabilities.source_handles_per_adapter)
                .find(|candidate| !taken.contains(candidate))
                .ok_or(ResolveError::SourceHandlesExhausted(adapter))?;
            taken.insert(handle);
            group_handles.insert(adapter, handle);
            debug!(device = %device_id, adapter, handle, "assigned source handle");
        }
    }

    Ok(())
}
