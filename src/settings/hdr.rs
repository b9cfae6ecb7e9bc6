//! HDR state planning.
//!
//! Mirrors the refresh-rate coverage rule from the mode planner: the target
//! state covers the whole group when the session addresses the primary
//! display, otherwise only the requested device. Devices whose current state
//! is unknown report no HDR support and are never written.
//!
//! Also hosts the blanking computation. Some displays freshly activated by a
//! topology switch come up with a black screen when HDR is enabled right
//! away; writing the inverse state first, holding it briefly and then writing
//! the real one works around that.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{DeviceId, HdrState};

/// Compute the new HDR state map for one apply cycle.
pub(crate) fn plan_hdr_states(
    target: HdrState,
    originals: &BTreeMap<DeviceId, HdrState>,
    group: &[DeviceId],
    primary_requested: bool,
) -> BTreeMap<DeviceId, HdrState> {
    let mut states = originals.clone();

    let limit = if primary_requested { group.len() } else { 1 };
    for device_id in group.iter().take(limit) {
        if let Some(state) = states.get_mut(device_id) {
            if *state != HdrState::Unknown {
                *state = target;
            }
        }
    }

    states
}

/// Invert the pending states of newly enabled devices for the blanking pass.
///
/// Returns `None` when no state actually flips, so callers can skip the
/// extra write and the delay entirely.
pub(crate) fn blanked_states(
    states: &BTreeMap<DeviceId, HdrState>,
    newly_enabled: &BTreeSet<DeviceId>,
) -> Option<BTreeMap<DeviceId, HdrState>> {
    let mut toggled = states.clone();
    let mut changed = false;

    for device_id in newly_enabled {
        let Some(state) = toggled.get_mut(device_id) else {
            continue;
        };

        match *state {
            HdrState::Enabled => {
                *state = HdrState::Disabled;
                changed = true;
            }
            HdrState::Disabled => {
                *state = HdrState::Enabled;
                changed = true;
            }
            HdrState::Unknown => {}
        }
    }

    changed.then_some(toggled)
}
