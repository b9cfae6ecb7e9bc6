//! Display settings state machine.
//!
//! [`SettingsManager`] owns the platform backend and the persistence store
//! and drives every modification episode: switch topology, change the
//! primary display, change display modes, change HDR states, in that order.
//! Reverting walks the mirror path. Originals captured before the first
//! modification are persisted to disk before the episode is considered
//! applied, so a crashed process can restore the user's settings on the next
//! start.
//!
//! The platform keeps settings per active topology, so the topology switch
//! always comes first; the other phases write into the topology they will be
//! read back from. Within an episode the originals are captured once and
//! reused: re-applies with a different configuration write new values but
//! never re-capture, which makes the episode revert to the true pre-stream
//! state no matter how many times the client reconfigures mid-stream.

mod hdr;
mod modes;

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ParsedConfig;
use crate::persistence::{PersistentData, SettingsStore, StoreError};
use crate::platform::{DisplayBackend, PlatformError};
use crate::topology::{self, ResolveError};
use crate::types::{DeviceId, DevicePrep, DisplayMode, HdrState, Topology, TopologyPair};

/// Default hold time for the HDR blanking workaround.
const DEFAULT_HDR_BLANK_DELAY: Duration = Duration::from_millis(1500);

/// Errors from applying, reverting or purging display settings.
///
/// Each variant names the first step that failed; everything captured up to
/// that point is persisted so a later revert can still undo it.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Topology resolution or the topology switch failed.
    #[error("failed to configure display topology: {0}")]
    Topology(ResolveError),

    /// Changing or restoring the primary display failed.
    #[error("failed to change the primary display: {0}")]
    PrimaryDisplay(PlatformError),

    /// Changing or restoring display modes failed.
    #[error("failed to change display modes: {0}")]
    Modes(PlatformError),

    /// Changing or restoring HDR states failed.
    #[error("failed to change display HDR states: {0}")]
    HdrStates(PlatformError),

    /// Writing the persistence file failed. The in-memory record survives,
    /// so reverting within the same process still works.
    #[error("failed to save display settings to disk: {0}")]
    FileSave(StoreError),

    /// A revert left settings partially restored. The surviving record was
    /// re-saved and a retry resumes from where this attempt stopped.
    #[error("failed to revert display settings")]
    Revert,
}

/// What the topology step produced, consumed by the remaining phases.
struct TopologyOutcome {
    /// Initial and modified topology of this apply cycle
    pair: TopologyPair,

    /// Devices active in `pair.modified` but not in the topology before it
    newly_enabled: BTreeSet<DeviceId>,

    /// Whether the session addressed the primary display (empty device id)
    primary_requested: bool,

    /// The resolved device the session addressed
    requested: DeviceId,

    /// The requested device's duplicate group in `pair.modified`
    group: Vec<DeviceId>,
}

/// Owns a display backend and applies, persists and reverts settings on it.
pub struct SettingsManager<B: DisplayBackend> {
    backend: B,
    store: SettingsStore,
    cached: Option<PersistentData>,
    hdr_blank_delay: Duration,
}

impl<B: DisplayBackend> SettingsManager<B> {
    /// Create a manager over `backend`, persisting originals through `store`.
    pub fn new(backend: B, store: SettingsStore) -> Self {
        Self {
            backend,
            store,
            cached: None,
            hdr_blank_delay: DEFAULT_HDR_BLANK_DELAY,
        }
    }

    /// Replace the HDR blanking hold time. Zero disables blanking.
    #[must_use]
    pub fn with_hdr_blank_delay(mut self, delay: Duration) -> Self {
        self.hdr_blank_delay = delay;
        self
    }

    /// Whether the backend already knows that writes cannot succeed.
    pub fn will_definitely_fail(&self) -> bool {
        self.backend.will_definitely_fail()
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the underlying backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The persistence store this manager writes originals through.
    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    /// The in-memory record of the current modification episode, if any.
    pub fn cached_data(&self) -> Option<&PersistentData> {
        self.cached.as_ref()
    }

    /// Apply a parsed session configuration to the displays.
    ///
    /// Safe to call repeatedly with different configurations: phases whose
    /// target disappeared restore their captured original and drop out of
    /// the persisted record. Idempotent when nothing changes.
    pub fn apply_config(&mut self, config: &ParsedConfig) -> Result<(), SettingsError> {
        info!(
            device_id = %config.device_id,
            prep = ?config.device_prep,
            "applying display settings"
        );

        let outcome = self.configure_topology(config)?;

        // A cached record keeps its original topology pair. Its initial
        // topology is the one before our first change and stays the revert
        // target for the whole episode.
        let had_cached = self.cached.is_some();
        let mut data = self
            .cached
            .take()
            .unwrap_or_else(|| PersistentData::new(outcome.pair.clone()));

        match self.apply_phases(config, &outcome, &mut data) {
            Ok(()) => {
                self.persist_after_apply(data, had_cached)?;
                info!("display settings applied");
                Ok(())
            }
            Err(err) => {
                // Keep whatever originals the finished phases captured so a
                // revert can undo the partial application.
                let _ = self.persist_after_apply(data, had_cached);
                Err(err)
            }
        }
    }

    /// Revert all persisted modifications and delete the persistence file.
    ///
    /// Without an in-memory record the store is consulted first, which
    /// covers restoring after a crash. No record anywhere is a trivial
    /// success. Partial failures re-save the surviving record and return
    /// [`SettingsError::Revert`]; a later call resumes from there.
    pub fn revert_settings(&mut self) -> Result<(), SettingsError> {
        if self.cached.is_none() {
            self.cached = match self.store.load() {
                Ok(Some(data)) => {
                    info!("loaded persisted display settings from a previous run");
                    Some(data)
                }
                Ok(None) => None,
                Err(err) => {
                    warn!(%err, "failed to load persisted display settings");
                    None
                }
            };
        }

        let Some(mut data) = self.cached.take() else {
            return Ok(());
        };

        info!("reverting display settings");
        let mut data_modified = false;
        if !self.try_revert_settings(&mut data, &mut data_modified) {
            if data_modified {
                if let Err(err) = self.store.save(&data) {
                    error!(%err, "failed to save partially reverted display settings");
                }
            }
            self.cached = Some(data);
            error!("failed to revert display settings");
            return Err(SettingsError::Revert);
        }

        if let Err(err) = self.store.remove() {
            warn!(%err, "failed to remove the display settings file");
        }

        info!("display settings reverted");
        Ok(())
    }

    /// Revert if possible, then drop the record and delete the file.
    ///
    /// Unlike [`Self::revert_settings`] this never fails on a revert error.
    /// It exists for the case where a display is gone for good and the user
    /// chooses to clean up manually.
    pub fn reset_persistence(&mut self) -> Result<(), SettingsError> {
        info!("purging persistent display settings data");

        if self.cached.is_some() {
            if let Err(err) = self.revert_settings() {
                warn!(%err, "failed to revert display settings before purging");
            }
        }

        self.cached = None;
        self.store.remove().map_err(SettingsError::FileSave)
    }

    /// Revert stale previous changes if needed, then resolve and switch.
    fn configure_topology(
        &mut self,
        config: &ParsedConfig,
    ) -> Result<TopologyOutcome, SettingsError> {
        let mut current = self
            .backend
            .get_topology()
            .map_err(|err| SettingsError::Topology(err.into()))?;

        if let Some(pair) = self.cached.as_ref().map(|data| data.topology.clone()) {
            let stale = self
                .topology_became_stale(config, &pair)
                .map_err(SettingsError::Topology)?;
            if stale {
                warn!("previous topology no longer matches the new one, reverting previous changes");
                self.revert_settings()?;
                current = self
                    .backend
                    .get_topology()
                    .map_err(|err| SettingsError::Topology(err.into()))?;
            }
        }

        let resolved =
            topology::resolve(&self.backend, config.device_prep, &config.device_id, &current)
                .map_err(SettingsError::Topology)?;

        if !topology::is_equivalent(&current, &resolved.target) {
            info!(target = ?resolved.target, "switching display topology");
            self.backend
                .set_topology(&resolved.target)
                .map_err(|err| SettingsError::Topology(err.into()))?;
        }

        let newly_enabled = topology::newly_enabled(&current, &resolved.target);
        Ok(TopologyOutcome {
            pair: TopologyPair {
                initial: current,
                modified: resolved.target,
            },
            newly_enabled,
            primary_requested: config.device_id.is_empty(),
            requested: resolved.requested,
            group: resolved.group,
        })
    }

    /// Whether a cached episode's topology no longer fits the new request.
    ///
    /// The episode went stale when the topology the request resolves to,
    /// computed against both the episode's initial topology and the live
    /// one, diverges from the episode's modified topology. Happens when
    /// displays were plugged or unplugged while a session was paused.
    fn topology_became_stale(
        &self,
        config: &ParsedConfig,
        pair: &TopologyPair,
    ) -> Result<bool, ResolveError> {
        let devices = self.backend.enumerate_devices()?;
        let requested = topology::find_requested_device(&devices, &config.device_id)?;
        let primary_requested = config.device_id.is_empty();

        let previous_group = topology::duplicate_group(&pair.initial, &requested);
        let previous_target = topology::determine_target(
            config.device_prep,
            primary_requested,
            &previous_group,
            &requested,
            &pair.initial,
        );

        let current = self.backend.get_topology()?;
        let group = topology::duplicate_group(&current, &requested);
        let target = topology::determine_target(
            config.device_prep,
            primary_requested,
            &group,
            &requested,
            &current,
        );

        Ok(!topology::is_equivalent(&pair.modified, &previous_target)
            || !topology::is_equivalent(&pair.modified, &target))
    }

    /// Run the primary, modes and HDR phases, recording originals in `data`.
    fn apply_phases(
        &mut self,
        config: &ParsedConfig,
        outcome: &TopologyOutcome,
        data: &mut PersistentData,
    ) -> Result<(), SettingsError> {
        let previous = data.original_primary_display.clone();
        data.original_primary_display = self
            .configure_primary_display(config.device_prep, outcome, &previous)
            .map_err(SettingsError::PrimaryDisplay)?;

        let previous = data.original_modes.clone();
        data.original_modes = self
            .configure_display_modes(config, outcome, &previous)
            .map_err(SettingsError::Modes)?;

        let previous = data.original_hdr_states.clone();
        data.original_hdr_states = self
            .configure_hdr_states(config, outcome, &previous)
            .map_err(SettingsError::HdrStates)?;

        Ok(())
    }

    /// Change or restore the primary display, returning the original to keep.
    ///
    /// An empty return means the phase holds nothing to revert.
    fn configure_primary_display(
        &mut self,
        prep: DevicePrep,
        outcome: &TopologyOutcome,
        previous: &str,
    ) -> Result<DeviceId, PlatformError> {
        if prep == DevicePrep::EnsurePrimary {
            let original = if previous.is_empty() {
                self.current_primary_display(&outcome.pair.modified)?
            } else {
                previous.to_owned()
            };

            // An empty device id session keeps whichever display is primary.
            let new_primary = if outcome.primary_requested {
                original.clone()
            } else {
                outcome.requested.clone()
            };

            info!(device_id = %new_primary, "changing the primary display");
            self.backend.set_primary(&new_primary)?;
            return Ok(original);
        }

        if !previous.is_empty() {
            info!(device_id = %previous, "restoring the primary display");
            self.backend.set_primary(previous)?;
        }

        Ok(DeviceId::new())
    }

    /// First primary device in `topology`, or empty when none reports so.
    fn current_primary_display(&self, topology: &Topology) -> Result<DeviceId, PlatformError> {
        for device_id in topology::device_list(topology) {
            if self.backend.is_primary(&device_id)? {
                return Ok(device_id);
            }
        }
        Ok(DeviceId::new())
    }

    /// Change or restore display modes, returning the originals to keep.
    fn configure_display_modes(
        &mut self,
        config: &ParsedConfig,
        outcome: &TopologyOutcome,
        previous: &BTreeMap<DeviceId, DisplayMode>,
    ) -> Result<BTreeMap<DeviceId, DisplayMode>, PlatformError> {
        if config.resolution.is_some() || config.refresh_rate.is_some() {
            let original = if previous.is_empty() {
                self.backend
                    .get_modes(&topology::device_list(&outcome.pair.modified))?
            } else {
                previous.clone()
            };

            let new_modes = modes::plan_modes(
                config.resolution,
                config.refresh_rate,
                &original,
                &outcome.group,
                outcome.primary_requested,
            );

            info!(modes = ?new_modes, "changing display modes");
            self.backend.set_modes(&new_modes)?;
            return Ok(original);
        }

        if !previous.is_empty() {
            info!("restoring display modes");
            self.backend.set_modes(previous)?;
        }

        Ok(BTreeMap::new())
    }

    /// Change or restore HDR states, returning the originals to keep.
    fn configure_hdr_states(
        &mut self,
        config: &ParsedConfig,
        outcome: &TopologyOutcome,
        previous: &BTreeMap<DeviceId, HdrState>,
    ) -> Result<BTreeMap<DeviceId, HdrState>, PlatformError> {
        if let Some(target) = config.hdr_state {
            let original = if previous.is_empty() {
                self.backend
                    .get_hdr_states(&topology::device_list(&outcome.pair.modified))?
            } else {
                previous.clone()
            };

            let new_states = hdr::plan_hdr_states(
                target,
                &original,
                &outcome.group,
                outcome.primary_requested,
            );

            info!(states = ?new_states, "changing display HDR states");
            self.write_hdr_with_blanking(&new_states, &outcome.newly_enabled)?;
            return Ok(original);
        }

        if !previous.is_empty() {
            info!("restoring display HDR states");
            self.write_hdr_with_blanking(previous, &outcome.newly_enabled)?;
        }

        Ok(BTreeMap::new())
    }

    /// Write HDR states, blanking newly enabled devices first.
    ///
    /// Freshly activated displays can come up black when HDR is written
    /// right away. Writing the inverse state, holding it for the configured
    /// delay and then writing the real one works around that.
    fn write_hdr_with_blanking(
        &mut self,
        states: &BTreeMap<DeviceId, HdrState>,
        newly_enabled: &BTreeSet<DeviceId>,
    ) -> Result<(), PlatformError> {
        if !self.hdr_blank_delay.is_zero() {
            if let Some(toggled) = hdr::blanked_states(states, newly_enabled) {
                debug!(
                    delay = ?self.hdr_blank_delay,
                    "toggling HDR states of newly enabled devices before the final write"
                );
                self.backend.set_hdr_states(&toggled)?;
                thread::sleep(self.hdr_blank_delay);
            }
        }

        self.backend.set_hdr_states(states)
    }

    /// Save or clear the record once the phases have run.
    ///
    /// A record with modifications is cached and written to disk. A record
    /// without modifications that replaced a cached one means this apply
    /// cycle restored everything, so the stale record and file are shed
    /// through the regular revert path.
    fn persist_after_apply(
        &mut self,
        data: PersistentData,
        had_cached: bool,
    ) -> Result<(), SettingsError> {
        if data.contains_modifications() {
            let result = self.store.save(&data);
            self.cached = Some(data);
            return result.map_err(|err| {
                error!(%err, "failed to save display settings");
                SettingsError::FileSave(err)
            });
        }

        if had_cached {
            self.cached = Some(data);
            return self.revert_settings();
        }

        Ok(())
    }

    /// Undo whatever `data` still holds, clearing fields as they restore.
    ///
    /// Mirror of the apply order: switch to the modified topology so the
    /// writes land where the originals were captured, restore HDR, modes
    /// and the primary display, then always switch back to the initial
    /// topology. Every step failure is logged and the rest still runs, so
    /// one dead display does not block restoring the others.
    fn try_revert_settings(&mut self, data: &mut PersistentData, data_modified: &mut bool) -> bool {
        debug!(?data, "trying to revert display settings");

        if !data.contains_modifications() {
            return true;
        }

        let have_phase_originals = !data.original_primary_display.is_empty()
            || !data.original_modes.is_empty()
            || !data.original_hdr_states.is_empty();

        let mut newly_enabled = BTreeSet::new();
        let mut partially_failed = false;

        let mut current = match self.backend.get_topology() {
            Ok(topology) => topology,
            Err(err) => {
                error!(%err, "failed to read the current display topology");
                return false;
            }
        };

        if have_phase_originals {
            match self.backend.set_topology(&data.topology.modified) {
                Ok(()) => {
                    newly_enabled
                        .extend(topology::newly_enabled(&current, &data.topology.modified));
                    current = data.topology.modified.clone();

                    if !data.original_hdr_states.is_empty() {
                        match self.backend.set_hdr_states(&data.original_hdr_states) {
                            Ok(()) => {
                                data.original_hdr_states.clear();
                                *data_modified = true;
                            }
                            Err(err) => {
                                error!(%err, "failed to restore display HDR states");
                                partially_failed = true;
                            }
                        }
                    }

                    if !data.original_modes.is_empty() {
                        match self.backend.set_modes(&data.original_modes) {
                            Ok(()) => {
                                data.original_modes.clear();
                                *data_modified = true;
                            }
                            Err(err) => {
                                error!(%err, "failed to restore display modes");
                                partially_failed = true;
                            }
                        }
                    }

                    if !data.original_primary_display.is_empty() {
                        match self.backend.set_primary(&data.original_primary_display) {
                            Ok(()) => {
                                data.original_primary_display.clear();
                                *data_modified = true;
                            }
                            Err(err) => {
                                error!(%err, "failed to restore the primary display");
                                partially_failed = true;
                            }
                        }
                    }
                }
                Err(err) => {
                    error!(%err, "failed to switch to the modified topology");
                    partially_failed = true;
                }
            }
        }

        match self.backend.set_topology(&data.topology.initial) {
            Ok(()) => {
                newly_enabled.extend(topology::newly_enabled(&current, &data.topology.initial));
                current = data.topology.initial.clone();
                *data_modified = true;
            }
            Err(err) => {
                error!(%err, "failed to restore the initial display topology");
                partially_failed = true;
            }
        }

        // Devices re-activated by either switch get the blanking treatment
        // with their current states. Purely cosmetic, failures are ignored.
        if !newly_enabled.is_empty() {
            if let Ok(states) = self
                .backend
                .get_hdr_states(&topology::device_list(&current))
            {
                debug!(?states, "re-asserting HDR states of newly enabled devices");
                if let Err(err) = self.write_hdr_with_blanking(&states, &newly_enabled) {
                    debug!(%err, "failed to re-assert HDR states");
                }
            }
        }

        !partially_failed
    }
}
