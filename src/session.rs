//! Session-level display orchestration.
//!
//! [`SessionManager`] ties the settings state machine to the retry timer and
//! exposes the three operations a streaming host calls: configure displays
//! when a session starts or reconfigures, restore them when it ends, and
//! purge persistence on user request. Every operation and every timer
//! callback runs under the one shared lock, so applies, reverts and retries
//! never interleave.
//!
//! Failures never propagate to the stream. A backend that cannot accept
//! writes yet (no active console session, driver restarting) defers the
//! whole apply to the timer; an apply that fails outright falls back to a
//! revert, retried at the configured interval until the displays are back in
//! their original state.

use std::time::Duration;

use anyhow::Context;
use tracing::{error, warn};

use crate::config::{self, DisplayConfig, SessionDescriptor};
use crate::persistence::SettingsStore;
use crate::platform::DisplayBackend;
use crate::retry::{RetryTimer, TimerGuard};
use crate::settings::SettingsManager;

/// Owns a [`SettingsManager`] and schedules retries on its behalf.
pub struct SessionManager<B: DisplayBackend + Send + 'static> {
    timer: RetryTimer<SettingsManager<B>>,
}

impl<B: DisplayBackend + Send + 'static> SessionManager<B> {
    /// Wrap `settings`, retrying failed operations every `retry_interval`.
    pub fn new(settings: SettingsManager<B>, retry_interval: Duration) -> Self {
        Self {
            timer: RetryTimer::new(settings, retry_interval),
        }
    }

    /// Build the full stack from a loaded configuration.
    ///
    /// The persistence file defaults to the per-user data directory when the
    /// configuration does not name one.
    pub fn from_config(backend: B, config: &DisplayConfig) -> anyhow::Result<Self> {
        let path = config
            .persistence_file
            .clone()
            .or_else(SettingsStore::default_path)
            .context("could not determine a persistence path for display settings")?;

        let settings = SettingsManager::new(backend, SettingsStore::new(path))
            .with_hdr_blank_delay(Duration::from_millis(config.hdr_blank_delay_ms));

        Ok(Self::new(
            settings,
            Duration::from_secs(config.retry_interval_secs),
        ))
    }

    /// Apply the display configuration for a starting session.
    ///
    /// Never blocks the stream: parse failures are logged and dropped, a
    /// backend that cannot accept writes yet defers the apply to the timer,
    /// and a failed apply falls back to reverting.
    pub fn configure_display(&self, config: &DisplayConfig, session: &SessionDescriptor) {
        let parsed = match config::parse(config, session) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(%err, "failed to parse the display configuration");
                return;
            }
        };

        let mut guard = self.timer.lock();

        if guard.will_definitely_fail() {
            warn!(
                "display settings cannot be changed right now, starting the stream \
                 without them and retrying later"
            );

            // One deferred apply attempt once the backend comes back. If it
            // fails the session falls back to reverting and stays there.
            let mut reverting = false;
            guard.schedule(move |settings| {
                if settings.will_definitely_fail() {
                    warn!("applying display settings is still going to fail, retrying later");
                    return false;
                }

                if !reverting {
                    match settings.apply_config(&parsed) {
                        Ok(()) => return true,
                        Err(err) => {
                            warn!(
                                %err,
                                "failed to apply deferred display settings, reverting \
                                 and letting the stream continue"
                            );
                            reverting = true;
                        }
                    }
                }

                match settings.revert_settings() {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(%err, "failed to revert display settings, retrying later");
                        false
                    }
                }
            });
            return;
        }

        match guard.apply_config(&parsed) {
            Ok(()) => guard.cancel(),
            Err(err) => {
                warn!(%err, "failed to apply display settings, reverting");
                Self::restore_with(&mut guard);
            }
        }
    }

    /// Revert all display modifications, retrying in the background if the
    /// revert cannot complete right now.
    pub fn restore_state(&self) {
        let mut guard = self.timer.lock();
        Self::restore_with(&mut guard);
    }

    /// Revert if possible, then drop the persisted record and its file.
    ///
    /// For the user-facing escape hatch when a display no longer exists and
    /// an automatic revert can never succeed.
    pub fn reset_persistence(&self) {
        let mut guard = self.timer.lock();
        if let Err(err) = guard.reset_persistence() {
            warn!(%err, "failed to purge persistent display settings data");
        }
        guard.cancel();
    }

    /// Direct access to the settings manager, for hosts that need to query
    /// state. Holding the guard delays pending retries.
    pub fn settings(&self) -> TimerGuard<'_, SettingsManager<B>> {
        self.timer.lock()
    }

    fn restore_with(guard: &mut TimerGuard<'_, SettingsManager<B>>) {
        if !guard.will_definitely_fail() && guard.revert_settings().is_ok() {
            guard.cancel();
            return;
        }

        if guard.will_definitely_fail() {
            warn!("reverting display settings is going to fail, retrying later");
        }

        guard.schedule(|settings| {
            if settings.will_definitely_fail() {
                warn!("reverting display settings is still going to fail, retrying later");
                return false;
            }
            settings.revert_settings().is_ok()
        });
    }
}
