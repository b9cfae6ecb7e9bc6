//! # lamco-display-settings
//!
//! Display configuration manager for the Lamco game-streaming host.
//!
//! Before a streaming session starts, the host's monitor configuration must be
//! reshaped to match what the remote client requested: which outputs are
//! active, their resolution and refresh rate, their HDR state, and which one
//! is primary. When the session ends (or the host restarts after a crash) the
//! machine must be put back exactly the way it was. This crate implements the
//! topology/settings state machine that does both.
//!
//! # Architecture
//!
//! ```text
//! lamco-display-settings
//!   ├─> Config Parser (user config + client session → ParsedConfig)
//!   ├─> Topology Resolver (device prep action → target topology)
//!   ├─> Settings State Machine (topology → primary → modes → HDR)
//!   ├─> Persistence Store (original settings, crash-safe revert anchor)
//!   ├─> Retry Timer (background re-attempts on one shared lock)
//!   └─> Session Façade (never blocks the stream on display failures)
//! ```
//!
//! # Data Flow
//!
//! **Apply path:** `SessionManager::configure_display` → parse →
//! `SettingsManager::apply_config` → `DisplayBackend` writes → store save
//!
//! **Revert path:** `SessionManager::restore_state` →
//! `SettingsManager::revert_settings` (HDR → modes → primary → topology)
//!
//! **Failure path:** any failed apply/revert is re-attempted by the retry
//! timer at a fixed interval, serialized with foreground calls through one
//! shared lock, until it succeeds or is cancelled.
//!
//! # Example
//!
//! ```no_run
//! use lamco_display_settings::config::{DisplayConfig, SessionDescriptor};
//! use lamco_display_settings::persistence::SettingsStore;
//! use lamco_display_settings::platform::MemoryBackend;
//! use lamco_display_settings::session::SessionManager;
//! use lamco_display_settings::settings::SettingsManager;
//! use std::time::Duration;
//!
//! let backend = MemoryBackend::new();
//! let store = SettingsStore::new("/var/lib/lamco/original_display_settings.json");
//! let settings = SettingsManager::new(backend, store);
//! let manager = SessionManager::new(settings, Duration::from_secs(5));
//!
//! // Revert anything a crashed previous run left behind.
//! manager.restore_state();
//!
//! // Reshape the displays for an incoming client session.
//! let config = DisplayConfig::default();
//! let session = SessionDescriptor {
//!     width: 1920,
//!     height: 1080,
//!     fps: 60,
//!     enable_sops: true,
//!     enable_hdr: false,
//! };
//! manager.configure_display(&config, &session);
//!
//! // ...stream...
//!
//! manager.restore_state();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// Core modules
// =============================================================================

/// User configuration, client-session descriptors, and config parsing
pub mod config;

/// Durable record of original display settings
pub mod persistence;

/// Platform capability interface and the in-process memory backend
///
/// The core never talks to an OS display API directly; everything goes
/// through the [`platform::DisplayBackend`] trait. OS-specific backends live
/// in their own crates and are selected at host startup. [`platform::MemoryBackend`]
/// is a complete in-process implementation used by tests and benches.
pub mod platform;

/// Background retry scheduling on one shared lock
pub mod retry;

/// Session façade: the entry point the streaming host calls
pub mod session;

/// The settings state machine: apply, revert, and persistence orchestration
///
/// Applies changes in a fixed order (topology → primary display → display
/// modes → HDR states), captures pre-modification originals exactly once per
/// episode, and can revert any subset that was already applied. Phase
/// failures are terminal for the call but never leave the persisted record
/// behind the live state.
pub mod settings;

/// Pure topology operations and the topology resolver
pub mod topology;

/// Shared value types (devices, modes, topologies)
pub mod types;

// =============================================================================
// Re-exports (for convenience)
// =============================================================================

pub use config::{DisplayConfig, ParseError, ParsedConfig, SessionDescriptor};
pub use persistence::{PersistentData, SettingsStore};
pub use platform::{Capabilities, DisplayBackend, MemoryBackend, MemoryDevice, PlatformError, WriteOp};
pub use retry::RetryTimer;
pub use session::SessionManager;
pub use settings::{SettingsError, SettingsManager};
pub use topology::ResolveError;
pub use types::{
    DeviceId, DeviceInfo, DevicePrep, DeviceState, DisplayMode, HdrState, RefreshRate, Resolution,
    Topology, TopologyPair,
};
