//! Display configuration
//!
//! The TOML-backed settings that describe what should happen to the host's
//! displays when a streaming session starts, plus the parser that combines
//! them with a client's session descriptor into a concrete change request.

mod parse;

pub use parse::{parse, ParseError};

use crate::types::{DeviceId, DevicePrep, HdrState, RefreshRate, Resolution};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Display preparation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Device to prepare ("" = whichever display is currently primary)
    pub device_id: String,

    /// What to do with the device before streaming starts
    pub device_prep: DevicePrep,

    /// How the display resolution follows the session
    pub resolution_mode: ResolutionMode,

    /// Resolution for manual mode, e.g. "2560x1440"
    pub manual_resolution: String,

    /// How the display refresh rate follows the session
    pub refresh_rate_mode: RefreshRateMode,

    /// Refresh rate for manual mode, e.g. "59.995"
    pub manual_refresh_rate: String,

    /// Whether the HDR state follows the session
    pub hdr_mode: HdrMode,

    /// Display mode remapping rules (first matching entry wins)
    pub remapping: Vec<RemapEntry>,

    /// Seconds between retries while the display is busy
    pub retry_interval_secs: u64,

    /// Milliseconds to keep newly enabled HDR displays dimmed (0 = disabled)
    pub hdr_blank_delay_ms: u64,

    /// Where original settings are persisted (None = per-user data dir)
    pub persistence_file: Option<PathBuf>,
}

/// Resolution handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Leave the resolution alone
    #[default]
    NoOperation,

    /// Match the resolution the client asked for
    Automatic,

    /// Use `manual_resolution`
    Manual,
}

/// Refresh rate handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshRateMode {
    /// Leave the refresh rate alone
    #[default]
    NoOperation,

    /// Match the FPS the client asked for
    Automatic,

    /// Use `manual_refresh_rate`
    Manual,
}

/// HDR handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrMode {
    /// Leave the HDR state alone
    #[default]
    NoOperation,

    /// Follow the session's HDR request
    Automatic,
}

/// Which automatic values a remap entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapKind {
    /// Both resolution and refresh rate are automatic
    #[default]
    Mixed,

    /// Only the resolution is automatic
    ResolutionOnly,

    /// Only the refresh rate is automatic
    RefreshRateOnly,
}

/// A single display mode remapping rule.
///
/// When the automatically derived values match the `received_*` fields, the
/// corresponding `final_*` values are used instead. Fields irrelevant to the
/// entry's kind are ignored; an empty string means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemapEntry {
    /// Which mode combination this entry applies to
    pub kind: RemapKind,

    /// Resolution the client asked for, e.g. "3840x2160"
    pub received_resolution: String,

    /// Refresh rate the client asked for (whole numbers only)
    pub received_refresh_rate: String,

    /// Resolution to use instead
    pub final_resolution: String,

    /// Refresh rate to use instead (decimals allowed)
    pub final_refresh_rate: String,
}

/// Parameters of the streaming session a client requested
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionDescriptor {
    /// Stream width in pixels
    pub width: i32,

    /// Stream height in pixels
    pub height: i32,

    /// Stream frame rate
    pub fps: i32,

    /// Whether the client allows the host to optimize display settings
    pub enable_sops: bool,

    /// Whether the client asked for an HDR stream
    pub enable_hdr: bool,
}

/// A fully resolved display change request.
///
/// Produced by [`parse`] from a [`DisplayConfig`] and a [`SessionDescriptor`].
/// `None` fields mean "leave that aspect of the display alone".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedConfig {
    /// Device to prepare ("" = whichever display is currently primary)
    pub device_id: DeviceId,

    /// What to do with the device before streaming starts
    pub device_prep: DevicePrep,

    /// Resolution to apply to the device's duplicate group
    pub resolution: Option<Resolution>,

    /// Refresh rate to apply
    pub refresh_rate: Option<RefreshRate>,

    /// HDR state to apply
    pub hdr_state: Option<HdrState>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            device_prep: DevicePrep::NoOperation,
            resolution_mode: ResolutionMode::NoOperation,
            manual_resolution: String::new(),
            refresh_rate_mode: RefreshRateMode::NoOperation,
            manual_refresh_rate: String::new(),
            hdr_mode: HdrMode::NoOperation,
            remapping: Vec::new(),
            retry_interval_secs: 5,
            hdr_blank_delay_ms: 1500,
            persistence_file: None,
        }
    }
}

impl DisplayConfig {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: DisplayConfig =
            toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.resolution_mode == ResolutionMode::Manual {
            match parse::parse_resolution_string(&self.manual_resolution) {
                Ok(Some(_)) => {}
                _ => anyhow::bail!("Invalid manual resolution: {:?}", self.manual_resolution),
            }
        }

        if self.refresh_rate_mode == RefreshRateMode::Manual {
            match parse::parse_refresh_rate_string(&self.manual_refresh_rate, true) {
                Ok(Some(_)) => {}
                _ => anyhow::bail!(
                    "Invalid manual refresh rate: {:?}",
                    self.manual_refresh_rate
                ),
            }
        }

        if self.retry_interval_secs == 0 {
            anyhow::bail!("retry_interval_secs must be greater than zero");
        }

        for entry in &self.remapping {
            entry.validate()?;
        }

        Ok(())
    }
}

impl RemapEntry {
    fn validate(&self) -> Result<()> {
        match self.kind {
            RemapKind::ResolutionOnly => {
                let received = parse::parse_resolution_string(&self.received_resolution)?;
                let replacement = parse::parse_resolution_string(&self.final_resolution)?;
                if received.is_none() || replacement.is_none() {
                    anyhow::bail!(
                        "resolution_only remap entries need a received and a final resolution"
                    );
                }
            }
            RemapKind::RefreshRateOnly => {
                let received =
                    parse::parse_refresh_rate_string(&self.received_refresh_rate, false)?;
                let replacement = parse::parse_refresh_rate_string(&self.final_refresh_rate, true)?;
                if received.is_none() || replacement.is_none() {
                    anyhow::bail!(
                        "refresh_rate_only remap entries need a received and a final refresh rate"
                    );
                }
            }
            RemapKind::Mixed => {
                let received_resolution =
                    parse::parse_resolution_string(&self.received_resolution)?;
                let received_refresh_rate =
                    parse::parse_refresh_rate_string(&self.received_refresh_rate, false)?;
                let final_resolution = parse::parse_resolution_string(&self.final_resolution)?;
                let final_refresh_rate =
                    parse::parse_refresh_rate_string(&self.final_refresh_rate, true)?;

                if received_resolution.is_none() && received_refresh_rate.is_none() {
                    anyhow::bail!("mixed remap entries need at least one received field");
                }
                if final_resolution.is_none() && final_refresh_rate.is_none() {
                    anyhow::bail!("mixed remap entries need at least one final field");
                }
            }
        }

        Ok(())
    }
}
