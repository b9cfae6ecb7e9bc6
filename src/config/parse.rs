//! Config parsing
//!
//! Turns a [`DisplayConfig`] plus the client's [`SessionDescriptor`] into a
//! [`ParsedConfig`], resolving the automatic/manual modes into concrete
//! values and applying the user's display mode remapping rules.

use super::{
    DisplayConfig, HdrMode, ParsedConfig, RefreshRateMode, RemapEntry, RemapKind, ResolutionMode,
    SessionDescriptor,
};
use crate::types::{HdrState, RefreshRate, Resolution};
use thiserror::Error;
use tracing::{debug, warn};

/// Config parsing error types
#[derive(Error, Debug)]
pub enum ParseError {
    /// A resolution string does not match the "1920x1080" pattern
    #[error("invalid resolution string: {0:?}")]
    InvalidResolution(String),

    /// A refresh rate string does not match the "123" or "123.456" pattern
    #[error("invalid refresh rate string: {0:?}")]
    InvalidRefreshRate(String),

    /// The client sent a negative stream resolution
    #[error("invalid session resolution: {width}x{height}")]
    InvalidSessionResolution {
        /// Stream width the client sent
        width: i32,
        /// Stream height the client sent
        height: i32,
    },

    /// The client sent a negative stream FPS
    #[error("invalid session FPS value: {0}")]
    InvalidSessionFps(i32),

    /// A remap entry does not set the values its kind requires
    #[error("remap entry is missing required values")]
    IncompleteRemapEntry,

    /// A remap entry references a value the parsed config does not have
    #[error("remap entry cannot be applied without a parsed display mode")]
    RemapWithoutTarget,
}

/// Combine the display configuration with a session descriptor.
///
/// Returns the concrete change request for this session. Automatic modes
/// pull values from the session; manual modes pull them from the config.
/// Resolution changes additionally require the client to have opted into
/// display optimization (`enable_sops`), otherwise they silently degrade to
/// "leave alone" with a warning.
pub fn parse(
    config: &DisplayConfig,
    session: &SessionDescriptor,
) -> Result<ParsedConfig, ParseError> {
    let mut parsed = ParsedConfig {
        device_id: config.device_id.clone(),
        device_prep: config.device_prep,
        resolution: None,
        refresh_rate: None,
        hdr_state: parse_hdr_option(config, session),
    };

    parse_resolution_option(config, session, &mut parsed)?;
    parse_refresh_rate_option(config, session, &mut parsed)?;
    remap_display_mode(config, session, &mut parsed)?;

    debug!(?parsed, "parsed display device configuration");
    Ok(parsed)
}

fn parse_hdr_option(config: &DisplayConfig, session: &SessionDescriptor) -> Option<HdrState> {
    match config.hdr_mode {
        HdrMode::Automatic => Some(if session.enable_hdr {
            HdrState::Enabled
        } else {
            HdrState::Disabled
        }),
        HdrMode::NoOperation => None,
    }
}

fn parse_resolution_option(
    config: &DisplayConfig,
    session: &SessionDescriptor,
    parsed: &mut ParsedConfig,
) -> Result<(), ParseError> {
    match config.resolution_mode {
        ResolutionMode::Automatic => {
            if !session.enable_sops {
                warn!(
                    "resolution is set to change automatically, but the client did not opt \
                     into display optimization, leaving the resolution alone"
                );
            } else if session.width >= 0 && session.height >= 0 {
                parsed.resolution = Some(Resolution {
                    width: session.width as u32,
                    height: session.height as u32,
                });
            } else {
                return Err(ParseError::InvalidSessionResolution {
                    width: session.width,
                    height: session.height,
                });
            }
        }
        ResolutionMode::Manual => {
            if !session.enable_sops {
                warn!(
                    "resolution is set to change manually, but the client did not opt into \
                     display optimization, leaving the resolution alone"
                );
            } else {
                parsed.resolution = match parse_resolution_string(&config.manual_resolution)? {
                    Some(resolution) => Some(resolution),
                    None => {
                        return Err(ParseError::InvalidResolution(
                            config.manual_resolution.clone(),
                        ));
                    }
                };
            }
        }
        ResolutionMode::NoOperation => {}
    }

    Ok(())
}

fn parse_refresh_rate_option(
    config: &DisplayConfig,
    session: &SessionDescriptor,
    parsed: &mut ParsedConfig,
) -> Result<(), ParseError> {
    match config.refresh_rate_mode {
        RefreshRateMode::Automatic => {
            if session.fps >= 0 {
                parsed.refresh_rate = Some(RefreshRate::from_hz(session.fps as u32));
            } else {
                return Err(ParseError::InvalidSessionFps(session.fps));
            }
        }
        RefreshRateMode::Manual => {
            parsed.refresh_rate =
                match parse_refresh_rate_string(&config.manual_refresh_rate, true)? {
                    Some(rate) => Some(rate),
                    None => {
                        return Err(ParseError::InvalidRefreshRate(
                            config.manual_refresh_rate.clone(),
                        ));
                    }
                };
        }
        RefreshRateMode::NoOperation => {}
    }

    Ok(())
}

/// Parse a "1920x1080" style string. An empty (or whitespace) string is a
/// valid "not set" value.
pub(crate) fn parse_resolution_string(input: &str) -> Result<Option<Resolution>, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .split_once('x')
        .and_then(|(width, height)| {
            Some(Resolution {
                width: parse_digits(width)?,
                height: parse_digits(height)?,
            })
        })
        .map(Some)
        .ok_or_else(|| ParseError::InvalidResolution(trimmed.to_owned()))
}

/// Parse a refresh rate string into an exact rational.
///
/// "60" becomes 60/1; "59.995" becomes 59995/1000 when `allow_decimal` is
/// set. An empty (or whitespace) string is a valid "not set" value.
pub(crate) fn parse_refresh_rate_string(
    input: &str,
    allow_decimal: bool,
) -> Result<Option<RefreshRate>, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let invalid = || ParseError::InvalidRefreshRate(trimmed.to_owned());

    if let Some((whole, fraction)) = trimmed.split_once('.') {
        if !allow_decimal {
            return Err(invalid());
        }

        // Drop the decimal point: "59.995" -> numerator 59995, and the
        // denominator is 10^decimal_places.
        if parse_digits(whole).is_none() || parse_digits(fraction).is_none() {
            return Err(invalid());
        }
        let numerator = parse_digits(&format!("{whole}{fraction}")).ok_or_else(invalid)?;
        let denominator = 10u32
            .checked_pow(fraction.len() as u32)
            .ok_or_else(invalid)?;

        Ok(Some(RefreshRate {
            numerator,
            denominator,
        }))
    } else {
        let numerator = parse_digits(trimmed).ok_or_else(invalid)?;
        Ok(Some(RefreshRate {
            numerator,
            denominator: 1,
        }))
    }
}

/// Strict unsigned decimal parse. Rejects signs, whitespace and overflow.
fn parse_digits(input: &str) -> Option<u32> {
    if input.is_empty() || !input.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    input.parse().ok()
}

struct ParsedRemapEntry {
    received_resolution: Option<Resolution>,
    received_refresh_rate: Option<RefreshRate>,
    final_resolution: Option<Resolution>,
    final_refresh_rate: Option<RefreshRate>,
}

fn remap_display_mode(
    config: &DisplayConfig,
    session: &SessionDescriptor,
    parsed: &mut ParsedConfig,
) -> Result<(), ParseError> {
    let active_kind = match (
        config.resolution_mode == ResolutionMode::Automatic,
        config.refresh_rate_mode == RefreshRateMode::Automatic,
    ) {
        (true, true) => RemapKind::Mixed,
        (true, false) => RemapKind::ResolutionOnly,
        (false, true) => RemapKind::RefreshRateOnly,
        (false, false) => return Ok(()),
    };

    let entries: Vec<&RemapEntry> = config
        .remapping
        .iter()
        .filter(|entry| entry.kind == active_kind)
        .collect();
    if entries.is_empty() {
        debug!("no applicable display mode remapping entries");
        return Ok(());
    }
    debug!("trying to remap the display mode");

    let mut parsed_entries = Vec::new();
    for entry in entries {
        let values = match active_kind {
            RemapKind::ResolutionOnly => {
                let received = parse_resolution_string(&entry.received_resolution)?;
                let replacement = parse_resolution_string(&entry.final_resolution)?;
                if received.is_none() || replacement.is_none() {
                    return Err(ParseError::IncompleteRemapEntry);
                }
                if !session.enable_sops {
                    warn!(
                        "skipping resolution remapping, the client did not opt into display \
                         optimization"
                    );
                    return Ok(());
                }
                ParsedRemapEntry {
                    received_resolution: received,
                    received_refresh_rate: None,
                    final_resolution: replacement,
                    final_refresh_rate: None,
                }
            }
            RemapKind::RefreshRateOnly => {
                let received = parse_refresh_rate_string(&entry.received_refresh_rate, false)?;
                let replacement = parse_refresh_rate_string(&entry.final_refresh_rate, true)?;
                if received.is_none() || replacement.is_none() {
                    return Err(ParseError::IncompleteRemapEntry);
                }
                ParsedRemapEntry {
                    received_resolution: None,
                    received_refresh_rate: received,
                    final_resolution: None,
                    final_refresh_rate: replacement,
                }
            }
            RemapKind::Mixed => {
                let received_resolution = parse_resolution_string(&entry.received_resolution)?;
                let received_refresh_rate =
                    parse_refresh_rate_string(&entry.received_refresh_rate, false)?;
                let final_resolution = parse_resolution_string(&entry.final_resolution)?;
                let final_refresh_rate =
                    parse_refresh_rate_string(&entry.final_refresh_rate, true)?;

                if (received_resolution.is_none() && received_refresh_rate.is_none())
                    || (final_resolution.is_none() && final_refresh_rate.is_none())
                {
                    return Err(ParseError::IncompleteRemapEntry);
                }

                if !session.enable_sops
                    && (received_resolution.is_some() || final_resolution.is_some())
                {
                    warn!(
                        "skipping a remapping entry that touches the resolution, the client \
                         did not opt into display optimization"
                    );
                    continue;
                }

                ParsedRemapEntry {
                    received_resolution,
                    received_refresh_rate,
                    final_resolution,
                    final_refresh_rate,
                }
            }
        };
        parsed_entries.push(values);
    }

    // First matching entry wins. Refresh rates are compared exactly here,
    // unlike the fuzzy comparison used for change detection.
    for entry in parsed_entries {
        let matches = match (&entry.received_resolution, &entry.received_refresh_rate) {
            (Some(resolution), Some(rate)) => {
                let (Some(target_resolution), Some(target_rate)) =
                    (&parsed.resolution, &parsed.refresh_rate)
                else {
                    return Err(ParseError::RemapWithoutTarget);
                };
                resolution == target_resolution && rate == target_rate
            }
            (Some(resolution), None) => {
                let Some(target) = &parsed.resolution else {
                    return Err(ParseError::RemapWithoutTarget);
                };
                resolution == target
            }
            (None, Some(rate)) => {
                let Some(target) = &parsed.refresh_rate else {
                    return Err(ParseError::RemapWithoutTarget);
                };
                rate == target
            }
            (None, None) => return Err(ParseError::IncompleteRemapEntry),
        };

        if matches {
            if let Some(resolution) = entry.final_resolution {
                debug!(%resolution, "remapping the resolution");
                parsed.resolution = Some(resolution);
            }
            if let Some(rate) = entry.final_refresh_rate {
                debug!(%rate, "remapping the refresh rate");
                parsed.refresh_rate = Some(rate);
            }
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sops_session() -> SessionDescriptor {
        SessionDescriptor {
            width: 1920,
            height: 1080,
            fps: 60,
            enable_sops: true,
            enable_hdr: false,
        }
    }

    #[test]
    fn test_parse_resolution_strings() {
        assert_eq!(
            parse_resolution_string("1920x1080").unwrap(),
            Some(Resolution {
                width: 1920,
                height: 1080
            })
        );
        assert_eq!(
            parse_resolution_string("  2560x1440  ").unwrap(),
            Some(Resolution {
                width: 2560,
                height: 1440
            })
        );
        assert_eq!(parse_resolution_string("").unwrap(), None);
        assert_eq!(parse_resolution_string("   ").unwrap(), None);

        for invalid in ["1920x", "x1080", "1920X1080", "1920x1080x", "axb", "-1x1"] {
            assert!(parse_resolution_string(invalid).is_err(), "{invalid:?}");
        }
    }

    #[test]
    fn test_parse_refresh_rate_whole_number() {
        assert_eq!(
            parse_refresh_rate_string("60", true).unwrap(),
            Some(RefreshRate {
                numerator: 60,
                denominator: 1
            })
        );
    }

    #[test]
    fn test_parse_refresh_rate_decimal() {
        assert_eq!(
            parse_refresh_rate_string("59.995", true).unwrap(),
            Some(RefreshRate {
                numerator: 59995,
                denominator: 1000
            })
        );
        assert_eq!(
            parse_refresh_rate_string("0.5", true).unwrap(),
            Some(RefreshRate {
                numerator: 5,
                denominator: 10
            })
        );
    }

    #[test]
    fn test_parse_refresh_rate_empty_means_unset() {
        assert_eq!(parse_refresh_rate_string("", true).unwrap(), None);
        assert_eq!(parse_refresh_rate_string("   ", false).unwrap(), None);
    }

    #[test]
    fn test_parse_refresh_rate_rejects_garbage() {
        for invalid in ["abc", "60.", ".5", "59.9.5", "+60", "-60", "6 0"] {
            assert!(
                parse_refresh_rate_string(invalid, true).is_err(),
                "{invalid:?}"
            );
        }
    }

    #[test]
    fn test_parse_refresh_rate_decimal_gate() {
        assert!(parse_refresh_rate_string("59.94", false).is_err());
        assert!(parse_refresh_rate_string("59", false).is_ok());
    }

    #[test]
    fn test_automatic_resolution_follows_session() {
        let config = DisplayConfig {
            resolution_mode: ResolutionMode::Automatic,
            ..Default::default()
        };

        let parsed = parse(&config, &sops_session()).unwrap();
        assert_eq!(
            parsed.resolution,
            Some(Resolution {
                width: 1920,
                height: 1080
            })
        );
    }

    #[test]
    fn test_automatic_resolution_requires_sops() {
        let config = DisplayConfig {
            resolution_mode: ResolutionMode::Automatic,
            ..Default::default()
        };
        let session = SessionDescriptor {
            enable_sops: false,
            ..sops_session()
        };

        // Degrades to "leave alone" rather than failing.
        let parsed = parse(&config, &session).unwrap();
        assert_eq!(parsed.resolution, None);
    }

    #[test]
    fn test_negative_session_values_are_rejected() {
        let config = DisplayConfig {
            resolution_mode: ResolutionMode::Automatic,
            ..Default::default()
        };
        let session = SessionDescriptor {
            width: -1,
            ..sops_session()
        };
        assert!(matches!(
            parse(&config, &session),
            Err(ParseError::InvalidSessionResolution { .. })
        ));

        let config = DisplayConfig {
            refresh_rate_mode: RefreshRateMode::Automatic,
            ..Default::default()
        };
        let session = SessionDescriptor {
            fps: -30,
            ..sops_session()
        };
        assert!(matches!(
            parse(&config, &session),
            Err(ParseError::InvalidSessionFps(-30))
        ));
    }

    #[test]
    fn test_automatic_refresh_rate_ignores_sops() {
        let config = DisplayConfig {
            refresh_rate_mode: RefreshRateMode::Automatic,
            ..Default::default()
        };
        let session = SessionDescriptor {
            enable_sops: false,
            ..sops_session()
        };

        let parsed = parse(&config, &session).unwrap();
        assert_eq!(parsed.refresh_rate, Some(RefreshRate::from_hz(60)));
    }

    #[test]
    fn test_hdr_follows_session() {
        let config = DisplayConfig {
            hdr_mode: HdrMode::Automatic,
            ..Default::default()
        };

        let session = SessionDescriptor {
            enable_hdr: true,
            ..sops_session()
        };
        assert_eq!(
            parse(&config, &session).unwrap().hdr_state,
            Some(HdrState::Enabled)
        );

        let session = SessionDescriptor {
            enable_hdr: false,
            ..sops_session()
        };
        assert_eq!(
            parse(&config, &session).unwrap().hdr_state,
            Some(HdrState::Disabled)
        );

        let config = DisplayConfig::default();
        assert_eq!(parse(&config, &session).unwrap().hdr_state, None);
    }

    #[test]
    fn test_refresh_rate_remap() {
        let config = DisplayConfig {
            refresh_rate_mode: RefreshRateMode::Automatic,
            remapping: vec![RemapEntry {
                kind: RemapKind::RefreshRateOnly,
                received_refresh_rate: "60".to_owned(),
                final_refresh_rate: "59.995".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let parsed = parse(&config, &sops_session()).unwrap();
        assert_eq!(
            parsed.refresh_rate,
            Some(RefreshRate {
                numerator: 59995,
                denominator: 1000
            })
        );
    }

    #[test]
    fn test_first_matching_remap_entry_wins() {
        let entry = |received: &str, replacement: &str| RemapEntry {
            kind: RemapKind::RefreshRateOnly,
            received_refresh_rate: received.to_owned(),
            final_refresh_rate: replacement.to_owned(),
            ..Default::default()
        };
        let config = DisplayConfig {
            refresh_rate_mode: RefreshRateMode::Automatic,
            remapping: vec![entry("120", "119.95"), entry("60", "59.995"), entry("60", "30")],
            ..Default::default()
        };

        let parsed = parse(&config, &sops_session()).unwrap();
        assert_eq!(
            parsed.refresh_rate,
            Some(RefreshRate {
                numerator: 59995,
                denominator: 1000
            })
        );
    }

    #[test]
    fn test_resolution_remap_abandoned_without_sops() {
        let config = DisplayConfig {
            resolution_mode: ResolutionMode::Automatic,
            remapping: vec![RemapEntry {
                kind: RemapKind::ResolutionOnly,
                received_resolution: "1920x1080".to_owned(),
                final_resolution: "3840x2160".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let session = SessionDescriptor {
            enable_sops: false,
            ..sops_session()
        };

        let parsed = parse(&config, &session).unwrap();
        assert_eq!(parsed.resolution, None);
    }

    #[test]
    fn test_mixed_remap_skips_resolution_entries_without_sops() {
        let config = DisplayConfig {
            resolution_mode: ResolutionMode::Automatic,
            refresh_rate_mode: RefreshRateMode::Automatic,
            remapping: vec![
                RemapEntry {
                    kind: RemapKind::Mixed,
                    received_resolution: "1920x1080".to_owned(),
                    final_resolution: "3840x2160".to_owned(),
                    ..Default::default()
                },
                RemapEntry {
                    kind: RemapKind::Mixed,
                    received_refresh_rate: "60".to_owned(),
                    final_refresh_rate: "59.995".to_owned(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let session = SessionDescriptor {
            enable_sops: false,
            ..sops_session()
        };

        // The resolution entry is skipped, the refresh rate entry still
        // applies.
        let parsed = parse(&config, &session).unwrap();
        assert_eq!(parsed.resolution, None);
        assert_eq!(
            parsed.refresh_rate,
            Some(RefreshRate {
                numerator: 59995,
                denominator: 1000
            })
        );
    }

    #[test]
    fn test_incomplete_remap_entry_fails_parsing() {
        let config = DisplayConfig {
            refresh_rate_mode: RefreshRateMode::Automatic,
            remapping: vec![RemapEntry {
                kind: RemapKind::RefreshRateOnly,
                received_refresh_rate: "60".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert!(matches!(
            parse(&config, &sops_session()),
            Err(ParseError::IncompleteRemapEntry)
        ));
    }

    proptest! {
        #[test]
        fn prop_whole_number_rates_parse_exactly(hz: u32) {
            let parsed = parse_refresh_rate_string(&hz.to_string(), false).unwrap();
            prop_assert_eq!(parsed, Some(RefreshRate { numerator: hz, denominator: 1 }));
        }

        #[test]
        fn prop_three_decimal_rates_parse_exactly(whole in 0u32..4_000_000, frac in 0u32..1000) {
            let input = format!("{whole}.{frac:03}");
            let parsed = parse_refresh_rate_string(&input, true).unwrap();
            prop_assert_eq!(
                parsed,
                Some(RefreshRate { numerator: whole * 1000 + frac, denominator: 1000 })
            );
        }
    }
}
