//! Session façade integration tests
//!
//! Exercises the full stack the streaming host sees: configure on session
//! start, restore on session end, deferred and retried operations through
//! the background timer. The retry interval is shrunk so the tests observe
//! several timer cycles without meaningfully slowing the suite down.

use std::thread;
use std::time::Duration;

use lamco_display_settings::config::ResolutionMode;
use lamco_display_settings::{
    DevicePrep, DisplayConfig, DisplayMode, HdrState, MemoryBackend, MemoryDevice, RefreshRate,
    Resolution, SessionDescriptor, SessionManager, SettingsManager, SettingsStore, Topology,
};
use tempfile::TempDir;

const RETRY: Duration = Duration::from_millis(50);

fn mode(width: u32, height: u32, hz: u32) -> DisplayMode {
    DisplayMode {
        resolution: Resolution { width, height },
        refresh_rate: RefreshRate::from_hz(hz),
    }
}

fn device(id: &str) -> MemoryDevice {
    MemoryDevice {
        device_id: id.to_owned(),
        friendly_name: format!("Monitor {id}"),
        adapter_id: 1,
        mode: mode(1920, 1080, 60),
        hdr_state: HdrState::Disabled,
    }
}

fn topo(groups: &[&[&str]]) -> Topology {
    groups
        .iter()
        .map(|group| group.iter().map(|id| id.to_string()).collect())
        .collect()
}

/// Two standalone displays, `A` primary.
fn dual_backend() -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    backend.add_display(device("A"));
    backend.add_display(device("B"));
    backend.boot(topo(&[&["A"], &["B"]]), "A").unwrap();
    backend
}

fn session_manager(backend: MemoryBackend, dir: &TempDir) -> SessionManager<MemoryBackend> {
    let store = SettingsStore::new(dir.path().join("settings.json"));
    let settings = SettingsManager::new(backend, store).with_hdr_blank_delay(Duration::ZERO);
    SessionManager::new(settings, RETRY)
}

fn display_config(device_id: &str, prep: DevicePrep) -> DisplayConfig {
    DisplayConfig {
        device_id: device_id.to_owned(),
        device_prep: prep,
        ..DisplayConfig::default()
    }
}

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
fn test_configure_and_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let manager = session_manager(dual_backend(), &dir);

    manager.configure_display(
        &display_config("B", DevicePrep::EnsurePrimary),
        &sops_session(),
    );

    {
        let settings = manager.settings();
        assert_eq!(settings.backend().primary_device(), Some("B".to_owned()));
        assert!(!settings.is_armed());
    }
    assert!(dir.path().join("settings.json").exists());

    manager.restore_state();

    let settings = manager.settings();
    assert_eq!(settings.backend().primary_device(), Some("A".to_owned()));
    assert!(!settings.is_armed());
    assert!(!dir.path().join("settings.json").exists());
}

#[test]
fn test_deferred_apply_waits_for_the_backend() {
    let dir = TempDir::new().unwrap();
    let mut backend = dual_backend();
    backend.set_will_definitely_fail(true);
    let manager = session_manager(backend, &dir);

    manager.configure_display(
        &display_config("B", DevicePrep::EnsurePrimary),
        &sops_session(),
    );

    {
        let settings = manager.settings();
        assert!(settings.is_armed());
        assert_eq!(settings.backend().write_count(), 0);
    }

    // The probe keeps refusing, so retries keep deferring without a write.
    thread::sleep(RETRY * 4);
    {
        let settings = manager.settings();
        assert!(settings.is_armed());
        assert_eq!(settings.backend().write_count(), 0);
    }

    manager
        .settings()
        .backend_mut()
        .set_will_definitely_fail(false);
    thread::sleep(RETRY * 6);

    let settings = manager.settings();
    assert!(!settings.is_armed());
    assert_eq!(settings.backend().primary_device(), Some("B".to_owned()));
    assert!(settings.cached_data().is_some());
}

#[test]
fn test_deferred_apply_falls_back_to_reverting() {
    let dir = TempDir::new().unwrap();
    let mut backend = dual_backend();
    backend.set_will_definitely_fail(true);
    backend.fail_mode_writes(true);
    let manager = session_manager(backend, &dir);

    let mut config = display_config("B", DevicePrep::EnsurePrimary);
    config.resolution_mode = ResolutionMode::Manual;
    config.manual_resolution = "1280x720".to_owned();
    manager.configure_display(&config, &sops_session());
    assert!(manager.settings().is_armed());

    manager
        .settings()
        .backend_mut()
        .set_will_definitely_fail(false);
    thread::sleep(RETRY * 6);

    // The deferred apply got through the primary phase and failed at modes;
    // the callback settled on reverting the partial change instead.
    let settings = manager.settings();
    assert!(!settings.is_armed());
    assert_eq!(settings.backend().primary_device(), Some("A".to_owned()));
    assert_eq!(settings.backend().display_mode("B"), Some(mode(1920, 1080, 60)));
    assert!(settings.cached_data().is_none());
    assert!(!dir.path().join("settings.json").exists());
}

#[test]
fn test_failed_apply_reverts_and_stays_unarmed() {
    let dir = TempDir::new().unwrap();
    let mut backend = dual_backend();
    backend.fail_mode_writes(true);
    let manager = session_manager(backend, &dir);

    let mut config = display_config("B", DevicePrep::EnsurePrimary);
    config.resolution_mode = ResolutionMode::Manual;
    config.manual_resolution = "1280x720".to_owned();
    manager.configure_display(&config, &sops_session());

    // The primary change that landed before the modes failure was reverted
    // on the spot, and nothing is left to retry.
    let settings = manager.settings();
    assert!(!settings.is_armed());
    assert_eq!(settings.backend().primary_device(), Some("A".to_owned()));
    assert!(settings.cached_data().is_none());
    assert!(!dir.path().join("settings.json").exists());
}

#[test]
fn test_restore_retries_until_it_lands() {
    let dir = TempDir::new().unwrap();
    let manager = session_manager(dual_backend(), &dir);

    manager.configure_display(
        &display_config("B", DevicePrep::EnsurePrimary),
        &sops_session(),
    );
    manager.settings().backend_mut().fail_primary_writes(true);

    manager.restore_state();
    {
        let settings = manager.settings();
        assert!(settings.is_armed());
        assert_eq!(settings.backend().primary_device(), Some("B".to_owned()));
    }

    manager.settings().backend_mut().fail_primary_writes(false);
    thread::sleep(RETRY * 6);

    let settings = manager.settings();
    assert!(!settings.is_armed());
    assert_eq!(settings.backend().primary_device(), Some("A".to_owned()));
    assert!(!dir.path().join("settings.json").exists());
}

#[test]
fn test_reset_persistence_cancels_pending_retries() {
    let dir = TempDir::new().unwrap();
    let manager = session_manager(dual_backend(), &dir);

    manager.configure_display(
        &display_config("B", DevicePrep::EnsurePrimary),
        &sops_session(),
    );
    manager.settings().backend_mut().fail_primary_writes(true);
    manager.restore_state();
    assert!(manager.settings().is_armed());

    manager.reset_persistence();

    {
        let settings = manager.settings();
        assert!(!settings.is_armed());
        assert!(settings.cached_data().is_none());
    }
    assert!(!dir.path().join("settings.json").exists());

    // The user accepted manual cleanup; the displays keep the modified
    // state and no timer callback touches them again.
    thread::sleep(RETRY * 3);
    let settings = manager.settings();
    assert_eq!(settings.backend().primary_device(), Some("B".to_owned()));
    assert!(!settings.is_armed());
}

#[test]
fn test_startup_restore_recovers_after_a_crash() {
    let dir = TempDir::new().unwrap();

    {
        let manager = session_manager(dual_backend(), &dir);
        manager.configure_display(
            &display_config("B", DevicePrep::EnsurePrimary),
            &sops_session(),
        );
        // The host dies here without restoring.
    }
    assert!(dir.path().join("settings.json").exists());

    // A fresh process sees the modified displays and the persisted record.
    let mut backend = dual_backend();
    backend.boot(topo(&[&["A"], &["B"]]), "B").unwrap();
    let manager = session_manager(backend, &dir);

    manager.restore_state();

    let settings = manager.settings();
    assert_eq!(settings.backend().primary_device(), Some("A".to_owned()));
    assert!(!settings.is_armed());
    assert!(!dir.path().join("settings.json").exists());
}

#[test]
fn test_parse_failure_leaves_the_displays_alone() {
    let dir = TempDir::new().unwrap();
    let manager = session_manager(dual_backend(), &dir);

    let mut config = display_config("B", DevicePrep::NoOperation);
    config.resolution_mode = ResolutionMode::Manual;
    config.manual_resolution = "garbage".to_owned();
    manager.configure_display(&config, &sops_session());

    let settings = manager.settings();
    assert!(!settings.is_armed());
    assert_eq!(settings.backend().write_count(), 0);
}
