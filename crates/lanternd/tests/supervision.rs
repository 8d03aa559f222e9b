//! End-to-end supervision against the real worker executables.
//!
//! These tests spawn the actual `lantern-capture` / `lantern-audio`
//! binaries and drive them the way `lanternd` does: readiness handshake,
//! settings push, enable/disable, observation, kill.

use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use lanternconf::LanternConfig;
use lanternd::manager::{ServiceId, ServiceManager};
use lanternproto::{ServiceConnector, ServiceState};

const CAPTURE_BIN: &str = env!("CARGO_BIN_EXE_lantern-capture");
const AUDIO_BIN: &str = env!("CARGO_BIN_EXE_lantern-audio");

fn spawn_worker(bin: &str, endpoint: &str) -> Child {
    Command::new(bin)
        .arg("--connect")
        .arg(endpoint)
        .spawn()
        .expect("failed to spawn worker binary")
}

fn wait_for(
    connector: &ServiceConnector,
    deadline: Duration,
    pred: impl Fn(&ServiceState) -> bool,
) -> ServiceState {
    let until = Instant::now() + deadline;
    loop {
        let state = connector.state();
        if pred(&state) {
            return state;
        }
        if Instant::now() >= until {
            panic!("state never matched within {deadline:?}; last: {state}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn wait_for_exit(child: &mut Child, deadline: Duration) -> ExitStatus {
    let until = Instant::now() + deadline;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait failed") {
            return status;
        }
        if Instant::now() >= until {
            let _ = child.kill();
            let _ = child.wait();
            panic!("worker did not exit within {deadline:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn capture_worker_full_lifecycle() {
    let connector = ServiceConnector::bind().unwrap();
    let mut child = spawn_worker(CAPTURE_BIN, connector.endpoint());

    // Readiness handshake: first STATE arrives before any control traffic.
    let ready = connector.wait_until_ready(Duration::from_secs(10)).unwrap();
    assert!(!ready.enabled);
    assert!(!ready.shutting_down);
    assert_eq!(ready.value, Some(1));

    connector
        .update_settings(&LanternConfig::default().snapshot())
        .unwrap();
    connector.enable(true).unwrap();
    let enabled = wait_for(&connector, Duration::from_secs(5), |s| s.enabled);
    assert!(!enabled.shutting_down);
    assert!(connector.last_update_age().is_some());

    connector.enable(false).unwrap();
    wait_for(&connector, Duration::from_secs(5), |s| !s.enabled);

    connector.shutdown().unwrap();
    let last = wait_for(&connector, Duration::from_secs(5), |s| s.shutting_down);
    assert!(!last.enabled);

    let status = wait_for_exit(&mut child, Duration::from_secs(5));
    assert!(status.success(), "worker exited with {status}");
}

#[test]
fn audio_worker_exits_promptly_on_kill_while_running() {
    let connector = ServiceConnector::bind().unwrap();
    let mut child = spawn_worker(AUDIO_BIN, connector.endpoint());

    connector.wait_until_ready(Duration::from_secs(10)).unwrap();
    connector
        .update_settings(&LanternConfig::default().snapshot())
        .unwrap();
    connector.enable(true).unwrap();
    wait_for(&connector, Duration::from_secs(5), |s| s.enabled);

    // Let it produce a few color updates before pulling the plug.
    std::thread::sleep(Duration::from_millis(300));

    let killed_at = Instant::now();
    connector.shutdown().unwrap();
    let status = wait_for_exit(&mut child, Duration::from_secs(5));
    let latency = killed_at.elapsed();

    assert!(status.success(), "worker exited with {status}");
    // The worker was mid-tick at worst; nowhere near the 5s error backoff.
    assert!(latency < Duration::from_secs(3), "kill took {latency:?}");
}

#[test]
fn enable_before_settings_starts_the_worker_after_setup() {
    let connector = ServiceConnector::bind().unwrap();
    let mut child = spawn_worker(AUDIO_BIN, connector.endpoint());

    connector.wait_until_ready(Duration::from_secs(10)).unwrap();

    // ENABLE first: the flag flips but the worker stays in its
    // settings-wait; work begins only after the snapshot lands.
    connector.enable(true).unwrap();
    let state = wait_for(&connector, Duration::from_secs(5), |s| s.enabled);
    assert_eq!(state.value, Some(1));

    connector
        .update_settings(&LanternConfig::default().snapshot())
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));

    // Still healthy and running after setup + deferred enable.
    let state = connector.state();
    assert!(state.enabled);
    assert!(!state.shutting_down);
    assert_eq!(state.value, Some(1));

    connector.shutdown().unwrap();
    let status = wait_for_exit(&mut child, Duration::from_secs(5));
    assert!(status.success());
}

#[test]
fn manager_runs_the_configured_fleet() {
    let worker_dir = std::path::Path::new(CAPTURE_BIN)
        .parent()
        .expect("binary has a directory");
    std::env::set_var("LANTERN_WORKER_DIR", worker_dir);

    let mut config = LanternConfig::default();
    config.capture.enabled = false;
    config.audio.enabled = true;

    let mut manager = ServiceManager::new(config);
    manager.start().unwrap();

    // The audio worker was enabled from config, capture left idle.
    let audio = manager.connector(ServiceId::Audio).unwrap();
    wait_for(audio, Duration::from_secs(5), |s| s.enabled);
    let capture = manager.connector(ServiceId::Capture).unwrap();
    assert!(!capture.state().enabled);

    // A config change fans out to the running workers.
    let mut updated = manager.config().clone();
    updated.audio.priority = 64;
    manager.update_config(updated).unwrap();

    manager.shutdown().unwrap();
    assert!(manager.states().is_empty());
}
