//! Control-loop semantics, driven over a real localhost channel.
//!
//! The manager side here is a raw [`ControlChannel`] rather than a
//! [`ServiceConnector`], so every STATE message the worker emits can be
//! observed and counted exactly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lanternproto::{
    ControlChannel, Service, ServiceContext, ServiceError, ServiceMessage, ServiceOptions,
    ServiceRuntime, ServiceState, SettingUnit,
};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct Probe {
    events: Mutex<Vec<String>>,
    run_times: Mutex<Vec<Instant>>,
    fail_runs: AtomicUsize,
}

impl Probe {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn runs(&self) -> usize {
        self.run_times.lock().unwrap().len()
    }
}

struct TestService {
    probe: Arc<Probe>,
}

impl Service for TestService {
    fn name(&self) -> &'static str {
        "test"
    }

    fn setting_units(&self) -> Vec<SettingUnit> {
        vec![
            SettingUnit::new("sink", &["a", "b"]).with_callback(),
            SettingUnit::new("pace", &["rate"]).with_callback(),
            SettingUnit::new("plain", &["c"]),
        ]
    }

    fn setup(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        self.probe.record("setup");
        Ok(())
    }

    fn set_enabled(
        &mut self,
        _ctx: &mut ServiceContext<'_>,
        enable: bool,
    ) -> Result<(), ServiceError> {
        self.probe.record(format!("enable:{enable}"));
        Ok(())
    }

    fn on_shutdown(&mut self, _ctx: &mut ServiceContext<'_>) {
        self.probe.record("shutdown");
    }

    fn run_once(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        self.probe.run_times.lock().unwrap().push(Instant::now());
        if self.probe.fail_runs.load(Ordering::SeqCst) > 0 {
            self.probe.fail_runs.fetch_sub(1, Ordering::SeqCst);
            return Err(ServiceError::recoverable(2, "sink unreachable"));
        }
        std::thread::sleep(Duration::from_millis(5));
        Ok(())
    }

    fn settings_changed(&mut self, ctx: &mut ServiceContext<'_>, unit: &str) {
        // Record the values visible at callback time so the tests can pin
        // full-overwrite and cross-unit ordering behavior.
        match unit {
            "sink" => {
                let a: i64 = ctx.setting("a").unwrap();
                let b: i64 = ctx.setting("b").unwrap();
                self.probe.record(format!("unit:sink a={a} b={b}"));
            }
            "pace" => {
                let a = ctx.setting::<i64>("a").unwrap_or(-1);
                self.probe.record(format!("unit:pace sees-a={a}"));
            }
            other => self.probe.record(format!("unit:{other}")),
        }
    }
}

struct Harness {
    manager: ControlChannel,
    probe: Arc<Probe>,
    worker: Option<std::thread::JoinHandle<Result<(), lanternproto::RuntimeError>>>,
}

fn spawn_worker(opts: ServiceOptions) -> Harness {
    let manager = ControlChannel::bind().unwrap();
    let endpoint = manager.endpoint().to_string();
    let probe = Arc::new(Probe::default());
    let service = TestService {
        probe: Arc::clone(&probe),
    };
    let worker = std::thread::spawn(move || {
        ServiceRuntime::connect(&endpoint, service, opts)?.run()
    });
    Harness {
        manager,
        probe,
        worker: Some(worker),
    }
}

fn fast_opts() -> ServiceOptions {
    ServiceOptions {
        require_settings: true,
        safe_delay_increment: Duration::from_millis(50),
        error_backoff: Duration::from_millis(300),
        initial_status: Some(1),
    }
}

fn settings(pairs: &[(&str, i64)]) -> lanternproto::SettingsSnapshot {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
        .collect()
}

impl Harness {
    fn recv_state(&self, deadline: Duration) -> ServiceState {
        let until = Instant::now() + deadline;
        loop {
            let left = until.saturating_duration_since(Instant::now());
            match self.manager.recv_timeout(left.max(Duration::from_millis(1))) {
                Ok(Some(ServiceMessage::State(state))) => return state,
                Ok(Some(other)) => panic!("unexpected message from worker: {other:?}"),
                Ok(None) => {
                    if Instant::now() >= until {
                        panic!("no STATE message within {deadline:?}");
                    }
                }
                Err(e) => panic!("channel failure: {e}"),
            }
        }
    }

    fn no_state_for(&self, window: Duration) {
        if let Ok(Some(msg)) = self.manager.recv_timeout(window) {
            panic!("expected silence, got {msg:?}");
        }
    }

    fn join(mut self) {
        self.manager.send(&ServiceMessage::Kill).ok();
        if let Some(handle) = self.worker.take() {
            handle.join().unwrap().unwrap();
        }
    }

    fn join_already_killed(mut self) {
        if let Some(handle) = self.worker.take() {
            handle.join().unwrap().unwrap();
        }
    }
}

#[test]
fn initial_state_reports_configured_status() {
    let h = spawn_worker(fast_opts());
    let first = h.recv_state(Duration::from_secs(2));
    assert_eq!(
        first,
        ServiceState {
            enabled: false,
            shutting_down: false,
            value: Some(1),
            msg: None,
        }
    );
    h.join();
}

#[test]
fn enable_before_settings_is_deferred_until_setup() {
    let h = spawn_worker(fast_opts());
    let _ = h.recv_state(Duration::from_secs(2));

    // ENABLE arrives before the worker has ever seen settings.
    h.manager.send(&ServiceMessage::Enable(true)).unwrap();
    let enabled = h.recv_state(Duration::from_secs(2));
    assert!(enabled.enabled);

    // The worker remembers the enable but must not run yet.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.probe.runs(), 0);
    assert_eq!(h.probe.events(), Vec::<String>::new());

    h.manager
        .send(&ServiceMessage::Settings(settings(&[
            ("a", 1),
            ("b", 2),
            ("rate", 10),
            ("c", 3),
        ])))
        .unwrap();

    // Setup runs first, then the deferred enable, then work starts.
    let deadline = Instant::now() + Duration::from_secs(2);
    while h.probe.runs() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(h.probe.runs() > 0, "worker never started running");

    let events = h.probe.events();
    let setup_at = events.iter().position(|e| e == "setup").unwrap();
    let enable_at = events.iter().position(|e| e == "enable:true").unwrap();
    assert!(setup_at < enable_at, "events: {events:?}");

    h.join();
}

#[test]
fn duplicate_enable_is_idempotent() {
    let h = spawn_worker(fast_opts());
    let _ = h.recv_state(Duration::from_secs(2));

    h.manager
        .send(&ServiceMessage::Settings(settings(&[("a", 1), ("b", 2)])))
        .unwrap();
    h.manager.send(&ServiceMessage::Enable(true)).unwrap();
    let state = h.recv_state(Duration::from_secs(2));
    assert!(state.enabled);

    // Same value again: no hook call, no STATE re-emission.
    h.manager.send(&ServiceMessage::Enable(true)).unwrap();
    h.no_state_for(Duration::from_millis(200));

    let enables = h
        .probe
        .events()
        .iter()
        .filter(|e| e.as_str() == "enable:true")
        .count();
    assert_eq!(enables, 1);

    h.join();
}

#[test]
fn kill_is_terminal_and_shutdown_runs_once() {
    let h = spawn_worker(fast_opts());
    let _ = h.recv_state(Duration::from_secs(2));

    h.manager
        .send(&ServiceMessage::Settings(settings(&[("a", 1), ("b", 2)])))
        .unwrap();
    h.manager.send(&ServiceMessage::Enable(true)).unwrap();
    let _ = h.recv_state(Duration::from_secs(2));

    // KILL, then messages that must never be acted on.
    h.manager.send(&ServiceMessage::Kill).unwrap();
    h.manager.send(&ServiceMessage::Enable(false)).unwrap();
    h.manager
        .send(&ServiceMessage::Settings(settings(&[("a", 99), ("b", 99)])))
        .unwrap();

    let last = h.recv_state(Duration::from_secs(2));
    assert!(last.shutting_down);
    assert!(!last.enabled);

    let probe = Arc::clone(&h.probe);
    h.join_already_killed();

    let events = probe.events();
    let shutdowns = events.iter().filter(|e| e.as_str() == "shutdown").count();
    assert_eq!(shutdowns, 1, "events: {events:?}");
    assert!(
        !events.iter().any(|e| e.contains("a=99")),
        "settings applied after shutdown: {events:?}"
    );
    // The disable hook ran as part of shutdown, after the explicit enable.
    let last_enable = events.iter().rposition(|e| e.starts_with("enable:")).unwrap();
    assert_eq!(events[last_enable], "enable:false");
}

#[test]
fn settings_diff_overwrites_whole_unit_and_fires_callback_once() {
    let h = spawn_worker(fast_opts());
    let _ = h.recv_state(Duration::from_secs(2));

    h.manager
        .send(&ServiceMessage::Settings(settings(&[
            ("a", 1),
            ("b", 2),
            ("rate", 10),
            ("c", 3),
        ])))
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));

    // First snapshot: every unit changed; callbacks in registration order,
    // none for the callback-less unit.
    let events = h.probe.events();
    let unit_events: Vec<_> = events.iter().filter(|e| e.starts_with("unit:")).collect();
    assert_eq!(
        unit_events,
        vec!["unit:sink a=1 b=2", "unit:pace sees-a=1"],
        "all events: {events:?}"
    );

    // Second snapshot changes only `a`: the sink unit updates (both keys
    // rewritten, callback once) and sees the new `a`; pace already saw the
    // applied value because sink ran earlier in the same pass.
    h.manager
        .send(&ServiceMessage::Settings(settings(&[
            ("a", 7),
            ("b", 2),
            ("rate", 10),
            ("c", 3),
        ])))
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let events = h.probe.events();
    let unit_events: Vec<_> = events.iter().filter(|e| e.starts_with("unit:")).collect();
    assert_eq!(
        unit_events,
        vec![
            "unit:sink a=1 b=2",
            "unit:pace sees-a=1",
            "unit:sink a=7 b=2"
        ],
        "all events: {events:?}"
    );

    h.join();
}

#[test]
fn recoverable_failure_reports_error_state_and_retries() {
    let h = spawn_worker(fast_opts());
    let _ = h.recv_state(Duration::from_secs(2));

    h.probe.fail_runs.store(3, Ordering::SeqCst);
    h.manager
        .send(&ServiceMessage::Settings(settings(&[("a", 1), ("b", 2)])))
        .unwrap();
    h.manager.send(&ServiceMessage::Enable(true)).unwrap();

    // enabled transition
    let state = h.recv_state(Duration::from_secs(2));
    assert!(state.enabled);

    // One ERROR report per failure; value 2 with the hook's message.
    let err = h.recv_state(Duration::from_secs(2));
    assert_eq!(err.value, Some(2));
    assert_eq!(err.msg.as_deref(), Some("sink unreachable"));

    // Three failures with a 300ms backoff each: the fourth run starts no
    // earlier than ~900ms after the first.
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.probe.runs() < 4 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    let times = h.probe.run_times.lock().unwrap().clone();
    assert!(times.len() >= 4, "only {} runs", times.len());
    let elapsed = times[3].duration_since(times[0]);
    assert!(
        elapsed >= Duration::from_millis(900),
        "retries too fast: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(2500),
        "retries too slow: {elapsed:?}"
    );

    h.join();
}

#[test]
fn kill_during_backoff_returns_within_one_increment() {
    let mut opts = fast_opts();
    opts.error_backoff = Duration::from_secs(10);
    opts.safe_delay_increment = Duration::from_millis(100);
    let h = spawn_worker(opts);
    let _ = h.recv_state(Duration::from_secs(2));

    h.probe.fail_runs.store(usize::MAX / 2, Ordering::SeqCst);
    h.manager
        .send(&ServiceMessage::Settings(settings(&[("a", 1), ("b", 2)])))
        .unwrap();
    h.manager.send(&ServiceMessage::Enable(true)).unwrap();

    let _enabled = h.recv_state(Duration::from_secs(2));
    let _error = h.recv_state(Duration::from_secs(2));

    // The worker is now deep inside a 10s backoff.
    let killed_at = Instant::now();
    h.manager.send(&ServiceMessage::Kill).unwrap();
    h.join_already_killed();
    let latency = killed_at.elapsed();

    assert!(
        latency < Duration::from_millis(600),
        "shutdown took {latency:?}, expected within roughly one increment"
    );
}
