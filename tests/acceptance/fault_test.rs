//! Overrun, bring-up and watchdog faults.

use super::common::{Harness, IN, OUT};
use sb_common::config::{DispatcherConfig, OverrunPolicy};
use sb_common::error::SbError;
use sb_common::state::DispatcherState;
use sb_common::tier::Tier;
use sb_runtime::board::Board;
use sb_runtime::fault::FaultReason;
use sb_runtime::periodic::PeriodicTasks;
use sb_runtime::scheduler::{Dispatcher, DispatcherBuilder};
use sb_runtime::sim::SimBoard;
use sb_tasks::switchboard::SwitchBoard;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Switchboard whose 10 Hz tier stalls past its slot at one count.
struct Stalling {
    inner: SwitchBoard,
    at: u32,
}

impl PeriodicTasks for Stalling {
    fn init(&mut self, board: &mut dyn Board) -> bool {
        self.inner.init(board)
    }

    fn run(&mut self, tier: Tier, count: u32) {
        self.inner.run(tier, count);
        if tier == Tier::Hz10 && count == self.at {
            std::thread::sleep(Duration::from_millis(120));
        }
    }

    fn safe_state(&mut self) {
        self.inner.safe_state();
    }
}

fn stalling(at: u32) -> (SimBoard, Dispatcher<Stalling>) {
    let mut board = SimBoard::new();
    let config = DispatcherConfig::default();
    let inner = SwitchBoard::new(Box::new(board.indicators()), config.switchboard.clone());
    let mut dispatcher = Dispatcher::new(Stalling { inner, at }, &config);
    dispatcher.initialize(&mut board).unwrap();
    dispatcher.start().unwrap();
    (board, dispatcher)
}

#[test]
fn test_overrun_is_fatal_and_drives_safe() {
    let (board, mut dispatcher) = stalling(1);
    board.press(IN, 2);

    let err = loop {
        if let Err(e) = dispatcher.run_tick() {
            break e;
        }
    };

    match err {
        SbError::DeadlineOverrun {
            tier,
            count,
            budget_ns,
            elapsed_ns,
        } => {
            assert_eq!(tier, Tier::Hz10);
            assert_eq!(count, 1);
            assert_eq!(budget_ns, 100_000_000);
            assert!(elapsed_ns >= budget_ns);
        }
        other => panic!("expected deadline overrun, got {other}"),
    }

    assert_eq!(dispatcher.state(), DispatcherState::Fault);
    // The pulse was high when the tier overran
    assert_eq!(board.rising_transitions(OUT), 1);
    assert_eq!(board.output_level(OUT), Some(false));
    assert!(dispatcher.run_tick().is_err());
}

#[test]
fn test_fault_report_written_as_json() {
    let (_board, mut dispatcher) = stalling(0);
    assert!(dispatcher.run_tick().is_err());

    let report = dispatcher.last_fault().unwrap();
    assert_eq!(report.reason, FaultReason::DeadlineOverrun);
    assert_eq!(report.tier, Some(Tier::Hz10));
    assert_eq!(report.tick, 0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fault.json");
    report.write_json(&path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["reason"], "DEADLINE_OVERRUN");
    assert_eq!(value["tier"], "10Hz");
    assert_eq!(value["counters"]["10Hz"], 1);
    assert!(value["metrics"]["10Hz"]["overrun_count"].as_u64() >= Some(1));
}

#[test]
fn test_warn_policy_keeps_running() {
    let mut board = SimBoard::new();
    let config = DispatcherConfig {
        on_overrun: OverrunPolicy::Warn,
        ..Default::default()
    };
    let inner = SwitchBoard::new(Box::new(board.indicators()), config.switchboard.clone());
    let mut dispatcher = Dispatcher::new(Stalling { inner, at: 0 }, &config);
    dispatcher.initialize(&mut board).unwrap();
    dispatcher.start().unwrap();

    for _ in 0..200 {
        dispatcher.run_tick().unwrap();
    }
    assert_eq!(dispatcher.state(), DispatcherState::Running);
    assert_eq!(dispatcher.metrics(Tier::Hz10).unwrap().overrun_count(), 1);
}

#[test]
fn test_bring_up_fails_when_output_taken() {
    let mut board = SimBoard::new();
    let _claimed = board.output(OUT).unwrap();

    let config = DispatcherConfig::default();
    let app = SwitchBoard::new(Box::new(board.indicators()), config.switchboard.clone());
    let mut dispatcher = Dispatcher::new(app, &config);

    assert_eq!(
        dispatcher.initialize(&mut board).unwrap_err(),
        SbError::BringUp("init")
    );
    assert_eq!(dispatcher.state(), DispatcherState::Fault);
    assert!(dispatcher.start().is_err());
    assert_eq!(
        dispatcher.last_fault().map(|r| r.reason),
        Some(FaultReason::BringUp)
    );
    assert_eq!(board.handler_count(IN), 0);
}

#[test]
fn test_conflicting_pins_rejected_by_config() {
    let toml = r#"
[switchboard]
pulse_output = "P2.1"
edge_input = "P2.1"
"#;
    assert!(DispatcherConfig::from_toml(toml).is_err());
}

#[test]
fn test_watchdog_catches_stalled_loop() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);

    let mut board = SimBoard::new();
    let config = DispatcherConfig::default();
    let app = SwitchBoard::new(Box::new(board.indicators()), config.switchboard.clone());
    let mut dispatcher = DispatcherBuilder::new(app)
        .config(config)
        .overrun_policy(OverrunPolicy::Warn)
        .watchdog_timeout(Duration::from_millis(30))
        .on_watchdog_expire(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .build();
    dispatcher.initialize(&mut board).unwrap();
    dispatcher.start().unwrap();

    dispatcher.run_tick().unwrap();
    std::thread::sleep(Duration::from_millis(150));

    assert!(dispatcher.watchdog_expired());
    assert!(matches!(
        dispatcher.run_tick(),
        Err(SbError::WatchdogTimeout(_))
    ));
    assert_eq!(dispatcher.state(), DispatcherState::Fault);
    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert_eq!(
        dispatcher.last_fault().map(|r| r.reason),
        Some(FaultReason::WatchdogTimeout)
    );
}

#[test]
fn test_harness_defaults_are_running() {
    let h = Harness::new();
    assert_eq!(h.dispatcher.state(), DispatcherState::Running);
}
