//! Tier rates, counters and lifecycle through the dispatcher.

use super::common::{relaxed, Harness, OUT};
use sb_common::state::DispatcherState;
use sb_common::tier::Tier;
use sb_tasks::switchboard::{LED_1000HZ, LED_100HZ, LED_1HZ};
use std::time::{Duration, Instant};

#[test]
fn test_tier_rates_over_one_second() {
    let mut h = Harness::new();
    h.ticks(1000);

    assert_eq!(h.dispatcher.counter(Tier::Hz1000), 1000);
    assert_eq!(h.dispatcher.counter(Tier::Hz100), 100);
    assert_eq!(h.dispatcher.counter(Tier::Hz10), 10);
    assert_eq!(h.dispatcher.counter(Tier::Hz1), 1);

    assert_eq!(h.board.indicator_toggles(LED_1000HZ), 1000);
    assert_eq!(h.board.indicator_toggles(LED_100HZ), 100);
    assert_eq!(h.board.indicator_toggles(LED_1HZ), 1);
    assert_eq!(h.board.indicator_toggles(2), 0);
}

#[test]
fn test_first_tick_fires_every_tier() {
    let mut h = Harness::new();

    let first = h.dispatcher.run_tick().unwrap();
    assert_eq!(first.tick, 0);
    assert_eq!(first.fired.len(), 4);

    let second = h.dispatcher.run_tick().unwrap();
    assert_eq!(second.fired.iter().collect::<Vec<_>>(), vec![Tier::Hz1000]);
}

#[test]
fn test_counters_advance_by_one_per_invocation() {
    let mut h = Harness::new();

    let mut previous = h.dispatcher.counters();
    for _ in 0..250 {
        let result = h.dispatcher.run_tick().unwrap();
        let current = h.dispatcher.counters();
        for tier in Tier::ALL {
            let i = tier.index();
            let expected = previous[i] + u32::from(result.fired.contains(tier));
            assert_eq!(current[i], expected, "{tier} at tick {}", result.tick);
        }
        previous = current;
    }
}

#[test]
fn test_without_1khz_tier() {
    let mut config = relaxed();
    config.run_1khz = false;
    let mut h = Harness::with_config(config);
    assert_eq!(h.dispatcher.base_period(), Duration::from_millis(10));

    h.ticks(100);
    assert_eq!(h.dispatcher.counter(Tier::Hz1000), 0);
    assert_eq!(h.dispatcher.counter(Tier::Hz100), 100);
    assert_eq!(h.dispatcher.counter(Tier::Hz10), 10);
    assert_eq!(h.board.indicator_toggles(LED_1000HZ), 0);
}

#[test]
fn test_stop_mid_pulse_drives_safe() {
    let mut h = Harness::new();
    h.click(2);
    h.trace(2);
    assert!(h.output());

    h.dispatcher.stop().unwrap();
    assert_eq!(h.dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(h.board.output_level(OUT), Some(false));
    assert!(!h.board.indicator(LED_1000HZ));
    assert!(h.dispatcher.run_tick().is_err());
}

#[test]
fn test_run_cycle_paces_base_ticks() {
    let mut h = Harness::new();

    let start = Instant::now();
    for _ in 0..20 {
        h.dispatcher.run_cycle().unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(15));
    assert_eq!(h.dispatcher.tick(), 20);
}
