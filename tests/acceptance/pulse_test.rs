//! Edge-to-pulse behavior through the dispatcher.

use super::common::{high_counts, relaxed, Harness, IN, OUT};
use sb_common::pin::Edge;
use sb_common::tier::Tier;

#[test]
fn test_pulse_is_exactly_five_invocations() {
    let mut h = Harness::new();
    h.run_through(2);
    h.click(5);

    let trace = h.trace(8);
    assert_eq!(trace.first().map(|&(c, _)| c), Some(3));
    assert_eq!(high_counts(&trace), vec![3, 4, 5, 6, 7]);
    assert_eq!(h.board.rising_transitions(OUT), 1);
    assert_eq!(h.board.falling_transitions(OUT), 1);
}

#[test]
fn test_edge_mid_pulse_restarts_window() {
    let mut h = Harness::new();
    h.run_through(1);
    h.click(0);
    let mut trace = h.trace(2);

    h.click(2);
    trace.extend(h.trace(8));

    // Continuous high from 2 through 8; the pulses do not stack
    assert_eq!(high_counts(&trace), (2..=8).collect::<Vec<_>>());
    assert_eq!(h.board.rising_transitions(OUT), 1);
    assert_eq!(h.dispatcher.tasks().stats().pulses_restarted, 1);
}

#[test]
fn test_edge_on_boundary_extends_pulse() {
    let mut h = Harness::new();
    h.click(0);
    let mut trace = h.trace(5);
    assert_eq!(high_counts(&trace), vec![0, 1, 2, 3, 4]);

    // Consumed at count 5, the tick that would have ended the pulse
    h.click(0);
    trace.extend(h.trace(7));

    assert_eq!(high_counts(&trace), (0..=9).collect::<Vec<_>>());
    assert_eq!(h.board.rising_transitions(OUT), 1);
}

#[test]
fn test_burst_of_edges_is_one_edge() {
    let mut h = Harness::new();
    h.run_through(0);

    for _ in 0..1000 {
        h.board.fire_edge(IN, Edge::Falling);
    }
    let trace = h.trace(6);

    assert_eq!(high_counts(&trace), vec![1, 2, 3, 4, 5]);
    let stats = h.dispatcher.tasks().stats();
    assert_eq!(stats.accepted_edges, 1);
    assert_eq!(stats.suppressed_edges, 999);
    assert_eq!(stats.pulses_started, 1);
}

#[test]
fn test_idle_output_stays_low() {
    let mut h = Harness::new();
    let trace = h.trace(100);

    assert!(high_counts(&trace).is_empty());
    assert_eq!(h.board.rising_transitions(OUT), 0);
    assert_eq!(h.board.output_level(OUT), Some(false));
}

#[test]
fn test_latch_rearms_after_consumption() {
    let mut h = Harness::new();

    h.click(3);
    h.trace(6);
    h.click(3);
    let trace = h.trace(6);

    assert_eq!(high_counts(&trace), vec![6, 7, 8, 9, 10]);
    assert_eq!(h.board.rising_transitions(OUT), 2);
    assert_eq!(h.dispatcher.tasks().stats().accepted_edges, 2);
}

#[test]
fn test_rising_edges_do_not_trigger() {
    let mut h = Harness::new();
    for _ in 0..10 {
        h.board.fire_edge(IN, Edge::Rising);
    }
    let trace = h.trace(3);
    assert!(high_counts(&trace).is_empty());
}

#[test]
fn test_pulse_length_from_config() {
    let mut config = relaxed();
    config.switchboard.pulse_ticks = 3;
    let mut h = Harness::with_config(config);

    h.click(1);
    let trace = h.trace(5);
    assert_eq!(high_counts(&trace), vec![0, 1, 2]);
}

#[test]
fn test_pulse_independent_of_fast_tiers() {
    let mut h = Harness::new();
    h.click(0);
    h.trace(3);

    // 1000 Hz has fired on every base tick so far
    assert_eq!(
        u64::from(h.dispatcher.counter(Tier::Hz1000)),
        h.dispatcher.tick()
    );
    assert!(h.output());
}
