//! Integration tests for alarm lifecycle across cycles
//!
//! Drives the pipeline through multiple cycles with real plugins and
//! checks the snooze/acknowledge semantics the UI depends on.

use glucoguard_core::alarms::{AlarmEngine, Level, DEFAULT_GROUP};
use glucoguard_core::pipeline::Pipeline;
use glucoguard_core::plugins::BgNowPlugin;
use glucoguard_core::profile::ProfileResolver;
use glucoguard_core::records::{Entry, RecordStore};
use glucoguard_core::settings::Settings;
use glucoguard_core::time::{Timestamp, MS_PER_MINUTE};
use glucoguard_core::AlarmEvent;

const T: Timestamp = 1_700_000_000_000;

fn pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.register(Box::new(BgNowPlugin));
    pipeline
}

fn store_reading(store: &mut RecordStore, mills: Timestamp, mgdl: f64) {
    store.sgvs.push(Entry::new(mills, mgdl));
    store.sgvs.sort_by_key(|e| e.mills);
}

fn run(
    pipeline: &Pipeline,
    store: &RecordStore,
    alarms: &mut AlarmEngine,
    time: Timestamp,
) -> Vec<AlarmEvent> {
    let profile = ProfileResolver::new();
    let settings = Settings::default();
    let (_, events) = pipeline.run_cycle(time, store, &profile, &settings, alarms);
    events
}

#[test]
fn urgent_ack_snoozes_and_covers_warn() {
    let pipeline = pipeline();
    let mut store = RecordStore::new();
    let mut alarms = AlarmEngine::new();

    // BG 48 is under the urgent-low boundary
    store_reading(&mut store, T, 48.0);
    let events = run(&pipeline, &store, &mut alarms, T);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::Urgent);

    // The user acknowledges for a minute
    alarms.ack(Level::Urgent, DEFAULT_GROUP, 60_000, T);

    // Condition persists, but within the silence window nothing emits
    store_reading(&mut store, T + 30_000, 47.0);
    assert!(run(&pipeline, &store, &mut alarms, T + 30_000).is_empty());

    // WARN is acknowledged as a side effect of the urgent ack
    assert!(alarms.is_acked(Level::Warn, DEFAULT_GROUP, T + 30_000));

    // Silence expired and the condition is still there: re-emit
    store_reading(&mut store, T + 70_000, 46.0);
    let events = run(&pipeline, &store, &mut alarms, T + 70_000);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::Urgent);
}

#[test]
fn recovery_sends_all_clear_once() {
    let pipeline = pipeline();
    let mut store = RecordStore::new();
    let mut alarms = AlarmEngine::new();

    store_reading(&mut store, T, 290.0);
    let events = run(&pipeline, &store, &mut alarms, T);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::Urgent);

    // Glucose returns to range
    store_reading(&mut store, T + 5 * MS_PER_MINUTE, 150.0);
    let events = run(&pipeline, &store, &mut alarms, T + 5 * MS_PER_MINUTE);
    assert_eq!(events.len(), 1);
    assert!(events[0].clear);

    // The all clear is not repeated
    let events = run(&pipeline, &store, &mut alarms, T + 10 * MS_PER_MINUTE);
    assert!(events.is_empty());
}

#[test]
fn escalation_replaces_warn_with_urgent() {
    let pipeline = pipeline();
    let mut store = RecordStore::new();
    let mut alarms = AlarmEngine::new();

    // Above target top: warning
    store_reading(&mut store, T, 200.0);
    let events = run(&pipeline, &store, &mut alarms, T);
    assert_eq!(events[0].level, Level::Warn);

    // Above the urgent boundary: escalates
    store_reading(&mut store, T + 5 * MS_PER_MINUTE, 280.0);
    let events = run(&pipeline, &store, &mut alarms, T + 5 * MS_PER_MINUTE);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::Urgent);
}

#[test]
fn warn_ack_does_not_cover_urgent_escalation() {
    let pipeline = pipeline();
    let mut store = RecordStore::new();
    let mut alarms = AlarmEngine::new();

    store_reading(&mut store, T, 200.0);
    run(&pipeline, &store, &mut alarms, T);
    alarms.ack(Level::Warn, DEFAULT_GROUP, 10 * MS_PER_MINUTE, T);

    // Escalation to urgent must cut through the warn-level ack
    store_reading(&mut store, T + 5 * MS_PER_MINUTE, 280.0);
    let events = run(&pipeline, &store, &mut alarms, T + 5 * MS_PER_MINUTE);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::Urgent);
}
