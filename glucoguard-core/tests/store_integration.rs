//! Integration tests for record reconciliation
//!
//! Exercises the full payload path: JSON off the wire, merge into the
//! store, and the derived views the resolver and plugins consume.

use glucoguard_core::records::{process_durations, Payload, RecordStore};
use glucoguard_core::time::{Timestamp, MS_PER_MINUTE, TWO_DAYS_MS};
use glucoguard_core::units::Units;

const NOW: Timestamp = 1_700_000_000_000;

fn apply_json(store: &mut RecordStore, json: &str, now: Timestamp) {
    let payload: Payload = serde_json::from_str(json).expect("payload should parse");
    store.apply(payload, now);
}

#[test]
fn full_refresh_then_delta_update() {
    let mut store = RecordStore::new();

    // Small timestamps keep the retention horizon saturated at zero, so
    // the scenario exercises the merge alone
    apply_json(
        &mut store,
        r#"{
            "sgvs": [
                { "mills": 100, "mgdl": 1 },
                { "mills": 200, "mgdl": 2 }
            ]
        }"#,
        1000,
    );

    apply_json(
        &mut store,
        r#"{ "delta": true, "sgvs": [{ "mills": 200, "mgdl": 99 }] }"#,
        1000,
    );

    let readings: Vec<(u64, f64)> = store.sgvs.iter().map(|e| (e.mills, e.mgdl)).collect();
    assert_eq!(readings, vec![(100, 1.0), (200, 99.0)]);
}

#[test]
fn delta_with_treatment_lifecycle() {
    let mut store = RecordStore::new();

    apply_json(
        &mut store,
        r#"{
            "treatments": [
                { "_id": "a", "mills": 1000, "eventType": "Meal Bolus", "carbs": 30 },
                { "_id": "b", "mills": 2000, "eventType": "Correction Bolus", "insulin": 1.5 }
            ]
        }"#,
        NOW,
    );

    // Update a, remove b, create c in one delta
    apply_json(
        &mut store,
        r#"{
            "delta": true,
            "treatments": [
                { "_id": "a", "mills": 1000, "eventType": "Meal Bolus", "carbs": 45, "action": "update" },
                { "_id": "b", "mills": 2000, "eventType": "Correction Bolus", "action": "remove" },
                { "_id": "c", "mills": 3000, "eventType": "Correction Bolus", "insulin": 0.5 }
            ]
        }"#,
        NOW,
    );

    assert_eq!(store.treatments.len(), 2);
    assert_eq!(store.treatments[0].id.as_deref(), Some("a"));
    assert_eq!(store.treatments[0].carbs, Some(45.0));
    assert!(store.treatments[0].action.is_none());
    assert_eq!(store.treatments[1].id.as_deref(), Some("c"));
}

#[test]
fn temp_target_mmol_heuristic_end_to_end() {
    let mut store = RecordStore::new();

    apply_json(
        &mut store,
        r#"{
            "delta": true,
            "treatments": [
                {
                    "_id": "tagged", "mills": 1000, "eventType": "Temporary Target",
                    "targetTop": 10, "targetBottom": 5, "units": "mmol"
                },
                {
                    "_id": "untagged-low", "mills": 2000, "eventType": "Temporary Target",
                    "targetTop": 8, "targetBottom": 4
                },
                {
                    "_id": "plausible", "mills": 3000, "eventType": "Temporary Target",
                    "targetTop": 160, "targetBottom": 90
                }
            ]
        }"#,
        NOW,
    );

    let tagged = &store.treatments[0];
    assert!((tagged.target_top.unwrap() - 180.18).abs() < 0.01);
    assert!((tagged.target_bottom.unwrap() - 90.09).abs() < 0.01);
    assert_eq!(tagged.units, Some(Units::MgDl));

    // The < 20 heuristic converts even without a unit tag
    let untagged = &store.treatments[1];
    assert!((untagged.target_top.unwrap() - 144.14).abs() < 0.01);

    // A plausible mg/dL target is untouched
    let plausible = &store.treatments[2];
    assert_eq!(plausible.target_top, Some(160.0));
    assert_eq!(plausible.units, None);
}

#[test]
fn duration_view_cuts_across_event_types() {
    let mut store = RecordStore::new();

    apply_json(
        &mut store,
        r#"{
            "treatments": [
                { "_id": "t1", "mills": 0, "eventType": "Temp Basal", "duration": 120, "percent": 50 },
                { "_id": "end", "mills": 1800000, "eventType": "Temp Basal", "duration": 0 },
                { "_id": "note", "mills": 60000, "eventType": "Note" }
            ]
        }"#,
        NOW,
    );

    let temps: Vec<_> = store
        .treatments_by_event_type("Temp Basal")
        .into_iter()
        .cloned()
        .collect();
    assert_eq!(temps.len(), 2);

    let processed = process_durations(temps, true);
    // 30 minutes in: the end event truncates the 2-hour temp
    assert_eq!(processed[0].duration, Some(30.0));
    assert_eq!(processed[0].cut_by, Some(1_800_000));
    assert_eq!(processed[1].cutting, Some(0));
}

#[test]
fn retention_rolls_old_readings_out_of_delta_merges() {
    let mut store = RecordStore::new();
    let old = NOW - TWO_DAYS_MS - MS_PER_MINUTE;

    apply_json(
        &mut store,
        &format!(
            r#"{{ "sgvs": [ {{ "mills": {}, "mgdl": 90 }}, {{ "mills": {}, "mgdl": 95 }} ] }}"#,
            old,
            NOW - MS_PER_MINUTE
        ),
        NOW,
    );
    assert_eq!(store.sgvs.len(), 2);

    apply_json(
        &mut store,
        &format!(r#"{{ "delta": true, "sgvs": [{{ "mills": {}, "mgdl": 100 }}] }}"#, NOW),
        NOW,
    );

    let mills: Vec<u64> = store.sgvs.iter().map(|e| e.mills).collect();
    assert_eq!(mills, vec![NOW - MS_PER_MINUTE, NOW]);
}

#[test]
fn profiles_prepare_on_ingest() {
    let mut store = RecordStore::new();

    apply_json(
        &mut store,
        r#"{
            "profiles": [{
                "_id": "p1",
                "startDate": "2023-11-01T00:00:00Z",
                "defaultProfile": "Default",
                "store": {
                    "Default": {
                        "sens": [ { "time": "00:00", "value": 90 } ],
                        "basal": [ { "time": "00:00", "value": 1.0 }, { "time": "06:30", "value": 1.4 } ],
                        "dia": 3
                    }
                }
            }]
        }"#,
        NOW,
    );

    let profile = &store.profiles[0];
    // mills derived from startDate
    assert!(profile.mills > 0);

    // Segment times preprocessed to seconds
    let set = &profile.store["Default"];
    match set.basal.as_ref().unwrap() {
        glucoguard_core::records::ValueSpan::Segmented(segments) => {
            assert_eq!(segments[1].time_as_seconds, Some(6 * 3600 + 30 * 60));
        }
        other => panic!("expected segments, got {:?}", other),
    }
}
