//! End-to-end checks from an assembled event to its exported renderings.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use wfb_core::{
    filter_events_by_labels, from_json, map_waveforms_to_series, to_chart_json, to_csv, to_json,
    CaptureFile, Event, EventFilter, Label, LabelPredicate, Series, Waveform,
};

fn series(id: i32, name: &str, pattern: &str) -> Arc<Series> {
    Arc::new(Series {
        id,
        name: name.to_string(),
        pattern: pattern.to_string(),
        system: "rf".to_string(),
        description: None,
        units: None,
    })
}

fn misaligned_event() -> Event {
    let mut cf = CaptureFile::new("R1M1.txt", 1.0, 3.0, 1.0);
    cf.add_waveform(Waveform::new("R1M1GMES", vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]).unwrap());
    cf.add_waveform(Waveform::new("R1M1PMES", vec![1.0, 3.0], vec![100.0, 300.0]).unwrap());
    Event::new(Utc.with_ymd_and_hms(2017, 9, 14, 15, 0, 0).unwrap(), "1L05", "rf")
        .with_id(42)
        .with_capture_files(vec![cf])
}

#[test]
fn test_misaligned_waveforms_use_preceding_sample() {
    let event = misaligned_event();
    assert!(!event.waveforms_consistent());

    let csv = to_csv(&event, None).unwrap();
    assert_eq!(
        csv,
        "time_offset,R1M1GMES,R1M1PMES\n1.0,10.0,100.0\n2.0,20.0,100.0\n3.0,30.0,300.0\n"
    );
}

#[test]
fn test_series_mapping_restricts_exports() {
    let mut event = misaligned_event();
    let catalog = vec![series(1, "GMES", "%GMES"), series(2, "PMES", "%PMES")];
    let names = event.waveform_names();
    let mapping: HashMap<_, _> = map_waveforms_to_series(names.iter().map(String::as_str), &catalog);
    event.apply_series_mapping(&mapping);

    let wanted: BTreeSet<String> = ["PMES".to_string()].into_iter().collect();
    let csv = to_csv(&event, Some(&wanted)).unwrap();
    assert_eq!(csv, "time_offset,R1M1PMES\n1.0,100.0\n3.0,300.0\n");

    let chart: serde_json::Value = serde_json::from_str(&to_chart_json(&event, Some(&wanted)).unwrap()).unwrap();
    let waveforms = chart["waveforms"].as_array().unwrap();
    assert_eq!(waveforms.len(), 1);
    assert_eq!(waveforms[0]["dygraphLabel"], "R1M1");
    assert_eq!(waveforms[0]["dygraphId"], "1");
    assert_eq!(waveforms[0]["series"][0]["name"], "PMES");
}

#[test]
fn test_json_document_round_trip() {
    let event = misaligned_event();
    let json = to_json(&event, None).unwrap();
    let parsed = from_json(&json).unwrap();
    assert_eq!(parsed.id(), Some(42));
    assert_eq!(parsed.event_time(), event.event_time());
    assert_eq!(
        parsed.capture_file("R1M1.txt").unwrap().waveform("R1M1PMES").unwrap().values(),
        &[100.0, 300.0]
    );
}

#[test]
fn test_unsaved_event_cannot_be_serialized() {
    let event = Event::new(Utc::now(), "1L05", "rf");
    assert!(to_json(&event, None).is_err());
}

#[test]
fn test_in_memory_filters_agree() {
    let label = |confidence: f64| Label {
        id: Some(1),
        model_name: "cnn-v1".to_string(),
        name: "cavity".to_string(),
        value: "4".to_string(),
        confidence,
    };
    let confident = misaligned_event().with_labels(vec![label(0.9)]);
    let unsure = misaligned_event().with_id(43).with_labels(vec![label(0.3)]);
    let unlabeled = misaligned_event().with_id(44).with_labels(vec![]);

    let predicate = LabelPredicate::builder().confidence(0.5, ">").build().unwrap();
    let kept = filter_events_by_labels(vec![confident, unsure, unlabeled], &[predicate.clone()]);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id(), Some(42));

    let filter = EventFilter::new()
        .with_system("rf")
        .with_label_predicate(predicate);
    assert!(filter.matches(&kept[0]));
}
