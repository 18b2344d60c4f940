//! Event repository round trips against a live MySQL server.
//!
//! Run with `cargo test -p wfb-db -- --ignored` and `DATABASE_URL` pointing
//! at a server where the test account may create databases.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use wfb_db::test_fixtures::TestDatabase;
use wfb_db::{
    CaptureFile, Error, Event, EventFilter, EventQueryOptions, EventRepository,
    FilesystemWaveformSource, Label, LabelPredicate, Metadata, MetadataValue,
    MySqlEventRepository, NewSeries, SeriesRepository, Waveform,
};

fn event_at(secs: u32, location: &str) -> Event {
    Event::new(
        Utc.with_ymd_and_hms(2019, 3, 1, 12, 0, secs).unwrap(),
        location,
        "rf",
    )
}

fn capture_file(name: &str, waveforms: &[&str]) -> CaptureFile {
    let mut cf = CaptureFile::new(name, -0.2, 0.2, 0.2).with_metadata(vec![
        Metadata::new(
            "R1M1GSET",
            MetadataValue::Number {
                value: 5.5,
                offset: -0.1,
                start: -10.0,
            },
        ),
        Metadata::new("R1M1STAT", MetadataValue::Unarchived),
    ]);
    for w in waveforms {
        cf.add_waveform(Waveform::header_only(*w));
    }
    cf
}

fn label(name: &str, value: &str, confidence: f64) -> Label {
    Label {
        id: None,
        model_name: "cnn-v1".to_string(),
        name: name.to_string(),
        value: value.to_string(),
        confidence,
    }
}

#[tokio::test]
#[ignore]
async fn test_insert_and_get_full_event() {
    let test_db = TestDatabase::new().await;
    let events = &test_db.db.events;

    test_db
        .db
        .series
        .insert(&NewSeries {
            name: "GMES".to_string(),
            pattern: "R1%GMES".to_string(),
            system: "rf".to_string(),
            description: None,
            units: Some("MV/m".to_string()),
        })
        .await
        .unwrap();

    let event = event_at(0, "1L05")
        .with_classification("multi-cav")
        .with_capture_files(vec![capture_file("R1M1.txt", &["R1M1GMES", "R1M1PMES"])])
        .with_labels(vec![label("cavity", "4", 0.9)]);
    let id = events.insert(&event).await.unwrap();

    let options = EventQueryOptions {
        include_capture_files: true,
        include_labels: true,
        include_data: false,
    };
    let stored = events.get(id, options).await.unwrap();
    assert_eq!(stored.id(), Some(id));
    assert_eq!(stored.event_time(), event.event_time());
    assert_eq!(stored.classification(), Some("multi-cav"));

    let cf = stored.capture_file("R1M1.txt").unwrap();
    assert_eq!(cf.metadata.len(), 2);
    assert_eq!(cf.waveform("R1M1GMES").unwrap().series()[0].name, "GMES");
    assert!(cf.waveform("R1M1PMES").unwrap().series().is_empty());
    assert_eq!(stored.labels().unwrap()[0].value, "4");

    let summary = events.get(id, EventQueryOptions::summary()).await.unwrap();
    assert!(summary.capture_files().is_none());
    assert!(summary.labels().is_none());

    assert_eq!(events.series_names(&[id]).await.unwrap(), vec!["GMES"]);
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_unknown_system_rolls_back() {
    let test_db = TestDatabase::new().await;
    let event = Event::new(Utc::now(), "0L04", "bogus");
    let err = test_db.db.events.insert(&event).await.unwrap_err();
    assert!(matches!(err, Error::Referential(_)));

    let all = test_db
        .db
        .events
        .list(&EventFilter::new(), EventQueryOptions::summary())
        .await
        .unwrap();
    assert!(all.is_empty());
    test_db.cleanup().await;
}

async fn count_rows(test_db: &TestDatabase, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(test_db.pool())
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_failure_after_event_row_rolls_back_everything() {
    let test_db = TestDatabase::new().await;
    let event = event_at(45, "1L07")
        .with_capture_files(vec![capture_file("R1M1.txt", &["R1M1GMES", "R1M1PMES"])])
        .with_labels(vec![Label {
            model_name: "m".repeat(200),
            ..label("cavity", "4", 0.9)
        }]);

    // Event, capture, waveform and metadata rows are written before the label fails.
    let err = test_db.db.events.insert(&event).await.unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    for table in ["event", "capture", "capture_wf", "capture_meta", "label"] {
        assert_eq!(count_rows(&test_db, table).await, 0, "rows left in {}", table);
    }
    let filter = EventFilter::new().with_locations(vec!["1L07".to_string()]);
    assert!(test_db
        .db
        .events
        .list(&filter, EventQueryOptions::summary())
        .await
        .unwrap()
        .is_empty());

    // The same event stores cleanly once the label fits.
    let fixed = event.with_labels(vec![label("cavity", "4", 0.9)]);
    test_db.db.events.insert(&fixed).await.unwrap();
    assert_eq!(count_rows(&test_db, "capture_wf").await, 2);
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_filters_and_ordering() {
    let test_db = TestDatabase::new().await;
    let events = &test_db.db.events;

    let a = events
        .insert(&event_at(10, "1L05").with_capture_files(vec![
            capture_file("a.txt", &["R1M1GMES"]),
            capture_file("b.txt", &["R1M2GMES"]),
        ]))
        .await
        .unwrap();
    let b = events
        .insert(&event_at(5, "2L22").with_labels(vec![label("cavity", "1", 0.4)]))
        .await
        .unwrap();
    let c = events
        .insert(&event_at(20, "1L05").with_labels(vec![label("cavity", "2", 0.8)]))
        .await
        .unwrap();

    let all = events
        .list(&EventFilter::new(), EventQueryOptions::summary())
        .await
        .unwrap();
    let ids: Vec<i64> = all.iter().filter_map(Event::id).collect();
    assert_eq!(ids, vec![b, a, c]);

    let filter = EventFilter::new().with_locations(vec!["1L05".to_string()]);
    let ids: Vec<i64> = events
        .list(&filter, EventQueryOptions::summary())
        .await
        .unwrap()
        .iter()
        .filter_map(Event::id)
        .collect();
    assert_eq!(ids, vec![a, c]);

    let filter = EventFilter::new().with_min_capture_files(2);
    let listed = events.list(&filter, EventQueryOptions::summary()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), Some(a));

    let confident = LabelPredicate::builder().confidence(0.5, ">").build().unwrap();
    let filter = EventFilter::new().with_label_predicate(confident);
    let listed = events.list(&filter, EventQueryOptions::summary()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), Some(c));

    let filter = EventFilter::new().with_label_predicate(LabelPredicate::any_label());
    assert_eq!(events.most_recent_id(&filter).await.unwrap(), Some(c));
    assert_eq!(
        events.location_names().await.unwrap(),
        vec!["1L05".to_string(), "2L22".to_string()]
    );
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_flags_are_mutually_exclusive() {
    let test_db = TestDatabase::new().await;
    let events = &test_db.db.events;
    let id = events.insert(&event_at(0, "1L05")).await.unwrap();

    assert_eq!(events.set_archive_flag(id, true).await.unwrap(), 1);
    assert_eq!(events.set_delete_flag(&[id], true).await.unwrap(), 1);
    let stored = events.get(id, EventQueryOptions::summary()).await.unwrap();
    assert!(stored.is_delete());
    assert!(!stored.is_archive());

    events.set_archive_flag(id, true).await.unwrap();
    let stored = events.get(id, EventQueryOptions::summary()).await.unwrap();
    assert!(stored.is_archive());
    assert!(!stored.is_delete());
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_delete_requires_pending_flag_unless_forced() {
    let test_db = TestDatabase::new().await;
    let events = &test_db.db.events;
    let id = events
        .insert(&event_at(0, "1L05").with_capture_files(vec![capture_file("a.txt", &["W"])]))
        .await
        .unwrap();

    assert_eq!(events.delete(id, false).await.unwrap(), 0);
    events.set_delete_flag(&[id], true).await.unwrap();
    assert_eq!(events.delete(id, false).await.unwrap(), 1);
    assert!(matches!(
        events.get(id, EventQueryOptions::summary()).await,
        Err(Error::EventNotFound(_))
    ));

    let forced = events.insert(&event_at(1, "1L05")).await.unwrap();
    assert_eq!(events.delete(forced, true).await.unwrap(), 1);
    assert!(matches!(events.delete(forced, true).await, Err(Error::EventNotFound(_))));
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_insert_reads_raw_data_and_loads_samples() {
    let test_db = TestDatabase::new().await;
    let tmp = TempDir::new().unwrap();
    let event = event_at(30, "1L05");

    let dir = tmp.path().join(event.relative_path());
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("R1M1.txt"), "time\tR1M1GMES\n0.0\t1.0\n0.5\t2.0\n").unwrap();

    let repo = MySqlEventRepository::new(test_db.pool().clone())
        .with_source(Arc::new(FilesystemWaveformSource::new(tmp.path())));

    let id = repo.insert(&event).await.unwrap();
    let stored = repo.get(id, EventQueryOptions::full()).await.unwrap();
    let w = stored.capture_file("R1M1.txt").unwrap().waveform("R1M1GMES").unwrap();
    assert_eq!(w.values(), &[1.0, 2.0]);
    assert_eq!(
        wfb_db::to_csv(&stored, None).unwrap(),
        "time_offset,R1M1GMES\n0.0,1.0\n0.5,2.0\n"
    );

    // No raw data for this one
    let err = repo.insert(&event_at(31, "1L05")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    test_db.cleanup().await;
}
