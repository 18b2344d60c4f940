//! Reconstructs nested events from flat query rows.
//!
//! Rows arrive in separate passes (events, then labels, capture files,
//! waveforms, metadata and series candidates). Children are attached to
//! their parent by key, never by position, so passes may deliver rows in any
//! order. A NULL in a required column, an unknown metadata type tag, or a
//! child row whose parent was never seen is a data integrity error; the
//! offending row is rejected and everything assembled so far is kept.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::trace;

use wfb_core::{CaptureFile, Error, Event, Label, Metadata, Result, Series, Waveform};

use crate::rows::{required, CaptureRow, EventRow, LabelRow, MetadataRow, SeriesMappingRow, WaveformRow};

/// Incrementally builds events from rows.
#[derive(Debug, Default)]
pub struct EventAssembler {
    events: Vec<Event>,
    index: HashMap<i64, usize>,
    labels: HashMap<i64, Vec<Label>>,
    labels_loaded: bool,
    /// capture_id -> (event_id, capture file)
    captures: BTreeMap<i64, (i64, CaptureFile)>,
    captures_loaded: bool,
    series: HashMap<i32, Arc<Series>>,
    mappings: HashMap<i64, HashMap<String, Vec<Arc<Series>>>>,
}

impl EventAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events seen so far.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Ids of the events seen so far, in row order.
    pub fn event_ids(&self) -> Vec<i64> {
        self.events.iter().filter_map(Event::id).collect()
    }

    /// Ids of the capture files seen so far.
    pub fn capture_ids(&self) -> Vec<i64> {
        self.captures.keys().copied().collect()
    }

    pub fn event(&self, id: i64) -> Option<&Event> {
        self.index.get(&id).map(|&i| &self.events[i])
    }

    /// Add an event row. A repeated event id is ignored.
    pub fn add_event_row(&mut self, row: EventRow) -> Result<()> {
        let id = required(row.event_id, "event", "event_id")?;
        if self.index.contains_key(&id) {
            return Ok(());
        }
        let what = format!("event {}", id);
        let time = required(row.event_time_utc, &what, "event_time_utc")?;
        let location = required(row.location, &what, "location")?;
        let system = required(row.system_name, &what, "system_name")?;
        let archive = required(row.archive, &what, "archive")?;
        let delete = required(row.to_be_deleted, &what, "to_be_deleted")?;
        let grouped = required(row.grouped, &what, "grouped")?;

        let mut event = Event::new(time, location, system)
            .with_id(id)
            .with_flags(archive, delete)
            .with_grouped(grouped);
        if let Some(classification) = row.classification {
            event = event.with_classification(classification);
        }

        trace!(subsystem = "db", component = "assembler", event_id = id, "Event row");
        self.index.insert(id, self.events.len());
        self.events.push(event);
        Ok(())
    }

    /// Mark labels as requested so every event gets a (possibly empty) list.
    pub fn expect_labels(&mut self) {
        self.labels_loaded = true;
    }

    pub fn add_label_row(&mut self, row: LabelRow) -> Result<()> {
        self.labels_loaded = true;
        let label_id = required(row.label_id, "label", "label_id")?;
        let what = format!("label {}", label_id);
        let event_id = self.known_event(required(row.event_id, &what, "event_id")?, &what)?;
        let label = Label {
            id: Some(label_id),
            model_name: required(row.model_name, &what, "model_name")?,
            name: required(row.label_name, &what, "label_name")?,
            value: required(row.label_value, &what, "label_value")?,
            confidence: required(row.label_confidence, &what, "label_confidence")?,
        };
        self.labels.entry(event_id).or_default().push(label);
        Ok(())
    }

    /// Mark capture files as requested so every event gets a (possibly empty) map.
    pub fn expect_capture_files(&mut self) {
        self.captures_loaded = true;
    }

    pub fn add_capture_row(&mut self, row: CaptureRow) -> Result<()> {
        self.captures_loaded = true;
        let capture_id = required(row.capture_id, "capture", "capture_id")?;
        let what = format!("capture {}", capture_id);
        let event_id = self.known_event(required(row.event_id, &what, "event_id")?, &what)?;
        let cf = CaptureFile::new(
            required(row.filename, &what, "filename")?,
            required(row.sample_start, &what, "sample_start")?,
            required(row.sample_end, &what, "sample_end")?,
            required(row.sample_step, &what, "sample_step")?,
        )
        .with_id(capture_id);
        self.captures.insert(capture_id, (event_id, cf));
        Ok(())
    }

    pub fn add_waveform_row(&mut self, row: WaveformRow) -> Result<()> {
        let cwf_id = required(row.cwf_id, "waveform", "cwf_id")?;
        let what = format!("waveform {}", cwf_id);
        let capture_id = required(row.capture_id, &what, "capture_id")?;
        let name = required(row.waveform_name, &what, "waveform_name")?;
        let cf = self.known_capture(capture_id, &what)?;
        cf.add_waveform(Waveform::header_only(name).with_id(cwf_id));
        Ok(())
    }

    pub fn add_metadata_row(&mut self, row: MetadataRow) -> Result<()> {
        let meta_id = required(row.meta_id, "metadata", "meta_id")?;
        let what = format!("metadata {}", meta_id);
        let capture_id = required(row.capture_id, &what, "capture_id")?;
        let name = required(row.meta_name, &what, "meta_name")?;
        let tag = required(row.meta_type, &what, "type")?;
        let mut metadata = Metadata::from_parts(name, &tag, row.value.as_deref(), row.offset, row.start)?;
        metadata.id = Some(meta_id);
        self.known_capture(capture_id, &what)?.add_metadata(metadata);
        Ok(())
    }

    /// Record one waveform name to series candidate for an event.
    ///
    /// Series descriptors are shared across events by id.
    pub fn add_series_mapping_row(&mut self, row: SeriesMappingRow) -> Result<()> {
        let event_id = required(row.event_id, "series mapping", "event_id")?;
        let event_id = self.known_event(event_id, "series mapping")?;
        let waveform = required(row.waveform_name, "series mapping", "waveform_name")?;
        let series = row.series.into_series()?;
        let shared = Arc::clone(self.series.entry(series.id).or_insert_with(|| Arc::new(series)));
        self.mappings
            .entry(event_id)
            .or_default()
            .entry(waveform)
            .or_default()
            .push(shared);
        Ok(())
    }

    /// Finish assembly and return events in row order.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = self.events;
        let index = self.index;

        if self.captures_loaded {
            let mut per_event: HashMap<i64, Vec<CaptureFile>> = HashMap::new();
            // BTreeMap order: a later capture id with a duplicate filename wins.
            for (_, (event_id, cf)) in self.captures {
                per_event.entry(event_id).or_default().push(cf);
            }
            for event in events.iter_mut() {
                let files = event
                    .id()
                    .and_then(|id| per_event.remove(&id))
                    .unwrap_or_default();
                event.set_capture_files(files);
            }
        }

        if self.labels_loaded {
            let mut labels = self.labels;
            for event in events.iter_mut() {
                let list = event.id().and_then(|id| labels.remove(&id)).unwrap_or_default();
                event.set_labels(list);
            }
        }

        for (event_id, mapping) in self.mappings {
            if let Some(&i) = index.get(&event_id) {
                events[i].apply_series_mapping(&mapping);
            }
        }

        events
    }

    fn known_event(&self, event_id: i64, what: &str) -> Result<i64> {
        if self.index.contains_key(&event_id) {
            Ok(event_id)
        } else {
            Err(Error::DataIntegrity(format!(
                "{} refers to unknown event {}",
                what, event_id
            )))
        }
    }

    fn known_capture(&mut self, capture_id: i64, what: &str) -> Result<&mut CaptureFile> {
        self.captures
            .get_mut(&capture_id)
            .map(|(_, cf)| cf)
            .ok_or_else(|| {
                Error::DataIntegrity(format!("{} refers to unknown capture {}", what, capture_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::SeriesRow;
    use chrono::{TimeZone, Utc};
    use wfb_core::MetadataValue;

    fn event_row(id: i64) -> EventRow {
        EventRow {
            event_id: Some(id),
            event_time_utc: Some(Utc.with_ymd_and_hms(2019, 3, 1, 12, 0, 0).unwrap()),
            location: Some("1L05".into()),
            system_name: Some("rf".into()),
            archive: Some(false),
            to_be_deleted: Some(false),
            grouped: Some(true),
            classification: None,
        }
    }

    fn capture_row(capture_id: i64, event_id: i64, filename: &str) -> CaptureRow {
        CaptureRow {
            capture_id: Some(capture_id),
            event_id: Some(event_id),
            filename: Some(filename.into()),
            sample_start: Some(-100.0),
            sample_end: Some(100.0),
            sample_step: Some(0.2),
        }
    }

    fn waveform_row(cwf_id: i64, capture_id: i64, name: &str) -> WaveformRow {
        WaveformRow {
            cwf_id: Some(cwf_id),
            capture_id: Some(capture_id),
            waveform_name: Some(name.into()),
        }
    }

    fn mapping_row(event_id: i64, waveform: &str, series_id: i32, name: &str) -> SeriesMappingRow {
        SeriesMappingRow {
            event_id: Some(event_id),
            waveform_name: Some(waveform.into()),
            series: SeriesRow {
                series_id: Some(series_id),
                series_name: Some(name.into()),
                pattern: Some(format!("%{}", name)),
                system_name: Some("rf".into()),
                description: None,
                units: None,
            },
        }
    }

    #[test]
    fn test_event_rows_keep_order_and_ignore_duplicates() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(7)).unwrap();
        a.add_event_row(event_row(3)).unwrap();
        a.add_event_row(event_row(7)).unwrap();
        assert_eq!(a.event_ids(), vec![7, 3]);

        let events = a.into_events();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_grouped());
        assert!(events[0].capture_files().is_none());
        assert!(events[0].labels().is_none());
    }

    #[test]
    fn test_null_required_column_is_integrity_error() {
        let mut a = EventAssembler::new();
        let mut row = event_row(1);
        row.location = None;
        assert!(matches!(a.add_event_row(row), Err(Error::DataIntegrity(_))));

        let mut row = event_row(2);
        row.archive = None;
        assert!(matches!(a.add_event_row(row), Err(Error::DataIntegrity(_))));
        assert!(a.is_empty());
    }

    #[test]
    fn test_null_flag_columns_are_integrity_errors() {
        let mut a = EventAssembler::new();
        let mut row = event_row(1);
        row.to_be_deleted = None;
        assert!(matches!(a.add_event_row(row), Err(Error::DataIntegrity(_))));

        let mut row = event_row(2);
        row.grouped = None;
        assert!(matches!(a.add_event_row(row), Err(Error::DataIntegrity(_))));

        let mut row = event_row(3);
        row.to_be_deleted = None;
        row.grouped = None;
        assert!(matches!(a.add_event_row(row), Err(Error::DataIntegrity(_))));
        assert!(a.is_empty());

        // A NULL classification is allowed
        a.add_event_row(event_row(4)).unwrap();
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_children_attached_by_key_not_position() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(1)).unwrap();
        a.add_event_row(event_row(2)).unwrap();

        // Interleaved capture rows
        a.add_capture_row(capture_row(20, 2, "b.txt")).unwrap();
        a.add_capture_row(capture_row(10, 1, "a.txt")).unwrap();
        a.add_capture_row(capture_row(21, 2, "a.txt")).unwrap();

        a.add_waveform_row(waveform_row(100, 21, "W2")).unwrap();
        a.add_waveform_row(waveform_row(101, 10, "W1")).unwrap();
        a.add_waveform_row(waveform_row(102, 20, "W3")).unwrap();

        let events = a.into_events();
        let e1 = &events[0];
        let e2 = &events[1];
        assert_eq!(e1.capture_files().unwrap().len(), 1);
        assert!(e1.capture_file("a.txt").unwrap().has_waveform("W1"));
        assert!(e2.capture_file("a.txt").unwrap().has_waveform("W2"));
        assert!(e2.capture_file("b.txt").unwrap().has_waveform("W3"));
    }

    #[test]
    fn test_orphan_rows_are_rejected() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(1)).unwrap();
        assert!(matches!(
            a.add_capture_row(capture_row(10, 99, "a.txt")),
            Err(Error::DataIntegrity(_))
        ));
        assert!(matches!(
            a.add_waveform_row(waveform_row(1, 10, "W")),
            Err(Error::DataIntegrity(_))
        ));
        // Prior state survives
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_duplicate_filename_later_capture_wins() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(1)).unwrap();
        a.add_capture_row(capture_row(11, 1, "a.txt")).unwrap();
        a.add_capture_row(capture_row(10, 1, "a.txt")).unwrap();
        let events = a.into_events();
        assert_eq!(events[0].capture_file("a.txt").unwrap().id, Some(11));
    }

    #[test]
    fn test_expected_but_missing_children_are_empty() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(1)).unwrap();
        a.expect_capture_files();
        a.expect_labels();
        let events = a.into_events();
        assert_eq!(events[0].capture_files().map(|m| m.len()), Some(0));
        assert_eq!(events[0].labels().map(|l| l.len()), Some(0));
    }

    #[test]
    fn test_metadata_by_type_tag() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(1)).unwrap();
        a.add_capture_row(capture_row(10, 1, "a.txt")).unwrap();
        a.add_metadata_row(MetadataRow {
            meta_id: Some(1),
            capture_id: Some(10),
            meta_name: Some("PV1".into()),
            meta_type: Some("NUMBER".into()),
            value: Some("5.6".into()),
            start: Some(-45.9),
            offset: Some(-0.5),
        })
        .unwrap();

        let bad = MetadataRow {
            meta_id: Some(2),
            capture_id: Some(10),
            meta_name: Some("PV2".into()),
            meta_type: Some("BLOB".into()),
            ..MetadataRow::default()
        };
        assert!(matches!(a.add_metadata_row(bad), Err(Error::DataIntegrity(_))));

        let events = a.into_events();
        let meta = &events[0].capture_file("a.txt").unwrap().metadata;
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].id, Some(1));
        assert_eq!(
            meta[0].value,
            MetadataValue::Number {
                value: 5.6,
                offset: -0.5,
                start: -45.9
            }
        );
    }

    #[test]
    fn test_labels_grouped_by_event() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(1)).unwrap();
        a.add_event_row(event_row(2)).unwrap();
        a.add_label_row(LabelRow {
            label_id: Some(5),
            event_id: Some(2),
            model_name: Some("m".into()),
            label_name: Some("cavity".into()),
            label_value: Some("4".into()),
            label_confidence: Some(0.8),
        })
        .unwrap();
        let events = a.into_events();
        assert_eq!(events[0].labels().unwrap().len(), 0);
        assert_eq!(events[1].labels().unwrap()[0].name, "cavity");
    }

    #[test]
    fn test_series_mapping_attaches_all_candidates_and_shares_descriptors() {
        let mut a = EventAssembler::new();
        a.add_event_row(event_row(1)).unwrap();
        a.add_event_row(event_row(2)).unwrap();
        a.add_capture_row(capture_row(10, 1, "a.txt")).unwrap();
        a.add_capture_row(capture_row(20, 2, "a.txt")).unwrap();
        a.add_waveform_row(waveform_row(1, 10, "R1M1GMES")).unwrap();
        a.add_waveform_row(waveform_row(2, 20, "R1M1GMES")).unwrap();

        a.add_series_mapping_row(mapping_row(1, "R1M1GMES", 1, "GMES")).unwrap();
        a.add_series_mapping_row(mapping_row(1, "R1M1GMES", 2, "M1GMES")).unwrap();
        a.add_series_mapping_row(mapping_row(2, "R1M1GMES", 1, "GMES")).unwrap();

        let events = a.into_events();
        let w1 = events[0].capture_file("a.txt").unwrap().waveform("R1M1GMES").unwrap();
        let w2 = events[1].capture_file("a.txt").unwrap().waveform("R1M1GMES").unwrap();
        assert_eq!(w1.series().len(), 2);
        assert_eq!(w2.series().len(), 1);
        assert!(Arc::ptr_eq(&w1.series()[0], &w2.series()[0]));
    }
}
