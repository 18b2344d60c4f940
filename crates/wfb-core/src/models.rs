//! Core data models for the waveform event browser.
//!
//! An [`Event`] owns its [`CaptureFile`]s (keyed by filename) and [`Label`]s;
//! a capture file owns its [`Waveform`]s (keyed by name) and [`Metadata`].
//! Waveforms only hold shared handles to [`Series`] descriptors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::alignment::{floor_index, offsets_consistent, select_waveforms, WaveformAligner};
use crate::error::{Error, Result};
use crate::series::Series;
use crate::time::truncate_to_micros;

// =============================================================================
// WAVEFORM
// =============================================================================

/// One named time series.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    id: Option<i64>,
    name: String,
    time_offsets: Vec<f64>,
    values: Vec<f64>,
    series: Vec<Arc<Series>>,
}

impl Waveform {
    /// Create a waveform from parallel offset/value arrays.
    ///
    /// Offsets must be ascending; they are not reordered.
    pub fn new(name: impl Into<String>, time_offsets: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        check_lengths(&name, &time_offsets, &values)?;
        Ok(Self {
            id: None,
            name,
            time_offsets,
            values,
            series: Vec::new(),
        })
    }

    /// A waveform known only by name, with no samples loaded.
    pub fn header_only(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            time_offsets: Vec::new(),
            values: Vec::new(),
            series: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_offsets(&self) -> &[f64] {
        &self.time_offsets
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn series(&self) -> &[Arc<Series>] {
        &self.series
    }

    /// Attach a series descriptor. A series with the same id is only kept once.
    pub fn add_series(&mut self, series: Arc<Series>) {
        if !self.series.iter().any(|s| s.id == series.id) {
            self.series.push(series);
        }
    }

    pub fn series_names(&self) -> BTreeSet<String> {
        self.series.iter().map(|s| s.name.clone()).collect()
    }

    /// Whether any attached series name appears in `names`.
    pub fn in_any_series(&self, names: &BTreeSet<String>) -> bool {
        self.series.iter().any(|s| names.contains(&s.name))
    }

    /// Replace the sample arrays, keeping name and series.
    pub fn update_data(&mut self, time_offsets: Vec<f64>, values: Vec<f64>) -> Result<()> {
        check_lengths(&self.name, &time_offsets, &values)?;
        self.time_offsets = time_offsets;
        self.values = values;
        Ok(())
    }

    /// Value at the nearest sample at or before `offset`, if inside this waveform's range.
    pub fn value_at_offset(&self, offset: f64) -> Option<f64> {
        floor_index(&self.time_offsets, offset).map(|i| self.values[i])
    }
}

fn check_lengths(name: &str, time_offsets: &[f64], values: &[f64]) -> Result<()> {
    if time_offsets.len() != values.len() {
        return Err(Error::InvalidInput(format!(
            "Waveform '{}' has {} time offsets but {} values",
            name,
            time_offsets.len(),
            values.len()
        )));
    }
    Ok(())
}

// =============================================================================
// METADATA
// =============================================================================

/// Type tag stored alongside a metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetadataType {
    Number,
    String,
    Unavailable,
    Unarchived,
}

impl MetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "NUMBER",
            Self::String => "STRING",
            Self::Unavailable => "UNAVAILABLE",
            Self::Unarchived => "UNARCHIVED",
        }
    }
}

impl std::fmt::Display for MetadataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MetadataType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NUMBER" => Ok(Self::Number),
            "STRING" => Ok(Self::String),
            "UNAVAILABLE" => Ok(Self::Unavailable),
            "UNARCHIVED" => Ok(Self::Unarchived),
            _ => Err(format!("Invalid metadata type: {}", s)),
        }
    }
}

/// Typed metadata value.
///
/// `offset` and `start` locate the value within the capture window. They
/// exist for archived values, are optional for unavailable ones, and are
/// meaningless for unarchived ones.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Number { value: f64, offset: f64, start: f64 },
    Text { value: String, offset: f64, start: f64 },
    Unavailable { offset: Option<f64>, start: Option<f64> },
    Unarchived,
}

impl MetadataValue {
    pub fn metadata_type(&self) -> MetadataType {
        match self {
            Self::Number { .. } => MetadataType::Number,
            Self::Text { .. } => MetadataType::String,
            Self::Unavailable { .. } => MetadataType::Unavailable,
            Self::Unarchived => MetadataType::Unarchived,
        }
    }

    /// Value rendered as text, `None` when there is no value.
    pub fn value_string(&self) -> Option<String> {
        match self {
            Self::Number { value, .. } => Some(format_number(*value)),
            Self::Text { value, .. } => Some(value.clone()),
            Self::Unavailable { .. } | Self::Unarchived => None,
        }
    }

    pub fn offset(&self) -> Option<f64> {
        match self {
            Self::Number { offset, .. } | Self::Text { offset, .. } => Some(*offset),
            Self::Unavailable { offset, .. } => *offset,
            Self::Unarchived => None,
        }
    }

    pub fn start(&self) -> Option<f64> {
        match self {
            Self::Number { start, .. } | Self::Text { start, .. } => Some(*start),
            Self::Unavailable { start, .. } => *start,
            Self::Unarchived => None,
        }
    }
}

/// A named, typed key/value attached to a capture file.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub id: Option<i64>,
    pub name: String,
    pub value: MetadataValue,
}

impl Metadata {
    pub fn new(name: impl Into<String>, value: MetadataValue) -> Self {
        Self {
            id: None,
            name: name.into(),
            value,
        }
    }

    /// Rebuild a metadata entry from its stored columns.
    ///
    /// The type tag decides which columns must be present. An unknown tag,
    /// a missing required column, or an unparseable number is a data
    /// integrity error.
    pub fn from_parts(
        name: impl Into<String>,
        type_tag: &str,
        value: Option<&str>,
        offset: Option<f64>,
        start: Option<f64>,
    ) -> Result<Self> {
        let name = name.into();
        let kind: MetadataType = type_tag
            .parse()
            .map_err(|e: String| Error::DataIntegrity(format!("Metadata '{}': {}", name, e)))?;

        let require = |field: &str, v: Option<f64>| {
            v.ok_or_else(|| {
                Error::DataIntegrity(format!("Metadata '{}' of type {} has null {}", name, kind, field))
            })
        };

        let value = match kind {
            MetadataType::Number => {
                let raw = value.ok_or_else(|| {
                    Error::DataIntegrity(format!("Metadata '{}' of type NUMBER has null value", name))
                })?;
                let parsed = raw.trim().parse::<f64>().map_err(|_| {
                    Error::DataIntegrity(format!("Metadata '{}' has non-numeric value '{}'", name, raw))
                })?;
                MetadataValue::Number {
                    value: parsed,
                    offset: require("offset", offset)?,
                    start: require("start", start)?,
                }
            }
            MetadataType::String => MetadataValue::Text {
                value: value
                    .ok_or_else(|| {
                        Error::DataIntegrity(format!("Metadata '{}' of type STRING has null value", name))
                    })?
                    .to_string(),
                offset: require("offset", offset)?,
                start: require("start", start)?,
            },
            MetadataType::Unavailable => MetadataValue::Unavailable { offset, start },
            MetadataType::Unarchived => MetadataValue::Unarchived,
        };

        Ok(Self {
            id: None,
            name,
            value,
        })
    }
}

/// Locale-invariant shortest round-trip decimal, always with a fraction (`0.0`, `1.15`).
///
/// Magnitudes outside `[1e-3, 1e7)` use scientific notation with an `E`
/// marker (`1.0E7`, `2.5E-4`). Non-finite values print as `NaN` or `Infinity`.
pub fn format_number(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = v.abs();
    if v == 0.0 || (1e-3..1e7).contains(&magnitude) {
        return format!("{:?}", v);
    }
    let sci = format!("{:e}", v);
    match sci.split_once('e') {
        Some((mantissa, exponent)) if mantissa.contains('.') => format!("{}E{}", mantissa, exponent),
        Some((mantissa, exponent)) => format!("{}.0E{}", mantissa, exponent),
        None => sci,
    }
}

// =============================================================================
// CAPTURE FILE
// =============================================================================

/// One sampled acquisition window within an event.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFile {
    pub id: Option<i64>,
    pub filename: String,
    /// Informational only; per-waveform offsets are authoritative.
    pub sample_start: f64,
    pub sample_end: f64,
    pub sample_step: f64,
    waveforms: BTreeMap<String, Waveform>,
    pub metadata: Vec<Metadata>,
}

impl CaptureFile {
    pub fn new(filename: impl Into<String>, sample_start: f64, sample_end: f64, sample_step: f64) -> Self {
        Self {
            id: None,
            filename: filename.into(),
            sample_start,
            sample_end,
            sample_step,
            waveforms: BTreeMap::new(),
            metadata: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add or replace a waveform by name.
    pub fn add_waveform(&mut self, waveform: Waveform) {
        self.waveforms.insert(waveform.name.clone(), waveform);
    }

    pub fn has_waveform(&self, name: &str) -> bool {
        self.waveforms.contains_key(name)
    }

    pub fn waveform(&self, name: &str) -> Option<&Waveform> {
        self.waveforms.get(name)
    }

    /// Waveforms in name order.
    pub fn waveforms(&self) -> impl Iterator<Item = &Waveform> {
        self.waveforms.values()
    }

    pub fn waveform_names(&self) -> impl Iterator<Item = &str> {
        self.waveforms.keys().map(String::as_str)
    }

    pub fn add_metadata(&mut self, metadata: Metadata) {
        self.metadata.push(metadata);
    }

    /// Replace a known waveform's samples.
    pub fn update_waveform_data(&mut self, name: &str, time_offsets: Vec<f64>, values: Vec<f64>) -> Result<()> {
        let waveform = self.waveforms.get_mut(name).ok_or_else(|| {
            Error::NotFound(format!("Waveform '{}' in capture file '{}'", name, self.filename))
        })?;
        waveform.update_data(time_offsets, values)
    }

    /// Attach every matching series to each waveform.
    pub fn apply_series_mapping(&mut self, mapping: &std::collections::HashMap<String, Vec<Arc<Series>>>) {
        for (name, waveform) in self.waveforms.iter_mut() {
            if let Some(candidates) = mapping.get(name) {
                for s in candidates {
                    waveform.add_series(Arc::clone(s));
                }
            }
        }
    }
}

// =============================================================================
// LABEL
// =============================================================================

/// A classification label assigned to an event by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub id: Option<i64>,
    pub model_name: String,
    pub name: String,
    pub value: String,
    pub confidence: f64,
}

// =============================================================================
// EVENT
// =============================================================================

/// One triggering occurrence and everything captured for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: Option<i64>,
    event_time: DateTime<Utc>,
    location: String,
    system: String,
    classification: Option<String>,
    archive: bool,
    delete: bool,
    grouped: bool,
    capture_files: Option<BTreeMap<String, CaptureFile>>,
    labels: Option<Vec<Label>>,
    waveforms_consistent: bool,
}

impl Event {
    /// A new, unsaved event. The timestamp is truncated to microseconds.
    pub fn new(event_time: DateTime<Utc>, location: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            id: None,
            event_time: truncate_to_micros(event_time),
            location: location.into(),
            system: system.into(),
            classification: None,
            archive: false,
            delete: false,
            grouped: false,
            capture_files: None,
            labels: None,
            waveforms_consistent: true,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.classification = Some(classification.into());
        self
    }

    pub fn with_grouped(mut self, grouped: bool) -> Self {
        self.grouped = grouped;
        self
    }

    /// Load both flags as stored.
    ///
    /// Rows written through [`Event::set_archive`] / [`Event::set_delete`]
    /// never carry both; a row that does is kept as-is so the caller sees it.
    pub fn with_flags(mut self, archive: bool, delete: bool) -> Self {
        self.archive = archive;
        self.delete = delete;
        self
    }

    /// Attach capture files, replacing any already present.
    pub fn with_capture_files(mut self, files: impl IntoIterator<Item = CaptureFile>) -> Self {
        self.set_capture_files(files);
        self
    }

    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.set_labels(labels);
        self
    }

    /// Replace the capture files in place.
    pub fn set_capture_files(&mut self, files: impl IntoIterator<Item = CaptureFile>) {
        self.capture_files = Some(files.into_iter().map(|cf| (cf.filename.clone(), cf)).collect());
        self.refresh_consistency();
    }

    pub fn set_labels(&mut self, labels: Vec<Label>) {
        self.labels = Some(labels);
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Record the id assigned by storage.
    pub fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn classification(&self) -> Option<&str> {
        self.classification.as_deref()
    }

    pub fn is_archive(&self) -> bool {
        self.archive
    }

    pub fn is_delete(&self) -> bool {
        self.delete
    }

    pub fn is_grouped(&self) -> bool {
        self.grouped
    }

    /// Set the archive flag. Archiving clears a pending delete.
    pub fn set_archive(&mut self, archive: bool) {
        self.archive = archive;
        if archive {
            self.delete = false;
        }
    }

    /// Set the delete-pending flag. Marking for deletion clears archive.
    pub fn set_delete(&mut self, delete: bool) {
        self.delete = delete;
        if delete {
            self.archive = false;
        }
    }

    /// Capture files by filename, `None` when they were not requested.
    pub fn capture_files(&self) -> Option<&BTreeMap<String, CaptureFile>> {
        self.capture_files.as_ref()
    }

    pub fn capture_file(&self, filename: &str) -> Option<&CaptureFile> {
        self.capture_files.as_ref()?.get(filename)
    }

    /// Add or replace a capture file by filename.
    pub fn add_capture_file(&mut self, capture_file: CaptureFile) {
        self.capture_files
            .get_or_insert_with(BTreeMap::new)
            .insert(capture_file.filename.clone(), capture_file);
        self.refresh_consistency();
    }

    /// Replace one waveform's samples in one capture file.
    pub fn update_waveform_data(
        &mut self,
        filename: &str,
        waveform: &str,
        time_offsets: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<()> {
        let cf = self
            .capture_files
            .as_mut()
            .and_then(|files| files.get_mut(filename))
            .ok_or_else(|| Error::NotFound(format!("Capture file '{}'", filename)))?;
        cf.update_waveform_data(waveform, time_offsets, values)?;
        self.refresh_consistency();
        Ok(())
    }

    /// Fill stored waveforms with samples read from raw data.
    ///
    /// Waveforms the event does not already know are skipped. Capture files
    /// it does not know are added whole. Consistency is recomputed once,
    /// after every file is merged. Returns the filenames that were added.
    pub fn merge_capture_data(&mut self, files: impl IntoIterator<Item = CaptureFile>) -> Result<Vec<String>> {
        let stored = self.capture_files.get_or_insert_with(BTreeMap::new);
        let mut added = Vec::new();
        let mut outcome = Ok(());
        for cf in files {
            let Some(existing) = stored.get_mut(&cf.filename) else {
                added.push(cf.filename.clone());
                stored.insert(cf.filename.clone(), cf);
                continue;
            };
            for (name, waveform) in cf.waveforms {
                if let Some(target) = existing.waveforms.get_mut(&name) {
                    if let Err(e) = target.update_data(waveform.time_offsets, waveform.values) {
                        outcome = Err(e);
                        break;
                    }
                }
            }
            if outcome.is_err() {
                break;
            }
        }
        self.refresh_consistency();
        outcome.map(|()| added)
    }

    pub fn labels(&self) -> Option<&[Label]> {
        self.labels.as_deref()
    }

    pub fn add_label(&mut self, label: Label) {
        self.labels.get_or_insert_with(Vec::new).push(label);
    }

    /// Attach every matching series to every waveform.
    pub fn apply_series_mapping(&mut self, mapping: &std::collections::HashMap<String, Vec<Arc<Series>>>) {
        if let Some(files) = self.capture_files.as_mut() {
            for cf in files.values_mut() {
                cf.apply_series_mapping(mapping);
            }
        }
    }

    /// All waveforms, ordered by capture filename then waveform name.
    pub fn waveforms(&self) -> impl Iterator<Item = &Waveform> {
        self.capture_files
            .iter()
            .flat_map(|files| files.values())
            .flat_map(|cf| cf.waveforms())
    }

    /// Distinct waveform names across all capture files.
    pub fn waveform_names(&self) -> BTreeSet<String> {
        self.waveforms().map(|w| w.name.clone()).collect()
    }

    /// Whether every waveform shares the first waveform's offsets.
    pub fn waveforms_consistent(&self) -> bool {
        self.waveforms_consistent
    }

    /// Aligner over the waveforms in the requested series, or all when `None`.
    pub fn aligner(&self, series: Option<&BTreeSet<String>>) -> WaveformAligner<'_> {
        WaveformAligner::with_consistency(select_waveforms(self.waveforms(), series), self.waveforms_consistent)
    }

    fn refresh_consistency(&mut self) {
        self.waveforms_consistent = offsets_consistent(self.waveforms());
    }

    /// Data directory path relative to the waveform root, in the local time zone.
    pub fn relative_path(&self) -> String {
        self.relative_path_in(&Local)
    }

    /// Archive path relative to the waveform root, in the local time zone.
    pub fn relative_archive_path(&self) -> String {
        format!("{}.tar.gz", self.relative_path())
    }

    /// `system/location/yyyy_MM_dd/HHmmss.S` rendered in `tz`.
    pub fn relative_path_in<Tz: TimeZone>(&self, tz: &Tz) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        let local = self.event_time.with_timezone(tz);
        let tenths = chrono::Timelike::nanosecond(&local) % 1_000_000_000 / 100_000_000;
        format!(
            "{}/{}/{}/{}.{}",
            self.system,
            self.location,
            local.format("%Y_%m_%d"),
            local.format("%H%M%S"),
            tenths
        )
    }
}
