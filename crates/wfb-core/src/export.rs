//! External representations of an event.
//!
//! Three renderings are supported:
//!
//! - [`EventDocument`]: the structured JSON document, nested by capture file.
//! - [`to_csv`]: the aligned matrix as a CSV grid.
//! - [`ChartDocument`]: one shared time axis plus a value column per
//!   waveform, shaped for the charting client.
//!
//! All three accept an optional set of series names. When given, only
//! waveforms attached to at least one of those series are emitted.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::defaults::{CSV_MISSING_VALUE, CSV_TIME_HEADER};
use crate::error::{Error, Result};
use crate::models::{format_number, CaptureFile, Event, Label, Metadata, MetadataType, Waveform};
use crate::series::Series;
use crate::time::{format_utc, parse_utc};

// =============================================================================
// STRUCTURED DOCUMENT
// =============================================================================

/// Structured JSON document for a persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDocument {
    pub id: i64,
    pub datetime_utc: String,
    pub location: String,
    pub system: String,
    pub archive: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub to_be_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    /// Absent when capture files were not requested.
    #[serde(rename = "captureFiles", default, skip_serializing_if = "Option::is_none")]
    pub capture_files: Option<Vec<CaptureFileDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Label>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFileDocument {
    pub filename: String,
    pub sample_start: f64,
    pub sample_end: f64,
    pub sample_step: f64,
    #[serde(default)]
    pub metadata: Vec<MetadataDocument>,
    #[serde(default)]
    pub waveforms: Vec<WaveformDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetadataType,
    pub value: Option<String>,
    pub offset: Option<f64>,
    pub start: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformDocument {
    #[serde(rename = "waveformName")]
    pub name: String,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(rename = "timeOffsets")]
    pub time_offsets: Vec<f64>,
    pub values: Vec<f64>,
}

impl EventDocument {
    /// Build the document for `event`.
    ///
    /// Fails for an event without an id: only stored events are handed out.
    pub fn from_event(event: &Event, series: Option<&BTreeSet<String>>) -> Result<Self> {
        let id = require_id(event)?;
        let capture_files = event.capture_files().map(|files| {
            files
                .values()
                .map(|cf| CaptureFileDocument::from_capture_file(cf, series))
                .collect()
        });

        Ok(Self {
            id,
            datetime_utc: format_utc(&event.event_time()),
            location: event.location().to_string(),
            system: event.system().to_string(),
            archive: event.is_archive(),
            to_be_deleted: event.is_delete(),
            classification: event.classification().map(str::to_string),
            capture_files,
            labels: event.labels().map(<[Label]>::to_vec),
        })
    }
}

impl CaptureFileDocument {
    fn from_capture_file(cf: &CaptureFile, series: Option<&BTreeSet<String>>) -> Self {
        Self {
            filename: cf.filename.clone(),
            sample_start: cf.sample_start,
            sample_end: cf.sample_end,
            sample_step: cf.sample_step,
            metadata: cf.metadata.iter().map(MetadataDocument::from).collect(),
            waveforms: cf
                .waveforms()
                .filter(|w| series.map_or(true, |names| w.in_any_series(names)))
                .map(WaveformDocument::from)
                .collect(),
        }
    }
}

impl From<&Metadata> for MetadataDocument {
    fn from(m: &Metadata) -> Self {
        Self {
            name: m.name.clone(),
            kind: m.value.metadata_type(),
            value: m.value.value_string(),
            offset: m.value.offset(),
            start: m.value.start(),
        }
    }
}

impl From<&Waveform> for WaveformDocument {
    fn from(w: &Waveform) -> Self {
        Self {
            name: w.name().to_string(),
            series: series_docs(w),
            time_offsets: w.time_offsets().to_vec(),
            values: w.values().to_vec(),
        }
    }
}

impl TryFrom<EventDocument> for Event {
    type Error = Error;

    fn try_from(doc: EventDocument) -> Result<Self> {
        let mut event = Event::new(parse_utc(&doc.datetime_utc)?, doc.location, doc.system).with_id(doc.id);
        if let Some(classification) = doc.classification {
            event = event.with_classification(classification);
        }
        event.set_archive(doc.archive);
        event.set_delete(doc.to_be_deleted);

        if let Some(files) = doc.capture_files {
            let mut capture_files = Vec::with_capacity(files.len());
            for f in files {
                let mut cf = CaptureFile::new(f.filename, f.sample_start, f.sample_end, f.sample_step);
                for m in f.metadata {
                    cf.add_metadata(Metadata::from_parts(
                        m.name,
                        m.kind.as_str(),
                        m.value.as_deref(),
                        m.offset,
                        m.start,
                    )?);
                }
                for w in f.waveforms {
                    let mut waveform = Waveform::new(w.name, w.time_offsets, w.values)?;
                    for s in w.series {
                        waveform.add_series(Arc::new(s));
                    }
                    cf.add_waveform(waveform);
                }
                capture_files.push(cf);
            }
            event = event.with_capture_files(capture_files);
        }

        if let Some(labels) = doc.labels {
            event = event.with_labels(labels);
        }
        Ok(event)
    }
}

/// Render the structured document as a JSON string.
pub fn to_json(event: &Event, series: Option<&BTreeSet<String>>) -> Result<String> {
    Ok(serde_json::to_string(&EventDocument::from_event(event, series)?)?)
}

/// Parse a JSON document back into an event.
pub fn from_json(json: &str) -> Result<Event> {
    let doc: EventDocument = serde_json::from_str(json)?;
    Event::try_from(doc)
}

// =============================================================================
// CSV
// =============================================================================

/// Render the aligned waveforms as CSV.
///
/// Header is `time_offset` followed by each waveform name; missing values
/// are written as `NaN`. Every line, including the last, ends with `\n`.
/// Returns `None` when there are no waveforms to export.
pub fn to_csv(event: &Event, series: Option<&BTreeSet<String>>) -> Option<String> {
    let aligner = event.aligner(series);
    if aligner.waveforms().is_empty() {
        return None;
    }
    let matrix = aligner.align();

    let mut out = String::from(CSV_TIME_HEADER);
    for col in &matrix.columns {
        out.push(',');
        out.push_str(col.waveform.name());
    }
    out.push('\n');

    for (i, t) in matrix.time_offsets.iter().enumerate() {
        out.push_str(&format_number(*t));
        for col in &matrix.columns {
            out.push(',');
            match col.values[i] {
                Some(v) => out.push_str(&format_number(v)),
                None => out.push_str(CSV_MISSING_VALUE),
            }
        }
        out.push('\n');
    }

    debug!(
        subsystem = "core",
        component = "export",
        op = "to_csv",
        event_id = ?event.id(),
        row_count = matrix.time_offsets.len(),
        waveform_count = matrix.columns.len(),
        "Rendered CSV"
    );
    Some(out)
}

// =============================================================================
// CHART DOCUMENT
// =============================================================================

/// Chart-ready document: one shared axis, one value column per waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDocument {
    pub id: i64,
    pub datetime_utc: String,
    pub location: String,
    pub system: String,
    pub archive: bool,
    #[serde(rename = "timeOffsets")]
    pub time_offsets: Vec<f64>,
    pub waveforms: Vec<ChartWaveformDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartWaveformDocument {
    #[serde(rename = "waveformName")]
    pub name: String,
    /// First four characters of the waveform name.
    #[serde(rename = "dygraphLabel")]
    pub label: String,
    /// Fourth character of the waveform name.
    #[serde(rename = "dygraphId")]
    pub chart_id: String,
    pub series: Vec<Series>,
    /// Missing samples serialize as `null`.
    #[serde(rename = "dataPoints")]
    pub data_points: Vec<Option<f64>>,
}

impl ChartDocument {
    pub fn from_event(event: &Event, series: Option<&BTreeSet<String>>) -> Result<Self> {
        let id = require_id(event)?;
        let matrix = event.aligner(series).align();

        let waveforms = matrix
            .columns
            .into_iter()
            .map(|col| {
                let name = col.waveform.name();
                ChartWaveformDocument {
                    name: name.to_string(),
                    label: name.chars().take(4).collect(),
                    chart_id: name.chars().skip(3).take(1).collect(),
                    series: series_docs(col.waveform),
                    data_points: col.values,
                }
            })
            .collect();

        Ok(Self {
            id,
            datetime_utc: format_utc(&event.event_time()),
            location: event.location().to_string(),
            system: event.system().to_string(),
            archive: event.is_archive(),
            time_offsets: matrix.time_offsets,
            waveforms,
        })
    }
}

/// Render the chart document as a JSON string.
pub fn to_chart_json(event: &Event, series: Option<&BTreeSet<String>>) -> Result<String> {
    Ok(serde_json::to_string(&ChartDocument::from_event(event, series)?)?)
}

fn require_id(event: &Event) -> Result<i64> {
    event.id().ok_or_else(|| {
        Error::Internal(format!(
            "Refusing to serialize event at {} without a stored id",
            format_utc(&event.event_time())
        ))
    })
}

fn series_docs(w: &Waveform) -> Vec<Series> {
    w.series().iter().map(|s| Series::clone(s)).collect()
}
