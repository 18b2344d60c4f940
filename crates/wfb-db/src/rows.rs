//! Flat row types read from the event, capture, waveform, metadata, label,
//! series and series set queries.
//!
//! Every column is decoded as optional so that a NULL arriving in a column
//! the schema declares NOT NULL becomes a data integrity error at assembly
//! time instead of a decode panic.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::Row;

use wfb_core::{Error, Result};

fn get<'r, T>(row: &'r MySqlRow, column: &str) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::MySql> + sqlx::Type<sqlx::MySql>,
{
    row.try_get::<Option<T>, _>(column).map_err(Error::Database)
}

fn get_time(row: &MySqlRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(get::<NaiveDateTime>(row, column)?.map(|naive| naive.and_utc()))
}

/// Require a value the schema guarantees.
pub fn required<T>(value: Option<T>, what: &str, column: &str) -> Result<T> {
    value.ok_or_else(|| Error::DataIntegrity(format!("{} has null {}", what, column)))
}

/// One event row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRow {
    pub event_id: Option<i64>,
    pub event_time_utc: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub system_name: Option<String>,
    pub archive: Option<bool>,
    pub to_be_deleted: Option<bool>,
    pub grouped: Option<bool>,
    pub classification: Option<String>,
}

impl EventRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            event_id: get(row, "event_id")?,
            event_time_utc: get_time(row, "event_time_utc")?,
            location: get(row, "location")?,
            system_name: get(row, "system_name")?,
            archive: get(row, "archive")?,
            to_be_deleted: get(row, "to_be_deleted")?,
            grouped: get(row, "grouped")?,
            classification: get(row, "classification")?,
        })
    }
}

/// One label row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelRow {
    pub label_id: Option<i64>,
    pub event_id: Option<i64>,
    pub model_name: Option<String>,
    pub label_name: Option<String>,
    pub label_value: Option<String>,
    pub label_confidence: Option<f64>,
}

impl LabelRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            label_id: get(row, "label_id")?,
            event_id: get(row, "event_id")?,
            model_name: get(row, "model_name")?,
            label_name: get(row, "label_name")?,
            label_value: get(row, "label_value")?,
            label_confidence: get(row, "label_confidence")?,
        })
    }
}

/// One capture file row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureRow {
    pub capture_id: Option<i64>,
    pub event_id: Option<i64>,
    pub filename: Option<String>,
    pub sample_start: Option<f64>,
    pub sample_end: Option<f64>,
    pub sample_step: Option<f64>,
}

impl CaptureRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            capture_id: get(row, "capture_id")?,
            event_id: get(row, "event_id")?,
            filename: get(row, "filename")?,
            sample_start: get(row, "sample_start")?,
            sample_end: get(row, "sample_end")?,
            sample_step: get(row, "sample_step")?,
        })
    }
}

/// One waveform name row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveformRow {
    pub cwf_id: Option<i64>,
    pub capture_id: Option<i64>,
    pub waveform_name: Option<String>,
}

impl WaveformRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            cwf_id: get(row, "cwf_id")?,
            capture_id: get(row, "capture_id")?,
            waveform_name: get(row, "waveform_name")?,
        })
    }
}

/// One capture metadata row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRow {
    pub meta_id: Option<i64>,
    pub capture_id: Option<i64>,
    pub meta_name: Option<String>,
    pub meta_type: Option<String>,
    pub value: Option<String>,
    pub start: Option<f64>,
    pub offset: Option<f64>,
}

impl MetadataRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            meta_id: get(row, "meta_id")?,
            capture_id: get(row, "capture_id")?,
            meta_name: get(row, "meta_name")?,
            meta_type: get(row, "type")?,
            value: get(row, "value")?,
            start: get(row, "start")?,
            offset: get(row, "offset")?,
        })
    }
}

/// One waveform-name to series candidate row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesMappingRow {
    pub event_id: Option<i64>,
    pub waveform_name: Option<String>,
    pub series: SeriesRow,
}

impl SeriesMappingRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            event_id: get(row, "event_id")?,
            waveform_name: get(row, "waveform_name")?,
            series: SeriesRow::from_row(row)?,
        })
    }
}

/// One series definition row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesRow {
    pub series_id: Option<i32>,
    pub series_name: Option<String>,
    pub pattern: Option<String>,
    pub system_name: Option<String>,
    pub description: Option<String>,
    pub units: Option<String>,
}

impl SeriesRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            series_id: get(row, "series_id")?,
            series_name: get(row, "series_name")?,
            pattern: get(row, "pattern")?,
            system_name: get(row, "system_name")?,
            description: get(row, "description")?,
            units: get(row, "units")?,
        })
    }

    /// Convert into a series descriptor, checking required columns.
    pub fn into_series(self) -> Result<wfb_core::Series> {
        Ok(wfb_core::Series {
            id: required(self.series_id, "series", "series_id")?,
            name: required(self.series_name, "series", "series_name")?,
            pattern: required(self.pattern, "series", "pattern")?,
            system: required(self.system_name, "series", "system_name")?,
            description: self.description,
            units: self.units,
        })
    }
}

/// One series set row, without its members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSetRow {
    pub set_id: Option<i32>,
    pub set_name: Option<String>,
    pub system_name: Option<String>,
    pub description: Option<String>,
}

impl SeriesSetRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            set_id: get(row, "set_id")?,
            set_name: get(row, "set_name")?,
            system_name: get(row, "system_name")?,
            description: get(row, "description")?,
        })
    }

    /// Convert into an empty series set, checking required columns.
    pub fn into_series_set(self) -> Result<wfb_core::SeriesSet> {
        let id = required(self.set_id, "series set", "set_id")?;
        let what = format!("series set {}", id);
        Ok(wfb_core::SeriesSet {
            id,
            name: required(self.set_name, &what, "set_name")?,
            system: required(self.system_name, &what, "system_name")?,
            description: self.description,
            series: Vec::new(),
        })
    }
}

/// One series set membership row, carrying the member's definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSetMemberRow {
    pub set_id: Option<i32>,
    pub series: SeriesRow,
}

impl SeriesSetMemberRow {
    pub fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            set_id: get(row, "set_id")?,
            series: SeriesRow::from_row(row)?,
        })
    }
}
