//! # wfb-core
//!
//! Core types, traits, and algorithms for the waveform event browser.
//!
//! This crate holds the event aggregate model, filter criteria, waveform
//! alignment and the external renderings (JSON, CSV, chart JSON). Storage
//! lives in `wfb-db` behind the traits defined here.

pub mod alignment;
pub mod defaults;
pub mod error;
pub mod export;
pub mod filter;
pub mod logging;
pub mod models;
pub mod series;
pub mod time;
pub mod traits;

// Re-export commonly used types at crate root
pub use alignment::{floor_index, AlignedColumn, AlignedMatrix, WaveformAligner};
pub use error::{Error, Result};
pub use export::{
    from_json, to_chart_json, to_csv, to_json, CaptureFileDocument, ChartDocument,
    ChartWaveformDocument, EventDocument, MetadataDocument, WaveformDocument,
};
pub use filter::{
    filter_events_by_labels, ComparisonOperator, EventFilter, LabelPredicate,
    LabelPredicateBuilder, SeriesFilter, SeriesSetFilter,
};
pub use models::*;
pub use series::{
    combine_series_selection, like_to_regex, map_waveforms_to_series, NewSeries, NewSeriesSet, Series,
    SeriesSet,
};
pub use traits::*;
