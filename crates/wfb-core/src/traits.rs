//! Core traits for the waveform event browser.
//!
//! Storage and raw-data access sit behind these traits so the aggregate,
//! alignment and export code never depends on a concrete backend.

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::{EventFilter, SeriesFilter, SeriesSetFilter};
use crate::models::{CaptureFile, Event};
use crate::series::{NewSeries, NewSeriesSet, Series, SeriesSet};

// =============================================================================
// EVENT REPOSITORY
// =============================================================================

/// What to load alongside each event's scalar fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventQueryOptions {
    /// Load capture files, waveform names and metadata.
    pub include_capture_files: bool,
    /// Also load sample data for every waveform. Implies capture files.
    pub include_data: bool,
    /// Load classification labels.
    pub include_labels: bool,
}

impl EventQueryOptions {
    /// Scalar fields only.
    pub fn summary() -> Self {
        Self::default()
    }

    /// Capture files, labels and sample data.
    pub fn full() -> Self {
        Self {
            include_capture_files: true,
            include_data: true,
            include_labels: true,
        }
    }

    pub fn loads_capture_files(&self) -> bool {
        self.include_capture_files || self.include_data
    }
}

/// Repository for event records.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Store a new event with its capture files, waveforms, metadata and
    /// labels in one transaction. Returns the assigned id.
    async fn insert(&self, event: &Event) -> Result<i64>;

    /// Store several events, each in its own transaction, stopping at the first failure.
    async fn insert_many(&self, events: &[Event]) -> Result<Vec<i64>>;

    /// List events matching `filter`, oldest first.
    async fn list(&self, filter: &EventFilter, options: EventQueryOptions) -> Result<Vec<Event>>;

    /// Fetch a single event.
    async fn get(&self, id: i64, options: EventQueryOptions) -> Result<Event>;

    /// Id of the latest event matching `filter`.
    async fn most_recent_id(&self, filter: &EventFilter) -> Result<Option<i64>>;

    /// Distinct location names in use, sorted.
    async fn location_names(&self) -> Result<Vec<String>>;

    /// Names of the series matched by any waveform of the given events, sorted.
    async fn series_names(&self, event_ids: &[i64]) -> Result<Vec<String>>;

    /// Set or clear the delete-pending flag. Setting it clears archive.
    /// Returns the number of events updated.
    async fn set_delete_flag(&self, event_ids: &[i64], delete: bool) -> Result<u64>;

    /// Set or clear the archive flag. Setting it clears delete-pending.
    async fn set_archive_flag(&self, event_id: i64, archive: bool) -> Result<u64>;

    /// Remove an event. Without `force`, only delete-pending events are removed.
    async fn delete(&self, event_id: i64, force: bool) -> Result<u64>;
}

// =============================================================================
// SERIES REPOSITORY
// =============================================================================

/// Repository for named series definitions.
#[async_trait]
pub trait SeriesRepository: Send + Sync {
    async fn list(&self, filter: &SeriesFilter) -> Result<Vec<Series>>;

    /// Create a series. Returns its id.
    async fn insert(&self, series: &NewSeries) -> Result<i32>;

    /// Replace a series definition. Exactly one row must change.
    async fn update(&self, id: i32, series: &NewSeries) -> Result<()>;

    /// Remove a series. Exactly one row must go.
    async fn delete(&self, id: i32) -> Result<()>;

    /// Series sets with their member series resolved.
    async fn list_sets(&self, filter: &SeriesSetFilter) -> Result<Vec<SeriesSet>>;

    /// Create a series set. Every member must belong to the set's system.
    async fn insert_set(&self, set: &NewSeriesSet) -> Result<i32>;

    /// Remove a series set and its memberships.
    async fn delete_set(&self, id: i32) -> Result<()>;
}

// =============================================================================
// WAVEFORM SOURCE
// =============================================================================

/// Read-only access to the raw capture files behind an event.
#[async_trait]
pub trait WaveformSource: Send + Sync {
    /// Whether raw data exists for the event.
    async fn has_data(&self, event: &Event) -> Result<bool>;

    /// Parse the event's capture files.
    ///
    /// With `include_data = false` only waveform names are read, for callers
    /// that just need to know which waveforms exist.
    async fn read_capture_files(&self, event: &Event, include_data: bool) -> Result<Vec<CaptureFile>>;
}
