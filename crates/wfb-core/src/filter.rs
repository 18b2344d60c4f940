//! Filter criteria for events, labels and series.
//!
//! These types only describe *what* to match. Rendering them into SQL lives
//! in the storage crate; the label predicate can also be evaluated directly
//! against events already in memory.
//!
//! # Example
//!
//! ```
//! use wfb_core::{EventFilter, LabelPredicate};
//!
//! let filter = EventFilter::new()
//!     .with_system("rf")
//!     .with_locations(vec!["1L05".to_string(), "1L06".to_string()])
//!     .with_delete(false)
//!     .with_label_predicate(
//!         LabelPredicate::builder()
//!             .names(vec!["cavity".to_string()])
//!             .confidence(0.5, ">")
//!             .build()
//!             .unwrap(),
//!     );
//!
//! assert!(!filter.is_empty());
//! ```

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{Event, Label};

// =============================================================================
// COMPARISON OPERATOR
// =============================================================================

/// Comparison applied to a label's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    /// `<>`
    Ne,
    /// `!=`, kept distinct so the rendered SQL matches what the caller asked for.
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// Evaluate `lhs <op> rhs`.
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne | Self::NotEq => lhs != rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

impl std::str::FromStr for ComparisonOperator {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" => Ok(Self::Eq),
            "<>" => Ok(Self::Ne),
            "!=" => Ok(Self::NotEq),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            _ => Err(Error::InvalidInput(format!(
                "Invalid confidence operator '{}'. Valid options are =, <>, !=, >, >=, <, <=",
                s
            ))),
        }
    }
}

// =============================================================================
// LABEL PREDICATE
// =============================================================================

/// Label-based sub-filter.
///
/// Every supplied constraint must hold for a label to match (AND); sibling
/// predicates on an [`EventFilter`] are ORed. An empty list constrains
/// nothing, same as an absent one. A predicate with no constraints at all
/// matches any event that has at least one label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelPredicate {
    model_names: Option<Vec<String>>,
    ids: Option<Vec<i64>>,
    names: Option<Vec<String>>,
    values: Option<Vec<String>>,
    confidence: Option<(f64, ComparisonOperator)>,
}

impl LabelPredicate {
    /// Validate and build a predicate from raw parts.
    ///
    /// `confidence` and `operator` must be given together or not at all.
    pub fn new(
        model_names: Option<Vec<String>>,
        ids: Option<Vec<i64>>,
        names: Option<Vec<String>>,
        values: Option<Vec<String>>,
        confidence: Option<f64>,
        operator: Option<&str>,
    ) -> Result<Self> {
        let confidence = match (confidence, operator) {
            (None, None) => None,
            (Some(c), Some(op)) => Some((c, op.parse()?)),
            _ => {
                return Err(Error::InvalidInput(
                    "confidence and confidence operator must both be set or both be absent".to_string(),
                ))
            }
        };
        Ok(Self {
            model_names,
            ids,
            names,
            values,
            confidence,
        })
    }

    /// Predicate matching any event with at least one label.
    pub fn any_label() -> Self {
        Self::default()
    }

    pub fn builder() -> LabelPredicateBuilder {
        LabelPredicateBuilder::default()
    }

    pub fn model_names(&self) -> &[String] {
        self.model_names.as_deref().unwrap_or_default()
    }

    pub fn ids(&self) -> &[i64] {
        self.ids.as_deref().unwrap_or_default()
    }

    pub fn names(&self) -> &[String] {
        self.names.as_deref().unwrap_or_default()
    }

    pub fn values(&self) -> &[String] {
        self.values.as_deref().unwrap_or_default()
    }

    pub fn confidence(&self) -> Option<(f64, ComparisonOperator)> {
        self.confidence
    }

    /// Whether this predicate only asks for a label to exist.
    pub fn is_existence_only(&self) -> bool {
        self.ids().is_empty()
            && self.model_names().is_empty()
            && self.names().is_empty()
            && self.values().is_empty()
            && self.confidence.is_none()
    }

    /// Whether one label satisfies every constraint.
    pub fn matches_label(&self, label: &Label) -> bool {
        let in_list = |list: &[String], v: &str| list.is_empty() || list.iter().any(|x| x == v);

        (self.ids().is_empty() || label.id.is_some_and(|id| self.ids().contains(&id)))
            && in_list(self.model_names(), &label.model_name)
            && in_list(self.names(), &label.name)
            && in_list(self.values(), &label.value)
            && self
                .confidence
                .map_or(true, |(threshold, op)| op.compare(label.confidence, threshold))
    }

    /// Whether any of the event's labels satisfies this predicate.
    ///
    /// Events whose labels were not loaded never match.
    pub fn matches_event(&self, event: &Event) -> bool {
        event
            .labels()
            .is_some_and(|labels| labels.iter().any(|l| self.matches_label(l)))
    }
}

/// Builder for [`LabelPredicate`].
#[derive(Debug, Clone, Default)]
pub struct LabelPredicateBuilder {
    model_names: Option<Vec<String>>,
    ids: Option<Vec<i64>>,
    names: Option<Vec<String>>,
    values: Option<Vec<String>>,
    confidence: Option<f64>,
    operator: Option<String>,
}

impl LabelPredicateBuilder {
    pub fn model_names(mut self, model_names: Vec<String>) -> Self {
        self.model_names = Some(model_names);
        self
    }

    pub fn ids(mut self, ids: Vec<i64>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn names(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn values(mut self, values: Vec<String>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn confidence(mut self, confidence: f64, operator: impl Into<String>) -> Self {
        self.confidence = Some(confidence);
        self.operator = Some(operator.into());
        self
    }

    pub fn build(self) -> Result<LabelPredicate> {
        LabelPredicate::new(
            self.model_names,
            self.ids,
            self.names,
            self.values,
            self.confidence,
            self.operator.as_deref(),
        )
    }
}

/// Keep the events matching at least one predicate.
///
/// An empty predicate list keeps everything. Matching is per event: an event
/// stays whole when any one of its labels matches.
pub fn filter_events_by_labels(events: Vec<Event>, predicates: &[LabelPredicate]) -> Vec<Event> {
    if predicates.is_empty() {
        return events;
    }
    events
        .into_iter()
        .filter(|e| predicates.iter().any(|p| p.matches_event(e)))
        .collect()
}

// =============================================================================
// EVENT FILTER
// =============================================================================

/// Optional criteria for selecting events. All set criteria are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub event_ids: Option<Vec<i64>>,
    /// Inclusive.
    pub begin: Option<DateTime<Utc>>,
    /// Inclusive.
    pub end: Option<DateTime<Utc>>,
    pub system: Option<String>,
    pub locations: Option<Vec<String>>,
    pub classifications: Option<Vec<String>>,
    pub archive: Option<bool>,
    pub delete: Option<bool>,
    pub min_capture_files: Option<i32>,
    pub label_predicates: Vec<LabelPredicate>,
}

impl EventFilter {
    /// An empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_ids(mut self, ids: Vec<i64>) -> Self {
        self.event_ids = Some(ids);
        self
    }

    pub fn with_begin(mut self, begin: DateTime<Utc>) -> Self {
        self.begin = Some(begin);
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_locations(mut self, locations: Vec<String>) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn with_classifications(mut self, classifications: Vec<String>) -> Self {
        self.classifications = Some(classifications);
        self
    }

    pub fn with_archive(mut self, archive: bool) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete = Some(delete);
        self
    }

    pub fn with_min_capture_files(mut self, min: i32) -> Self {
        self.min_capture_files = Some(min);
        self
    }

    pub fn with_label_predicate(mut self, predicate: LabelPredicate) -> Self {
        self.label_predicates.push(predicate);
        self
    }

    /// True when no criterion is set.
    pub fn is_empty(&self) -> bool {
        non_empty(&self.event_ids).is_none()
            && self.begin.is_none()
            && self.end.is_none()
            && self.system.is_none()
            && non_empty(&self.locations).is_none()
            && non_empty(&self.classifications).is_none()
            && self.archive.is_none()
            && self.delete.is_none()
            && self.min_capture_files.is_none()
            && self.label_predicates.is_empty()
    }

    /// Reject criteria that can never match.
    pub fn validate(&self) -> Result<()> {
        if let (Some(begin), Some(end)) = (self.begin, self.end) {
            if begin > end {
                return Err(Error::InvalidInput(format!(
                    "begin {} is after end {}",
                    crate::time::format_utc(&begin),
                    crate::time::format_utc(&end)
                )));
            }
        }
        if let Some(min) = self.min_capture_files {
            if min < 0 {
                return Err(Error::InvalidInput(format!(
                    "minimum capture file count must not be negative, got {}",
                    min
                )));
            }
        }
        Ok(())
    }

    /// Evaluate the criteria against an event already in memory.
    ///
    /// The capture-file minimum counts loaded capture files; an event loaded
    /// without them fails that criterion. Label predicates follow
    /// [`LabelPredicate::matches_event`].
    pub fn matches(&self, event: &Event) -> bool {
        let id_ok = non_empty(&self.event_ids)
            .map_or(true, |ids| event.id().is_some_and(|id| ids.contains(&id)));
        let begin_ok = self.begin.map_or(true, |b| event.event_time() >= b);
        let end_ok = self.end.map_or(true, |e| event.event_time() <= e);
        let system_ok = self.system.as_deref().map_or(true, |s| event.system() == s);
        let location_ok = non_empty(&self.locations)
            .map_or(true, |ls| ls.iter().any(|l| l == event.location()));
        let class_ok = non_empty(&self.classifications).map_or(true, |cs| {
            event
                .classification()
                .is_some_and(|c| cs.iter().any(|x| x == c))
        });
        let archive_ok = self.archive.map_or(true, |a| event.is_archive() == a);
        let delete_ok = self.delete.map_or(true, |d| event.is_delete() == d);
        let cf_ok = self.min_capture_files.map_or(true, |min| {
            event
                .capture_files()
                .is_some_and(|files| files.len() as i64 >= i64::from(min))
        });
        let label_ok = self.label_predicates.is_empty()
            || self.label_predicates.iter().any(|p| p.matches_event(event));

        id_ok
            && begin_ok
            && end_ok
            && system_ok
            && location_ok
            && class_ok
            && archive_ok
            && delete_ok
            && cf_ok
            && label_ok
    }
}

// =============================================================================
// SERIES FILTER
// =============================================================================

/// Optional criteria for selecting series definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesFilter {
    pub ids: Option<Vec<i32>>,
    pub system: Option<String>,
    pub names: Option<Vec<String>>,
}

impl SeriesFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(mut self, ids: Vec<i32>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }
}

// =============================================================================
// SERIES SET FILTER
// =============================================================================

/// Optional criteria for selecting series sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesSetFilter {
    pub ids: Option<Vec<i32>>,
    pub system: Option<String>,
    pub names: Option<Vec<String>>,
}

impl SeriesSetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(mut self, ids: Vec<i32>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }
}

/// `Some` only for a present, non-empty list.
pub fn non_empty<T>(list: &Option<Vec<T>>) -> Option<&[T]> {
    list.as_deref().filter(|l| !l.is_empty())
}
