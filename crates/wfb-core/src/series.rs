//! Named series lookup rules.
//!
//! A series maps waveform names to a human readable label through a SQL
//! `LIKE` pattern (`%` matches any run of characters, `_` a single one, `\`
//! escapes either). Storage resolves the mapping with a `LIKE` join; the
//! in-memory matcher here applies the same rule to waveforms that never went
//! through storage. Matching ignores case, like `LIKE` under MySQL's default
//! collation.

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lookup information for a single named waveform data series.
///
/// Identity is the numeric id; two descriptors with the same id are the same
/// series even if a stale copy carries an older name or pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    #[serde(rename = "seriesId")]
    pub id: i32,
    pub name: String,
    pub pattern: String,
    pub system: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Series {}

impl Hash for Series {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Series {
    /// Whether `waveform_name` satisfies this series' `LIKE` pattern.
    ///
    /// An unparseable pattern matches nothing.
    pub fn matches(&self, waveform_name: &str) -> bool {
        match like_to_regex(&self.pattern) {
            Ok(re) => re.is_match(waveform_name),
            Err(_) => false,
        }
    }
}

/// Request for creating or replacing a series definition.
#[derive(Debug, Clone, Default)]
pub struct NewSeries {
    pub name: String,
    pub pattern: String,
    pub system: String,
    pub description: Option<String>,
    pub units: Option<String>,
}

// =============================================================================
// SERIES SET
// =============================================================================

/// A named group of series for one system, selected together when charting
/// or exporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSet {
    #[serde(rename = "setId")]
    pub id: i32,
    pub name: String,
    pub system: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Members ordered by name.
    pub series: Vec<Arc<Series>>,
}

impl SeriesSet {
    pub fn series_names(&self) -> BTreeSet<String> {
        self.series.iter().map(|s| s.name.clone()).collect()
    }
}

/// Request for creating a series set from existing series ids.
#[derive(Debug, Clone, Default)]
pub struct NewSeriesSet {
    pub name: String,
    pub system: String,
    pub description: Option<String>,
    pub series_ids: Vec<i32>,
}

/// Merge explicitly named series with the members of the given sets.
///
/// Returns `None` when nothing was named, meaning every waveform is wanted.
/// A selection that names only empty sets yields an empty set, not `None`.
pub fn combine_series_selection(series: &[String], sets: &[SeriesSet]) -> Option<BTreeSet<String>> {
    if series.is_empty() && sets.is_empty() {
        return None;
    }
    let mut names: BTreeSet<String> = series.iter().cloned().collect();
    for set in sets {
        names.extend(set.series_names());
    }
    Some(names)
}

/// Translate a SQL `LIKE` pattern into an anchored, case-insensitive regular expression.
pub fn like_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("^(?is)");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => re.push_str(&regex::escape("\\")),
            },
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::InvalidInput(format!("Invalid series pattern '{}': {}", pattern, e)))
}

/// Resolve every waveform name against every series.
///
/// Returns waveform name → all matching series, in the order the series were
/// supplied. Names with no match are absent from the map.
pub fn map_waveforms_to_series<'a, I>(
    waveform_names: I,
    series: &[Arc<Series>],
) -> HashMap<String, Vec<Arc<Series>>>
where
    I: IntoIterator<Item = &'a str>,
{
    let compiled: Vec<(Regex, &Arc<Series>)> = series
        .iter()
        .filter_map(|s| like_to_regex(&s.pattern).ok().map(|re| (re, s)))
        .collect();

    let mut mapping: HashMap<String, Vec<Arc<Series>>> = HashMap::new();
    for name in waveform_names {
        for (re, s) in &compiled {
            if re.is_match(name) {
                mapping
                    .entry(name.to_string())
                    .or_default()
                    .push(Arc::clone(s));
            }
        }
    }
    mapping
}
