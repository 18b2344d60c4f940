//! Waveform alignment onto a shared time axis.
//!
//! Waveforms captured together usually share one sample grid, in which case
//! the aligned matrix is just the common offsets plus each value array. When
//! grids differ, the axis becomes the sorted union of every offset and each
//! cell takes the waveform's value at the nearest preceding sample (floor
//! lookup). Offsets outside a waveform's own range have no value.

use std::collections::BTreeSet;

use tracing::debug;

use crate::models::Waveform;

/// Index of the largest offset `<= target`.
///
/// `offsets` must be ascending. Returns `None` when `target` lies before the
/// first or after the last offset; the range is never extrapolated. Runs in
/// O(log n).
pub fn floor_index(offsets: &[f64], target: f64) -> Option<usize> {
    let last = offsets.len().checked_sub(1)?;

    if target < offsets[0] || target > offsets[last] {
        return None;
    }
    if target == offsets[0] {
        return Some(0);
    }
    if target == offsets[last] {
        return Some(last);
    }

    // Invariant: offsets[low] <= target < offsets[high]
    let mut low = 0;
    let mut high = last;
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if offsets[mid] <= target {
            low = mid;
        } else {
            high = mid;
        }
    }
    Some(low)
}

/// Whether every waveform carries exactly the same offsets as the first.
///
/// An empty set is consistent.
pub fn offsets_consistent<'a, I>(waveforms: I) -> bool
where
    I: IntoIterator<Item = &'a Waveform>,
{
    let mut iter = waveforms.into_iter();
    let Some(first) = iter.next() else {
        return true;
    };
    iter.all(|w| w.time_offsets() == first.time_offsets())
}

/// Keep the waveforms belonging to at least one requested series.
///
/// `None` keeps everything. Input order is preserved.
pub fn select_waveforms<'a, I>(waveforms: I, series: Option<&BTreeSet<String>>) -> Vec<&'a Waveform>
where
    I: IntoIterator<Item = &'a Waveform>,
{
    waveforms
        .into_iter()
        .filter(|w| series.map_or(true, |names| w.in_any_series(names)))
        .collect()
}

/// One aligned value column.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedColumn<'a> {
    pub waveform: &'a Waveform,
    pub values: Vec<Option<f64>>,
}

/// A rectangular table: one shared time axis and one column per waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMatrix<'a> {
    pub time_offsets: Vec<f64>,
    pub columns: Vec<AlignedColumn<'a>>,
}

impl AlignedMatrix<'_> {
    /// Number of rows on the time axis.
    pub fn len(&self) -> usize {
        self.time_offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_offsets.is_empty()
    }

    /// Row-major numeric grid: column 0 is the time offset, missing cells are NaN.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.time_offsets
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                let mut row = Vec::with_capacity(self.columns.len() + 1);
                row.push(t);
                row.extend(self.columns.iter().map(|c| c.values[i].unwrap_or(f64::NAN)));
                row
            })
            .collect()
    }
}

/// Aligns an ordered set of waveforms.
///
/// Consistency is fixed when the aligner is built, either measured from the
/// waveforms or taken from the owning aggregate.
#[derive(Debug, Clone)]
pub struct WaveformAligner<'a> {
    waveforms: Vec<&'a Waveform>,
    consistent: bool,
}

impl<'a> WaveformAligner<'a> {
    /// Build an aligner, measuring consistency from the waveforms.
    pub fn new(waveforms: Vec<&'a Waveform>) -> Self {
        let consistent = offsets_consistent(waveforms.iter().copied());
        Self {
            waveforms,
            consistent,
        }
    }

    /// Build an aligner from a consistency flag the caller already holds.
    ///
    /// The flag must describe a superset of `waveforms`; a subset of a
    /// consistent set is itself consistent.
    pub fn with_consistency(waveforms: Vec<&'a Waveform>, consistent: bool) -> Self {
        Self {
            waveforms,
            consistent,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    pub fn waveforms(&self) -> &[&'a Waveform] {
        &self.waveforms
    }

    /// Produce the aligned matrix.
    pub fn align(&self) -> AlignedMatrix<'a> {
        let Some(first) = self.waveforms.first() else {
            return AlignedMatrix {
                time_offsets: Vec::new(),
                columns: Vec::new(),
            };
        };

        let matrix = if self.consistent {
            AlignedMatrix {
                time_offsets: first.time_offsets().to_vec(),
                columns: self
                    .waveforms
                    .iter()
                    .map(|w| AlignedColumn {
                        waveform: w,
                        values: w.values().iter().copied().map(Some).collect(),
                    })
                    .collect(),
            }
        } else {
            let axis = union_axis(&self.waveforms);
            let columns = self
                .waveforms
                .iter()
                .map(|w| AlignedColumn {
                    waveform: w,
                    values: axis.iter().map(|&t| w.value_at_offset(t)).collect(),
                })
                .collect();
            AlignedMatrix {
                time_offsets: axis,
                columns,
            }
        };

        debug!(
            subsystem = "core",
            component = "aligner",
            op = "align",
            consistent = self.consistent,
            waveform_count = self.waveforms.len(),
            axis_len = matrix.time_offsets.len(),
            "Aligned waveforms"
        );
        matrix
    }
}

/// Sorted union of every offset, with duplicates collapsed.
fn union_axis(waveforms: &[&Waveform]) -> Vec<f64> {
    let mut axis: Vec<f64> = waveforms
        .iter()
        .flat_map(|w| w.time_offsets().iter().copied())
        .filter(|t| !t.is_nan())
        .collect();
    axis.sort_by(|a, b| a.total_cmp(b));
    axis.dedup_by(|a, b| a == b);
    axis
}
