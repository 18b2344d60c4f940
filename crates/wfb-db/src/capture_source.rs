//! Filesystem access to raw capture data.
//!
//! Each event's capture files live under the data root at
//! `system/location/yyyy_MM_dd/HHmmss.S`, either as a directory of
//! tab-separated text files or compressed as `HHmmss.S.tar.gz` holding a
//! single top-level directory with the same files. The directory wins when
//! both exist. Access is read-only.
//!
//! A capture file's header names the time column followed by one column per
//! waveform; every following line holds a time offset and one sample per
//! waveform.

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tar::Archive;
use tokio::fs;
use tracing::{debug, trace, warn};

use wfb_core::defaults::CAPTURE_FILE_EXTENSION;
use wfb_core::{CaptureFile, Error, Event, Result, Waveform, WaveformSource};

/// Where an event's raw data was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    Directory(PathBuf),
    Archive(PathBuf),
}

/// Reads capture files from a local data root.
#[derive(Debug, Clone)]
pub struct FilesystemWaveformSource {
    root: PathBuf,
}

impl FilesystemWaveformSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn event_dir(&self, event: &Event) -> PathBuf {
        self.root.join(event.relative_path())
    }

    pub fn event_archive(&self, event: &Event) -> PathBuf {
        self.root.join(event.relative_archive_path())
    }

    /// Locate the event's data, preferring the uncompressed directory.
    pub async fn locate(&self, event: &Event) -> Result<Option<DataLocation>> {
        let dir = self.event_dir(event);
        if fs::try_exists(&dir).await? {
            return Ok(Some(DataLocation::Directory(dir)));
        }
        let archive = self.event_archive(event);
        if fs::try_exists(&archive).await? {
            return Ok(Some(DataLocation::Archive(archive)));
        }
        Ok(None)
    }
}

#[async_trait]
impl WaveformSource for FilesystemWaveformSource {
    async fn has_data(&self, event: &Event) -> Result<bool> {
        Ok(self.locate(event).await?.is_some())
    }

    async fn read_capture_files(&self, event: &Event, include_data: bool) -> Result<Vec<CaptureFile>> {
        let start = Instant::now();
        let location = self.locate(event).await?.ok_or_else(|| {
            warn!(
                subsystem = "db",
                component = "capture_source",
                event_id = ?event.id(),
                dir = %self.event_dir(event).display(),
                "Raw data not found"
            );
            Error::NotFound(format!(
                "Waveform data for event at '{}' or '{}'",
                self.event_dir(event).display(),
                self.event_archive(event).display()
            ))
        })?;

        let files = match &location {
            DataLocation::Directory(dir) => read_directory(dir, include_data).await?,
            DataLocation::Archive(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || read_archive(&path, include_data))
                    .await
                    .map_err(|e| Error::Internal(format!("Archive reader failed: {}", e)))??
            }
        };

        debug!(
            subsystem = "db",
            component = "capture_source",
            op = "read",
            event_id = ?event.id(),
            include_data,
            result_count = files.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Read capture files"
        );
        Ok(files)
    }
}

fn is_capture_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == CAPTURE_FILE_EXTENSION)
        .unwrap_or(false)
}

async fn read_directory(dir: &Path, include_data: bool) -> Result<Vec<CaptureFile>> {
    let mut paths = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_capture_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let filename = file_name(&path)?;
        trace!(subsystem = "db", component = "capture_source", filename = %filename, "Parsing capture file");
        let content = fs::read_to_string(&path).await?;
        files.push(parse_capture_file(filename, &content, include_data)?);
    }
    Ok(files)
}

/// Read an event archive. Blocking.
fn read_archive(path: &Path, include_data: bool) -> Result<Vec<CaptureFile>> {
    let file = std::fs::File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut files = Vec::new();
    let mut parent_seen = false;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let depth = entry_path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count();

        if entry.header().entry_type().is_dir() {
            if parent_seen || depth > 1 {
                return Err(Error::DataIntegrity(format!(
                    "Unexpected directory '{}' in archive '{}'",
                    entry_path.display(),
                    path.display()
                )));
            }
            parent_seen = true;
            continue;
        }
        if depth > 2 {
            return Err(Error::DataIntegrity(format!(
                "Unexpected nested file '{}' in archive '{}'",
                entry_path.display(),
                path.display()
            )));
        }
        if !is_capture_file(&entry_path) {
            continue;
        }

        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        files.push(parse_capture_file(file_name(&entry_path)?, &content, include_data)?);
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Internal(format!("Path '{}' has no file name", path.display())))
}

/// Parse one tab-separated capture file.
///
/// The time column is always read so the sample start, end and step are
/// known; sample values are only parsed when `include_data` is set, otherwise
/// the waveforms carry names only. Blank lines are skipped.
pub fn parse_capture_file(filename: impl Into<String>, content: &str, include_data: bool) -> Result<CaptureFile> {
    let filename = filename.into();
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| Error::DataIntegrity(format!("Capture file '{}' is empty", filename)))?;
    let names: Vec<&str> = header.split('\t').skip(1).map(str::trim).collect();
    if names.is_empty() {
        return Err(Error::DataIntegrity(format!(
            "Capture file '{}' has no waveform columns",
            filename
        )));
    }

    let number = |raw: &str, line_no: usize| -> Result<f64> {
        raw.trim().parse::<f64>().map_err(|_| {
            Error::DataIntegrity(format!(
                "Capture file '{}' line {}: invalid number '{}'",
                filename,
                line_no + 1,
                raw
            ))
        })
    };

    let mut times = Vec::new();
    let mut columns: Vec<Vec<f64>> = if include_data {
        vec![Vec::new(); names.len()]
    } else {
        Vec::new()
    };

    for (line_no, line) in lines {
        let mut fields = line.split('\t');
        let time = number(fields.next().unwrap_or_default(), line_no)?;
        times.push(time);
        if !include_data {
            continue;
        }
        let values: Vec<&str> = fields.collect();
        if values.len() != names.len() {
            return Err(Error::DataIntegrity(format!(
                "Capture file '{}' line {}: expected {} values, found {}",
                filename,
                line_no + 1,
                names.len(),
                values.len()
            )));
        }
        for (column, raw) in columns.iter_mut().zip(values) {
            column.push(number(raw, line_no)?);
        }
    }

    let sample_start = times.first().copied().unwrap_or(0.0);
    let sample_end = times.last().copied().unwrap_or(0.0);
    let sample_step = match times.as_slice() {
        [first, second, ..] => second - first,
        _ => 0.0,
    };

    let mut cf = CaptureFile::new(filename, sample_start, sample_end, sample_step);
    if include_data {
        for (name, values) in names.into_iter().zip(columns) {
            cf.add_waveform(Waveform::new(name, times.clone(), values)?);
        }
    } else {
        for name in names {
            cf.add_waveform(Waveform::header_only(name));
        }
    }
    Ok(cf)
}
