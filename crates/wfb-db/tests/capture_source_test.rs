//! Filesystem waveform source against real directories and archives.

use std::path::Path;

use chrono::{TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use wfb_db::{DataLocation, Error, Event, FilesystemWaveformSource, WaveformSource};

const CAVITY_1: &str = "time\tR1M1GMES\tR1M1PMES\n-0.2\t1.0\t5.0\n0.0\t1.5\t5.5\n0.2\t2.0\t6.0\n";
const CAVITY_2: &str = "time\tR1M2GMES\n-0.2\t3.0\n0.0\t3.5\n0.2\t4.0\n";

fn event() -> Event {
    Event::new(
        Utc.with_ymd_and_hms(2019, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(300),
        "1L05",
        "rf",
    )
}

fn write_directory(root: &Path, event: &Event) {
    let dir = root.join(event.relative_path());
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("R1M1.txt"), CAVITY_1).unwrap();
    std::fs::write(dir.join("R1M2.txt"), CAVITY_2).unwrap();
    std::fs::write(dir.join("notes.log"), "ignored").unwrap();
}

fn append_file<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, content: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content.as_bytes()).unwrap();
}

fn append_dir<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, path, std::io::empty()).unwrap();
}

fn write_archive(root: &Path, event: &Event, nested: bool) {
    let path = root.join(event.relative_archive_path());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let top = path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .trim_end_matches(".tar.gz")
        .to_string();

    let file = std::fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    append_dir(&mut builder, &format!("{}/", top));
    append_file(&mut builder, &format!("{}/R1M2.txt", top), CAVITY_2);
    append_file(&mut builder, &format!("{}/R1M1.txt", top), CAVITY_1);
    if nested {
        append_dir(&mut builder, &format!("{}/extra/", top));
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[tokio::test]
async fn test_missing_data_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let source = FilesystemWaveformSource::new(tmp.path());
    let event = event();

    assert!(!source.has_data(&event).await.unwrap());
    let err = source.read_capture_files(&event, true).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_reads_event_directory() {
    let tmp = TempDir::new().unwrap();
    let event = event();
    write_directory(tmp.path(), &event);
    let source = FilesystemWaveformSource::new(tmp.path());

    assert!(source.has_data(&event).await.unwrap());
    assert!(matches!(
        source.locate(&event).await.unwrap(),
        Some(DataLocation::Directory(_))
    ));

    let files = source.read_capture_files(&event, true).await.unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["R1M1.txt", "R1M2.txt"]);

    let gmes = files[0].waveform("R1M1GMES").unwrap();
    assert_eq!(gmes.time_offsets(), &[-0.2, 0.0, 0.2]);
    assert_eq!(gmes.values(), &[1.0, 1.5, 2.0]);
    assert_eq!(files[1].sample_start, -0.2);
}

#[tokio::test]
async fn test_header_only_read_skips_samples() {
    let tmp = TempDir::new().unwrap();
    let event = event();
    write_directory(tmp.path(), &event);
    let source = FilesystemWaveformSource::new(tmp.path());

    let files = source.read_capture_files(&event, false).await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files[0].waveform("R1M1PMES").unwrap().is_empty());
}

#[tokio::test]
async fn test_reads_archive_when_directory_absent() {
    let tmp = TempDir::new().unwrap();
    let event = event();
    write_archive(tmp.path(), &event, false);
    let source = FilesystemWaveformSource::new(tmp.path());

    assert!(matches!(
        source.locate(&event).await.unwrap(),
        Some(DataLocation::Archive(_))
    ));
    let files = source.read_capture_files(&event, true).await.unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["R1M1.txt", "R1M2.txt"]);
    assert_eq!(files[1].waveform("R1M2GMES").unwrap().values(), &[3.0, 3.5, 4.0]);
}

#[tokio::test]
async fn test_directory_preferred_over_archive() {
    let tmp = TempDir::new().unwrap();
    let event = event();
    write_archive(tmp.path(), &event, true);
    write_directory(tmp.path(), &event);
    let source = FilesystemWaveformSource::new(tmp.path());

    // The nested archive would fail; the directory is read instead.
    let files = source.read_capture_files(&event, true).await.unwrap();
    assert_eq!(files.len(), 2);
}

#[tokio::test]
async fn test_nested_archive_directory_rejected() {
    let tmp = TempDir::new().unwrap();
    let event = event();
    write_archive(tmp.path(), &event, true);
    let source = FilesystemWaveformSource::new(tmp.path());

    let err = source.read_capture_files(&event, true).await.unwrap_err();
    assert!(matches!(err, Error::DataIntegrity(_)));
}
