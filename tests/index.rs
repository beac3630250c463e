mod common;

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use common::archive;
use zipsync::Error;
use zipsync::index::{build_index, decode, index_file_path, index_path};

#[tokio::test]
async fn test_index_directory_writes_one_file_per_archive() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.jar"), archive(&[("x", b"1"), ("y", b"22")])).unwrap();
    fs::write(dir.path().join("B.ZIP"), archive(&[("z/", b""), ("z/w", b"333")])).unwrap();
    fs::write(dir.path().join("notes.txt"), b"not an archive").unwrap();

    let written = index_path(dir.path()).await.unwrap();
    assert_eq!(written.len(), 2);

    for archive_path in [dir.path().join("B.ZIP"), dir.path().join("a.jar")] {
        let idx = index_file_path(&archive_path);
        assert!(written.contains(&idx));

        let records = decode(fs::File::open(&idx).unwrap()).unwrap();
        assert_eq!(records, build_index(&archive_path).await.unwrap());
    }
    assert!(!dir.path().join("notes.txt.idx").exists());
}

#[tokio::test]
async fn test_index_records_cover_entry_area() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.zip");
    fs::write(&path, archive(&[("first", b"aaaa"), ("second", &[7u8; 300])])).unwrap();

    let records = build_index(&path).await.unwrap();
    let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert!(records[0].end_offset < records[1].end_offset);
    assert_eq!(records[0].checksum, u64::from(crc32(b"aaaa")));
}

#[tokio::test]
async fn test_index_empty_directory_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("readme.md"), b"hi").unwrap();

    let err = index_path(dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::NoArchivesFound(_)));
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}
