//! Index files published next to remote archives.
//!
//! An index file (`<archive>.idx`) lists every entry of an archive as
//! `name`, `checksum` and `end offset`, in archive order. The start offset of
//! an entry is not stored: it is the previous record's end offset plus one
//! (`0` for the first record).
//!
//! ## Layout
//!
//! Before compression the file is:
//!
//! ```text
//! repeat { u16 name length | UTF-8 name | u64 checksum | u64 end offset }
//! u16 0                       (terminator)
//! u64 CRC-32 of every byte above, terminator included
//! ```
//!
//! All integers are big-endian. The whole sequence, trailing checksum
//! included, is stored as a zlib stream.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, CrcReader, CrcWriter};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::io::LocalFileReader;
use crate::zip::ZipParser;

/// Suffix appended to an archive's file name or URL to locate its index.
pub const INDEX_SUFFIX: &str = ".idx";

/// One entry of an index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub name: String,
    pub checksum: u64,
    /// Inclusive offset of the entry's last byte in the archive
    pub end_offset: i64,
}

/// Encode records into the compressed, checksummed index format.
pub fn encode<W: Write>(records: &[IndexRecord], output: W) -> Result<W> {
    let encoder = ZlibEncoder::new(output, Compression::best());
    let mut writer = CrcWriter::new(BufWriter::new(encoder));

    for record in records {
        let name = record.name.as_bytes();
        if name.is_empty() || name.len() > u16::MAX as usize {
            return Err(Error::UnsupportedFormat(format!(
                "entry name of {} bytes cannot be indexed",
                name.len()
            )));
        }
        writer.write_u16::<BigEndian>(name.len() as u16)?;
        writer.write_all(name)?;
        writer.write_u64::<BigEndian>(record.checksum)?;
        writer.write_u64::<BigEndian>(record.end_offset as u64)?;
    }
    writer.write_u16::<BigEndian>(0)?;

    let checksum = writer.crc().sum() as u64;
    debug!("Checksum for index data: {:#010X}", checksum);

    let mut buffered = writer.into_inner();
    buffered.write_u64::<BigEndian>(checksum)?;
    let encoder = buffered.into_inner().map_err(|e| e.into_error())?;
    Ok(encoder.finish()?)
}

/// Encode records into a byte vector.
pub fn encode_to_vec(records: &[IndexRecord]) -> Result<Vec<u8>> {
    encode(records, Vec::new())
}

/// Decode an index file, verifying its checksum.
///
/// Any inflate failure, truncation or checksum mismatch is reported as
/// [`Error::CorruptIndex`].
pub fn decode<R: Read>(input: R) -> Result<Vec<IndexRecord>> {
    read_records(input).map_err(|e| match e {
        Error::Io(io) => Error::CorruptIndex(io.to_string()),
        other => other,
    })
}

fn read_records<R: Read>(input: R) -> Result<Vec<IndexRecord>> {
    let mut reader = CrcReader::new(ZlibDecoder::new(input));
    let mut records = Vec::new();

    loop {
        let len = reader.read_u16::<BigEndian>()? as usize;
        if len == 0 {
            break;
        }
        let mut name = vec![0u8; len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|e| Error::CorruptIndex(format!("entry name is not UTF-8: {e}")))?;
        let checksum = reader.read_u64::<BigEndian>()?;
        let end_offset = reader.read_u64::<BigEndian>()? as i64;
        records.push(IndexRecord {
            name,
            checksum,
            end_offset,
        });
    }

    let computed = reader.crc().sum() as u64;
    let stored = reader.read_u64::<BigEndian>()?;
    if computed != stored {
        return Err(Error::CorruptIndex(format!(
            "checksum mismatch: stored {stored:#010X}, computed {computed:#010X}"
        )));
    }

    Ok(records)
}

/// Build the index records of a local archive.
pub async fn build_index(archive: &Path) -> Result<Vec<IndexRecord>> {
    let reader = Arc::new(LocalFileReader::new(archive)?);
    ZipParser::new(reader).index_records().await
}

/// Path of the index file for `archive`.
pub fn index_file_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(INDEX_SUFFIX);
    PathBuf::from(name)
}

/// Write `<archive>.idx` next to `archive` and return its path.
pub async fn index_archive(archive: &Path) -> Result<PathBuf> {
    info!("Generating index for {}", archive.display());

    let records = build_index(archive).await?;
    let index_path = index_file_path(archive);
    let file = std::fs::File::create(&index_path)?;
    encode(&records, file)?.sync_all()?;

    debug!(
        "Wrote {} records to {}",
        records.len(),
        index_path.display()
    );
    Ok(index_path)
}

/// Index a single archive, or every ZIP/JAR file in a directory.
pub async fn index_path(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        let archives = find_archives(path)?;
        if archives.is_empty() {
            return Err(Error::NoArchivesFound(path.to_path_buf()));
        }
        info!("Generating index for all files in {}", path.display());

        let mut written = Vec::with_capacity(archives.len());
        for archive in archives {
            written.push(index_archive(&archive).await?);
        }
        Ok(written)
    } else {
        Ok(vec![index_archive(path).await?])
    }
}

/// List `*.zip` and `*.jar` files (case-insensitive) directly inside `dir`,
/// sorted by name.
pub fn find_archives(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_archive = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip") || ext.eq_ignore_ascii_case("jar"));
        if is_archive {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn records() -> Vec<IndexRecord> {
        vec![
            IndexRecord {
                name: "META-INF/MANIFEST.MF".to_string(),
                checksum: 0x1234_5678,
                end_offset: 99,
            },
            IndexRecord {
                name: "de/vxart/Ünïcode.class".to_string(),
                checksum: 0xFFFF_FFFF,
                end_offset: 4_000_000_000,
            },
            IndexRecord {
                name: "empty/".to_string(),
                checksum: 0,
                end_offset: 4_000_000_100,
            },
        ]
    }

    #[test]
    fn round_trip_preserves_order_and_values() {
        let encoded = encode_to_vec(&records()).unwrap();
        assert_eq!(decode(&encoded[..]).unwrap(), records());
    }

    #[test]
    fn uncompressed_layout_is_big_endian_with_terminator() {
        let record = IndexRecord {
            name: "a".to_string(),
            checksum: 2,
            end_offset: 3,
        };
        let encoded = encode_to_vec(std::slice::from_ref(&record)).unwrap();
        let mut raw = Vec::new();
        ZlibDecoder::new(&encoded[..]).read_to_end(&mut raw).unwrap();

        let body: Vec<u8> = [
            &[0, 1, b'a'][..],
            &2u64.to_be_bytes(),
            &3u64.to_be_bytes(),
            &[0, 0],
        ]
        .concat();
        let mut crc = flate2::Crc::new();
        crc.update(&body);

        assert_eq!(&raw[..body.len()], &body[..]);
        assert_eq!(&raw[body.len()..], &(crc.sum() as u64).to_be_bytes());
    }

    #[test]
    fn empty_index_round_trips() {
        let encoded = encode_to_vec(&[]).unwrap();
        assert!(decode(&encoded[..]).unwrap().is_empty());
    }

    #[test]
    fn checksum_mismatch_is_corrupt() {
        let encoded = encode_to_vec(&records()).unwrap();
        let mut raw = Vec::new();
        ZlibDecoder::new(&encoded[..]).read_to_end(&mut raw).unwrap();

        // Flip one bit of the first record's checksum and re-compress.
        raw[2 + "META-INF/MANIFEST.MF".len() + 7] ^= 0x01;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let tampered = encoder.finish().unwrap();

        assert!(matches!(decode(&tampered[..]), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn garbage_and_truncation_are_corrupt() {
        assert!(matches!(
            decode(&b"definitely not zlib"[..]),
            Err(Error::CorruptIndex(_))
        ));

        let encoded = encode_to_vec(&records()).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        assert!(matches!(decode(truncated), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn finds_zip_and_jar_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.JAR", "a.zip", "notes.txt", "c.zipx"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.zip")).unwrap();

        let found: Vec<_> = find_archives(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, ["a.zip", "b.JAR"]);
    }

    #[tokio::test]
    async fn empty_directory_has_no_archives() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            index_path(dir.path()).await,
            Err(Error::NoArchivesFound(_))
        ));
    }
}
