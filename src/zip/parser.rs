//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. Read the Central Directory to get metadata for all files
//! 3. Derive each entry's byte range from the local header offset of the
//!    entry that follows it
//!
//! Only the archive tail is touched, so listing a large archive is cheap.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::index::IndexRecord;
use crate::io::ReadAt;
use crate::resource::{Resource, ResourceSet};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Result of reading the central directory.
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    /// Entries in central directory order
    pub entries: Vec<ZipFileEntry>,
    /// Offset of the first central directory record; the local entry area
    /// is `[0, offset)`
    pub offset: u64,
}

/// Low-level ZIP file parser.
///
/// Generic over the reader type so archives can be scanned from anything
/// with positional reads.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let records = parser.index_records().await?;
/// for record in records {
///     println!("{} ends at {}", record.name, record.end_offset);
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Tries the comment-less position first, then scans backward through
    /// a window large enough for the record plus the longest possible
    /// comment.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// [`Error::CorruptArchive`] if no valid EOCD can be found.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::CorruptArchive(format!(
                "file too small for a ZIP archive ({} bytes)",
                self.size
            )));
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;

        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE_BYTES && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE_BYTES {
                // The comment length field must match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(Error::CorruptArchive(
            "End of Central Directory signature not found".to_string(),
        ))
    }

    /// Read every central directory record.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedFormat`] for ZIP64 and split archives,
    /// [`Error::CorruptArchive`] for a bad signature or a record count that
    /// does not fit the directory.
    pub async fn central_directory(&self) -> Result<CentralDirectory> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        if eocd.is_zip64() {
            return Err(Error::UnsupportedFormat("ZIP64 archives".to_string()));
        }
        if eocd.is_split() {
            return Err(Error::UnsupportedFormat("split archives".to_string()));
        }

        let cd_offset = eocd.cd_offset as u64;
        let cd_size = eocd.cd_size as u64;
        if cd_offset + cd_size > eocd_offset {
            return Err(Error::CorruptArchive(format!(
                "central directory [{cd_offset}, {}) overlaps EOCD at {eocd_offset}",
                cd_offset + cd_size
            )));
        }

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let total_entries = eocd.total_entries as usize;
        let mut entries = Vec::with_capacity(total_entries);
        let mut pos = 0;

        for i in 0..total_entries {
            let (entry, next) = Self::parse_cdfh(&cd_data, pos).map_err(|e| match e {
                Error::CorruptArchive(msg) => {
                    Error::CorruptArchive(format!("central directory record {i}: {msg}"))
                }
                other => other,
            })?;
            entries.push(entry);
            pos = next;
        }

        debug!(
            "Read {} central directory records at offset {}",
            entries.len(),
            cd_offset
        );

        Ok(CentralDirectory {
            entries,
            offset: cd_offset,
        })
    }

    /// Parse a Central Directory File Header starting at `pos`.
    ///
    /// Returns the entry and the position just past its variable fields.
    fn parse_cdfh(data: &[u8], pos: usize) -> Result<(ZipFileEntry, usize)> {
        let fixed_end = pos + CentralDirectoryRecord::SIZE;
        if fixed_end > data.len() {
            return Err(Error::CorruptArchive(
                "record extends past end of central directory".to_string(),
            ));
        }
        let record = CentralDirectoryRecord::from_bytes(&data[pos..fixed_end])?;

        let end = fixed_end + record.variable_length();
        if end > data.len() {
            return Err(Error::CorruptArchive(
                "variable fields extend past end of central directory".to_string(),
            ));
        }

        let name_bytes = &data[fixed_end..fixed_end + record.file_name_length as usize];
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(name_bytes).into_owned();

        Ok((
            ZipFileEntry {
                file_name,
                compression_method: record.compression_method,
                compressed_size: record.compressed_size as u64,
                uncompressed_size: record.uncompressed_size as u64,
                crc32: record.crc32,
                lfh_offset: record.lfh_offset as u64,
            },
            end,
        ))
    }

    /// List all entries in central directory order.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        Ok(self.central_directory().await?.entries)
    }

    /// Build the resource set of this archive: one [`Resource`] per entry,
    /// in archive order.
    pub async fn resources(&self) -> Result<ResourceSet> {
        let entries = self.list_files().await?;
        let mut resources = ResourceSet::with_capacity(entries.len());
        for entry in entries {
            let name = entry.file_name;
            if !resources.insert(Resource::new(name.clone(), entry.crc32 as u64)) {
                tracing::warn!("Ignoring duplicate entry name: {}", name);
            }
        }
        Ok(resources)
    }

    /// Build index records: name, checksum and end offset of every entry.
    ///
    /// The end offset of entry `i` is the local header offset of entry
    /// `i + 1` minus one; the last entry ends right before the central
    /// directory. Start offsets are implied by the previous record.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedFormat`] if local headers are not laid out in
    /// central directory order starting at offset 0, since the implied
    /// ranges would then be wrong.
    pub async fn index_records(&self) -> Result<Vec<IndexRecord>> {
        let cd = self.central_directory().await?;

        if let Some(first) = cd.entries.first() {
            if first.lfh_offset != 0 {
                return Err(Error::UnsupportedFormat(format!(
                    "archive has {} bytes of leading data before the first entry",
                    first.lfh_offset
                )));
            }
        }

        let mut records = Vec::with_capacity(cd.entries.len());
        for (i, entry) in cd.entries.iter().enumerate() {
            let next_start = cd
                .entries
                .get(i + 1)
                .map_or(cd.offset, |next| next.lfh_offset);

            if next_start <= entry.lfh_offset {
                return Err(Error::UnsupportedFormat(format!(
                    "central directory is not in local entry order at {:?}",
                    entry.file_name
                )));
            }

            if entry.file_name.is_empty() {
                return Err(Error::UnsupportedFormat(
                    "entry with an empty name".to_string(),
                ));
            }

            records.push(IndexRecord {
                name: entry.file_name.clone(),
                checksum: entry.crc32 as u64,
                end_offset: next_start as i64 - 1,
            });
        }

        Ok(records)
    }
}
