use flate2::Crc;
use flate2::read::DeflateDecoder;
use std::io::{self, Chain, Read, Take};

use crate::error::{Error, Result};

use super::structures::{CompressionMethod, LocalFileHeader};

/// Raw inflate gets one byte past the real data.
const SENTINEL: &[u8] = &[0];

enum Payload<R: Read> {
    Stored(Take<R>),
    Deflated(DeflateDecoder<Chain<R, &'static [u8]>>),
}

/// Streams the uncompressed content of one ZIP entry.
///
/// The source must be positioned at a local file header signature, as is
/// the case for a byte range covering one archive entry. The header, name
/// and extra field are consumed up front; reads then return the entry's
/// decompressed bytes.
///
/// When the header carries the CRC (no data descriptor), the content is
/// verified against it once the payload is exhausted.
pub struct ZipEntryDecoder<R: Read> {
    header: LocalFileHeader,
    name: String,
    payload: Payload<R>,
    crc: Crc,
    verified: bool,
}

impl<R: Read> ZipEntryDecoder<R> {
    /// Decode the local file header and prepare the payload stream.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptArchive`] on a bad signature or short header,
    /// [`Error::UnsupportedFormat`] for encrypted entries, stored entries
    /// whose size is deferred to a data descriptor, and compression methods
    /// other than stored and deflate.
    pub fn new(mut source: R) -> Result<Self> {
        let mut fixed = [0u8; LocalFileHeader::SIZE];
        source.read_exact(&mut fixed).map_err(|e| {
            Error::CorruptArchive(format!("truncated local file header: {e}"))
        })?;
        let header = LocalFileHeader::from_bytes(&fixed)?;

        let mut name = vec![0u8; header.file_name_length as usize];
        source.read_exact(&mut name)?;
        let name = String::from_utf8_lossy(&name).into_owned();

        let extra = header.extra_field_length as u64;
        let skipped = io::copy(&mut (&mut source).take(extra), &mut io::sink())?;
        if skipped != extra {
            return Err(Error::CorruptArchive(format!(
                "truncated extra field for {name:?}"
            )));
        }

        if header.is_encrypted() {
            return Err(Error::UnsupportedFormat(format!(
                "encrypted entry {name:?}"
            )));
        }

        let payload = match header.compression_method {
            // Without a size in the header a stored payload cannot be told
            // apart from the descriptor that follows it.
            CompressionMethod::Stored if header.has_data_descriptor() => {
                return Err(Error::UnsupportedFormat(format!(
                    "stored entry {name:?} with a data descriptor"
                )));
            }
            CompressionMethod::Stored => {
                Payload::Stored(source.take(header.compressed_size as u64))
            }
            CompressionMethod::Deflate => {
                Payload::Deflated(DeflateDecoder::new(source.chain(SENTINEL)))
            }
            CompressionMethod::Unknown(method) => {
                return Err(Error::UnsupportedFormat(format!(
                    "compression method {method} for {name:?}"
                )));
            }
        };

        Ok(Self {
            header,
            name,
            payload,
            crc: Crc::new(),
            verified: false,
        })
    }

    pub fn header(&self) -> &LocalFileHeader {
        &self.header
    }

    /// Entry name as recorded in the local header
    pub fn name(&self) -> &str {
        &self.name
    }

    fn verify(&mut self) -> io::Result<()> {
        if self.verified || self.header.has_data_descriptor() {
            return Ok(());
        }
        self.verified = true;
        if self.crc.sum() != self.header.crc32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "CRC mismatch for {:?}: expected {:#010x}, got {:#010x}",
                    self.name,
                    self.header.crc32,
                    self.crc.sum()
                ),
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for ZipEntryDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.payload {
            Payload::Stored(reader) => reader.read(buf)?,
            Payload::Deflated(reader) => reader.read(buf)?,
        };
        if n == 0 && !buf.is_empty() {
            self.verify()?;
        } else {
            self.crc.update(&buf[..n]);
        }
        Ok(n)
    }
}
