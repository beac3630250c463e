//! ZIP archive parsing and entry decoding.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed-size ZIP records (EOCD, central directory and
//!   local file headers) and their decoding
//! - [`parser`]: central directory scan producing entry lists, resource
//!   sets and index records
//! - [`entry`]: streaming decoder for a single raw entry block
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The local entries are laid out back to back, so the byte range of an
//! entry runs from its local header to the byte before the next local
//! header (or before the Central Directory for the last entry). That range
//! is what gets requested from the remote archive.
//!
//! ## Limitations
//!
//! - No ZIP64 and no multi-disk archives
//! - No encryption
//! - Only STORED and DEFLATE compression

mod entry;
mod parser;
mod structures;

pub use entry::ZipEntryDecoder;
pub use parser::{CentralDirectory, ZipParser};
pub use structures::*;
