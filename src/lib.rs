//! # zipsync
//!
//! Incremental updates of local ZIP/JAR archives from a remote copy.
//!
//! The publisher writes an index (`<archive>.idx`) next to each archive,
//! listing every entry's name, CRC-32 and byte range. An updater compares
//! that index with its local archive, downloads only the byte ranges of
//! added and changed entries with a single HTTP range request, and rebuilds
//! the local archive from its kept entries plus the downloaded ones.
//!
//! ## Features
//!
//! - Central directory scanning without reading entry data
//! - Compact, checksummed index files
//! - One multi-range request per update, `multipart/byteranges` aware
//! - Kept entries are copied without recompression
//! - JAR-safe ordering when the manifest is added remotely
//! - Backup-based archive replacement with distinct failure modes
//! - Optional download throttling and progress listeners
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use zipsync::{PatchEngine, UpdateConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Publisher side: writes app.jar.idx
//!     zipsync::index::index_archive(Path::new("dist/app.jar")).await?;
//!
//!     // Updater side
//!     let engine = PatchEngine::new(UpdateConfig::default())?;
//!     let url: reqwest::Url = "https://example.com/dist/app.jar".parse()?;
//!     let changed = engine.update(Path::new("lib/app.jar"), url).await?;
//!     println!("changed: {changed}");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod index;
pub mod io;
pub mod patch;
pub mod progress;
pub mod remote;
pub mod resource;
pub mod zip;

pub use cli::Cli;
pub use config::UpdateConfig;
pub use diff::{DiffEntry, DiffMap, Flag, diff};
pub use error::{Error, Result};
pub use index::IndexRecord;
pub use io::{LocalFileReader, ReadAt};
pub use patch::{PatchEngine, replace_archive};
pub use progress::{LogProgress, ProgressListener, ProgressListeners};
pub use remote::RangeFetcher;
pub use resource::{Resource, ResourceSet};
pub use zip::{ZipEntryDecoder, ZipParser};
