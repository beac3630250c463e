//! Rebuilding a local archive from its kept entries and fetched remote
//! entries, then swapping it into place.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reqwest::{Client, Url};
use tracing::{debug, info, trace, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::UpdateConfig;
use crate::diff::{DiffMap, Flag, diff};
use crate::error::{Error, Result};
use crate::io::LocalFileReader;
use crate::progress::{ProgressListener, ProgressListeners};
use crate::remote::{CacheEntry, RangeFetcher};
use crate::resource::ResourceSet;
use crate::zip::ZipParser;

/// JAR readers expect this entry first.
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

const TEMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".bck";

/// Brings local archives up to date with their remote counterparts.
pub struct PatchEngine {
    client: Client,
    config: UpdateConfig,
    listeners: ProgressListeners,
    overall: ProgressListeners,
}

impl PatchEngine {
    pub fn new(config: UpdateConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: UpdateConfig) -> Self {
        Self {
            client,
            config,
            listeners: ProgressListeners::new(),
            overall: ProgressListeners::new(),
        }
    }

    /// Listener for the phases of a single archive update, download
    /// included.
    pub fn add_progress_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_progress_listener(&mut self, listener: &Arc<dyn ProgressListener>) {
        self.listeners.remove(listener);
    }

    /// Listener for [`update_all`](Self::update_all) progress across
    /// archives.
    pub fn add_overall_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.overall.add(listener);
    }

    /// A fetcher for `url` sharing this engine's client, configuration and
    /// listeners.
    pub fn fetcher(&self, url: Url) -> RangeFetcher {
        let mut fetcher = RangeFetcher::with_client(self.client.clone(), url, self.config.clone());
        for listener in self.listeners.iter() {
            fetcher.add_progress_listener(Arc::clone(listener));
        }
        fetcher
    }

    /// Update `archive` to match the archive at `url`.
    ///
    /// Returns `false` when both were already identical.
    pub async fn update(&self, archive: &Path, url: Url) -> Result<bool> {
        let mut fetcher = self.fetcher(url);
        self.listeners.init("Initializing...");

        let started = Instant::now();
        let local = local_resources(archive).await?;
        let remote = fetcher.get_resources().await?;
        debug!(
            "Loaded {} local and {} remote resources in {:?}",
            local.len(),
            remote.len(),
            started.elapsed()
        );

        let diff = diff(&local, &remote);
        debug!(
            "Diff for {}: {} added, {} updated, {} removed",
            archive.display(),
            diff.count(Flag::Add),
            diff.count(Flag::Update),
            diff.count(Flag::Remove)
        );
        for entry in diff.iter() {
            trace!("{} {}", entry.flag, entry.resource);
        }

        let changed = self.patch(archive, &fetcher, &diff, local.len()).await?;
        self.listeners.finish();

        if changed {
            info!("Updated {} from {}", archive.display(), fetcher.url());
        } else {
            info!("{} is up to date", archive.display());
        }
        Ok(changed)
    }

    /// Apply `diff` to `archive`, fetching remote entries with `fetcher`.
    ///
    /// `local_count` is the number of entries in `archive`, used to size
    /// progress. Returns `false` for an empty diff.
    pub async fn patch(
        &self,
        archive: &Path,
        fetcher: &RangeFetcher,
        diff: &DiffMap,
        local_count: usize,
    ) -> Result<bool> {
        if diff.is_empty() {
            return Ok(false);
        }

        let patched = sibling(archive, TEMP_SUFFIX);
        if patched.exists() {
            fs::remove_file(&patched)?;
        }

        let started = Instant::now();
        let cache = fetcher.fetch_data(diff).await?;
        debug!("Fetched remote data in {:?}", started.elapsed());

        self.listeners
            .init_range("Patching...", 0, (local_count + diff.len()) as u64);

        let started = Instant::now();
        if let Err(e) = self.rebuild(archive, &patched, fetcher, diff, cache) {
            if let Err(cleanup) = fs::remove_file(&patched) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", patched.display(), cleanup);
                }
            }
            return Err(e);
        }
        debug!("Rebuilt archive in {:?}", started.elapsed());

        self.listeners.init("Finalizing...");
        replace_archive(archive, &patched)?;
        Ok(true)
    }

    fn rebuild(
        &self,
        archive: &Path,
        patched: &Path,
        fetcher: &RangeFetcher,
        diff: &DiffMap,
        cache: Option<CacheEntry>,
    ) -> Result<()> {
        let mut original = ZipArchive::new(File::open(archive)?)?;
        let mut writer = ZipWriter::new(File::create(patched)?);

        if diff.flag(MANIFEST_NAME) == Some(Flag::Add) {
            debug!("Manifest added remotely, writing remote entries first");
            self.patch_remotely(&mut writer, fetcher, diff, cache)?;
            self.patch_locally(&mut writer, &mut original, diff)?;
        } else {
            self.patch_locally(&mut writer, &mut original, diff)?;
            self.patch_remotely(&mut writer, fetcher, diff, cache)?;
        }

        writer.finish()?.sync_all()?;
        Ok(())
    }

    /// Copy entries absent from `diff`, in original order, without
    /// recompressing them.
    fn patch_locally(
        &self,
        writer: &mut ZipWriter<File>,
        original: &mut ZipArchive<File>,
        diff: &DiffMap,
    ) -> Result<()> {
        for i in 0..original.len() {
            let entry = original.by_index_raw(i)?;
            // Names are keyed the way the central directory scan reads them,
            // not through the zip crate's CP437 fallback.
            let name = String::from_utf8_lossy(entry.name_raw()).into_owned();
            match diff.flag(&name) {
                None => {
                    trace!("Keeping {}", name);
                    writer.raw_copy_file_rename(entry, name.as_str())?;
                }
                Some(flag) => trace!("Skipping {} ({})", name, flag),
            }
            self.listeners.step();
        }
        Ok(())
    }

    /// Write every fetched entry in delivery order.
    fn patch_remotely(
        &self,
        writer: &mut ZipWriter<File>,
        fetcher: &RangeFetcher,
        diff: &DiffMap,
        cache: Option<CacheEntry>,
    ) -> Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for resource in fetcher.get_data(diff, cache)? {
            let mut resource = resource?;
            trace!("Writing remote {}", resource.name);

            if resource.name.ends_with('/') {
                writer.add_directory(resource.name.as_str(), options)?;
            } else {
                writer.start_file(resource.name.as_str(), options)?;
                io::copy(&mut resource.data, writer)?;
            }
            self.listeners.step();
        }
        Ok(())
    }

    /// Update each `(archive, url)` pair in turn and return how many
    /// archives changed.
    ///
    /// Stops at the first failure.
    pub async fn update_all(&self, targets: &[(PathBuf, Url)]) -> Result<usize> {
        self.overall.init_range(
            &format!("Updating {} archives...", targets.len()),
            0,
            targets.len() as u64,
        );

        let mut changed = 0;
        for (i, (archive, url)) in targets.iter().enumerate() {
            let label = archive
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| archive.display().to_string());
            self.overall.label(&label);

            if self.update(archive, url.clone()).await? {
                changed += 1;
            }
            self.overall.update(i as u64 + 1);
        }

        self.overall.finish();
        Ok(changed)
    }
}

async fn local_resources(archive: &Path) -> Result<ResourceSet> {
    let reader = Arc::new(LocalFileReader::new(archive)?);
    ZipParser::new(reader).resources().await
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Move `patched` into the place of `original`, going through a backup.
///
/// # Errors
///
/// - [`Error::ArchiveReplace`] if `original` could not be renamed to its
///   backup; nothing changed on disk.
/// - [`Error::InconsistentState`] if the backup exists but `patched` could
///   not be renamed; the backup is left on disk.
///
/// Failing to delete the backup afterwards is only logged.
pub fn replace_archive(original: &Path, patched: &Path) -> Result<()> {
    let backup = sibling(original, BACKUP_SUFFIX);

    fs::rename(original, &backup).map_err(|source| Error::ArchiveReplace {
        original: original.to_path_buf(),
        source,
    })?;

    fs::rename(patched, original).map_err(|source| Error::InconsistentState {
        backup: backup.clone(),
        patched: patched.to_path_buf(),
        source,
    })?;

    if let Err(e) = fs::remove_file(&backup) {
        warn!("Failed to delete backup {}: {}", backup.display(), e);
    }
    Ok(())
}
