use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::rc::Rc;
use std::sync::Arc;

use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, HeaderMap, HeaderName, RANGE};
use reqwest::{Client, StatusCode, Url};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::UpdateConfig;
use crate::diff::DiffMap;
use crate::error::{Error, Result};
use crate::index::{self, INDEX_SUFFIX, IndexRecord};
use crate::io::Throttle;
use crate::progress::{ProgressListener, ProgressListeners};
use crate::resource::{Resource, ResourceSet};
use crate::zip::ZipEntryDecoder;

use super::multipart::MultipartReader;
use super::range::{ContentRange, Range, range_header};

/// Downloaded range data for one diff.
///
/// Created by [`RangeFetcher::fetch_data`] and consumed by
/// [`RangeFetcher::get_data`]; the scratch file is deleted when the entry
/// (or the [`RemoteResources`] holding it) is dropped.
pub struct CacheEntry {
    file: NamedTempFile,
    headers: HeaderMap,
}

impl CacheEntry {
    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// A remote entry's name and decompressed content.
pub struct RemoteResource {
    pub name: String,
    pub data: ZipEntryDecoder<Box<dyn Read>>,
}

/// Fetches index and entry data of a remote archive with HTTP range
/// requests.
///
/// [`get_resources`](Self::get_resources) loads `<url>.idx` and keeps the
/// byte range of every entry; [`fetch_data`](Self::fetch_data) then
/// downloads all ranges a diff needs in one request.
pub struct RangeFetcher {
    client: Client,
    url: Url,
    config: UpdateConfig,
    listeners: ProgressListeners,
    named_ranges: HashMap<String, Range>,
    ranged_names: HashMap<String, String>,
}

impl RangeFetcher {
    pub fn new(url: Url, config: UpdateConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_client(client, url, config))
    }

    /// Use an existing client (and its connection pool).
    pub fn with_client(client: Client, url: Url, config: UpdateConfig) -> Self {
        if let Some(speed) = config.download_speed {
            debug!("Enabling throttling: {} KB/s max", speed);
        }
        Self {
            client,
            url,
            config,
            listeners: ProgressListeners::new(),
            named_ranges: HashMap::new(),
            ranged_names: HashMap::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn add_progress_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_progress_listener(&mut self, listener: &Arc<dyn ProgressListener>) {
        self.listeners.remove(listener);
    }

    /// Download and parse the remote index, returning the remote resource
    /// set in index order.
    pub async fn get_resources(&mut self) -> Result<ResourceSet> {
        let index_url = format!("{}{}", self.url, INDEX_SUFFIX);
        let resp = self.client.get(&index_url).send().await.map_err(|e| {
            info!("Failed to connect to source: {} , {}", index_url, e);
            Error::Transport {
                url: index_url.clone(),
                message: e.to_string(),
                headers: Vec::new(),
            }
        })?;

        if !resp.status().is_success() {
            let headers = header_pairs(resp.headers());
            log_headers(&index_url, &headers);
            return Err(Error::Transport {
                url: index_url,
                message: format!("HTTP status {}", resp.status()),
                headers,
            });
        }

        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| Error::Transport {
            url: index_url.clone(),
            message: e.to_string(),
            headers: header_pairs(&headers),
        })?;
        let records = index::decode(&body[..]).map_err(|e| match e {
            Error::CorruptIndex(msg) => Error::CorruptIndex(format!("{index_url}: {msg}")),
            other => other,
        })?;
        self.load_index(records)
    }

    /// Replace the range tables with `records` and return their resources.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptIndex`] if end offsets are not strictly increasing.
    pub fn load_index(&mut self, records: Vec<IndexRecord>) -> Result<ResourceSet> {
        self.named_ranges.clear();
        self.ranged_names.clear();

        let mut resources = ResourceSet::with_capacity(records.len());
        let mut previous_end = -1i64;

        for record in records {
            if record.end_offset <= previous_end {
                return Err(Error::CorruptIndex(format!(
                    "end offset {} of {:?} does not follow {}",
                    record.end_offset, record.name, previous_end
                )));
            }
            let range = Range::new(previous_end, record.end_offset);
            previous_end = record.end_offset;

            if !resources.insert(Resource::new(record.name.clone(), record.checksum)) {
                return Err(Error::CorruptIndex(format!(
                    "duplicate entry {:?}",
                    record.name
                )));
            }
            self.ranged_names.insert(range.key(), record.name.clone());
            self.named_ranges.insert(record.name, range);
        }

        debug!("Loaded {} remote resources", resources.len());
        Ok(resources)
    }

    /// Byte range of a remote entry, as loaded by the last index parse.
    pub fn range_of(&self, name: &str) -> Option<Range> {
        self.named_ranges.get(name).copied()
    }

    /// Ranges of every ADD/UPDATE entry in `diff`, ascending.
    pub fn remote_ranges(&self, diff: &DiffMap) -> Result<Vec<Range>> {
        let mut ranges = diff
            .remote_entries()
            .map(|entry| {
                self.range_of(&entry.resource.name).ok_or_else(|| {
                    Error::CorruptIndex(format!(
                        "{:?} is not listed in the remote index",
                        entry.resource.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        ranges.sort();
        Ok(ranges)
    }

    /// Download the data of every ADD/UPDATE entry of `diff` into a scratch
    /// file with a single range request.
    ///
    /// Returns `None` when the diff needs no remote data.
    pub async fn fetch_data(&self, diff: &DiffMap) -> Result<Option<CacheEntry>> {
        let ranges = self.remote_ranges(diff)?;
        let Some(range_spec) = range_header(&ranges) else {
            return Ok(None);
        };
        let estimated: u64 = ranges.iter().map(Range::len).sum();
        let url = self.url.to_string();

        debug!("Requesting {} ranges ({} bytes) from {}", ranges.len(), estimated, url);

        let mut resp = self
            .client
            .get(self.url.clone())
            .header(RANGE, &range_spec)
            .send()
            .await
            .map_err(|e| {
                info!("Failed to connect to source: {} , {}", url, e);
                Error::Transport {
                    url: url.clone(),
                    message: e.to_string(),
                    headers: Vec::new(),
                }
            })?;

        let headers = resp.headers().clone();
        let fail = |message: String| {
            let pairs = header_pairs(&headers);
            info!("Range request to {} failed: {}", url, message);
            log_headers(&url, &pairs);
            Error::Transport {
                url: url.clone(),
                message,
                headers: pairs,
            }
        };

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(fail(format!(
                "expected 206 Partial Content, got {}",
                resp.status()
            )));
        }

        let mut cache = NamedTempFile::new()?;
        debug!(
            "Downloading data into cache: source={} cache={}",
            url,
            cache.path().display()
        );

        let mut throttle = self.config.download_speed.map(Throttle::new);
        let mut bytes_read = 0u64;
        self.listeners
            .init_range("Downloading new resources...", 0, estimated);

        loop {
            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(fail(e.to_string())),
            };
            cache.as_file_mut().write_all(&chunk)?;
            bytes_read += chunk.len() as u64;
            self.listeners.update(bytes_read);

            if let Some(throttle) = throttle.as_mut() {
                throttle.consume(chunk.len()).await;
            }
        }
        cache.as_file_mut().flush()?;

        debug!(
            "Downloaded {} bytes successfully: source={} cache={}",
            bytes_read,
            url,
            cache.path().display()
        );

        Ok(Some(CacheEntry {
            file: cache,
            headers,
        }))
    }

    /// Iterate over the remote resources of `diff` from downloaded data.
    ///
    /// With a single requested entry the cached body is one raw entry
    /// block; otherwise it is a `multipart/byteranges` body whose parts are
    /// mapped back to entry names through their `Content-Range`.
    ///
    /// Servers may coalesce adjacent ranges into one part, or answer a
    /// multi-range request with one plain body. Such a block is split
    /// across the consecutive requested ranges it covers.
    pub fn get_data(&self, diff: &DiffMap, cache: Option<CacheEntry>) -> Result<RemoteResources<'_>> {
        let Some(cache) = cache else {
            return Ok(RemoteResources {
                source: Source::Empty,
                _cache: None,
            });
        };

        let input = BufReader::with_capacity(self.config.buffer_size, cache.file.reopen()?);
        let mut remote = diff.remote_entries();

        let source = match (remote.next(), remote.next()) {
            (None, _) => Source::Empty,
            (Some(only), None) => Source::Single(Some((only.resource.name.clone(), input))),
            (Some(_), Some(_)) => {
                let requested = self.requested(diff);
                let header = |name: HeaderName| {
                    cache.headers.get(name).and_then(|v| v.to_str().ok())
                };

                match header(CONTENT_TYPE) {
                    Some(content_type) if content_type.starts_with("multipart/") => {
                        let boundary = boundary(content_type).ok_or_else(|| {
                            Error::CorruptMultipart(format!("no boundary in {content_type:?}"))
                        })?;
                        Source::Multipart {
                            parts: MultipartReader::new(input, &boundary),
                            ranged_names: &self.ranged_names,
                            requested,
                            split: None,
                        }
                    }
                    _ => {
                        let range = header(CONTENT_RANGE)
                            .and_then(ContentRange::parse)
                            .ok_or_else(|| {
                                Error::CorruptMultipart(
                                    "multi-range response is neither multipart nor a single range"
                                        .to_string(),
                                )
                            })?;
                        let split = Split::new(Box::new(input), &requested, range)
                            .ok_or_else(|| unrequested(&range))?;
                        Source::Split(split)
                    }
                }
            }
        };

        Ok(RemoteResources {
            source,
            _cache: Some(cache),
        })
    }

    /// Ranges and names of every ADD/UPDATE entry in `diff`, ascending.
    fn requested(&self, diff: &DiffMap) -> Vec<(Range, String)> {
        let mut requested: Vec<_> = diff
            .remote_entries()
            .filter_map(|entry| {
                let name = &entry.resource.name;
                self.range_of(name).map(|range| (range, name.clone()))
            })
            .collect();
        requested.sort();
        requested
    }
}

enum Source<'a> {
    Empty,
    Single(Option<(String, BufReader<File>)>),
    Split(Split),
    Multipart {
        parts: MultipartReader<BufReader<File>>,
        ranged_names: &'a HashMap<String, String>,
        requested: Vec<(Range, String)>,
        split: Option<Split>,
    },
}

/// Consecutive requested ranges delivered as one block.
///
/// Hands out one bounded [`Slice`] per range. Moving to the next slice
/// skips what is left of the previous one.
struct Split {
    input: Rc<RefCell<Box<dyn Read>>>,
    pending: VecDeque<(String, u64)>,
    current: Rc<Cell<u64>>,
}

impl Split {
    fn new(
        input: Box<dyn Read>,
        requested: &[(Range, String)],
        range: ContentRange,
    ) -> Option<Self> {
        let pending = split_range(requested, range.first, range.last)?;
        debug!(
            "Splitting merged range {} across {} entries",
            range.key(),
            pending.len()
        );
        Some(Self {
            input: Rc::new(RefCell::new(input)),
            pending,
            current: Rc::new(Cell::new(0)),
        })
    }

    fn next_slice(&mut self) -> Option<Result<(String, Slice)>> {
        let (name, len) = self.pending.pop_front()?;

        let left = self.current.replace(0);
        if left > 0 {
            let mut input = self.input.borrow_mut();
            match io::copy(&mut (&mut *input).take(left), &mut io::sink()) {
                Ok(skipped) if skipped == left => {}
                Ok(_) => {
                    return Some(Err(Error::CorruptMultipart(
                        "body ends inside a merged range".to_string(),
                    )));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }

        let remaining = Rc::new(Cell::new(len));
        self.current = Rc::clone(&remaining);
        Some(Ok((
            name,
            Slice {
                input: Rc::clone(&self.input),
                remaining,
            },
        )))
    }

    fn next_resource(&mut self) -> Option<Result<RemoteResource>> {
        let slice = self.next_slice()?;
        Some(slice.and_then(|(name, slice)| decode_entry(name, Box::new(slice))))
    }
}

/// One entry's bytes within a [`Split`] block. Reads nothing once the split
/// has moved on.
struct Slice {
    input: Rc<RefCell<Box<dyn Read>>>,
    remaining: Rc<Cell<u64>>,
}

impl Read for Slice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining.get();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.input.borrow_mut().read(&mut buf[..max])?;
        self.remaining.set(remaining - n as u64);
        Ok(n)
    }
}

/// Names and lengths of the consecutive ranges in `requested` that exactly
/// cover `first..=last`.
fn split_range(
    requested: &[(Range, String)],
    first: u64,
    last: u64,
) -> Option<VecDeque<(String, u64)>> {
    let first = i64::try_from(first).ok()?;
    let last = i64::try_from(last).ok()?;
    let start = requested
        .iter()
        .position(|(range, _)| range.first_byte() == first)?;

    let mut slices = VecDeque::new();
    let mut expected = first;
    for (range, name) in &requested[start..] {
        if range.first_byte() != expected || range.end > last {
            return None;
        }
        slices.push_back((name.clone(), range.len()));
        if range.end == last {
            return Some(slices);
        }
        expected = range.end + 1;
    }
    None
}

fn unrequested(range: &ContentRange) -> Error {
    Error::CorruptMultipart(format!("unrequested range {} in response", range.key()))
}

/// Lazy, single-pass sequence of downloaded resources.
///
/// Each item borrows the shared download stream: moving to the next item
/// invalidates the previous item's data.
pub struct RemoteResources<'a> {
    source: Source<'a>,
    // Dropped after `source` so the scratch file outlives its readers.
    _cache: Option<CacheEntry>,
}

impl RemoteResources<'_> {
    fn next_resource(&mut self) -> Option<Result<RemoteResource>> {
        match &mut self.source {
            Source::Empty => None,
            Source::Single(slot) => {
                let (name, input) = slot.take()?;
                Some(decode_entry(name, Box::new(input)))
            }
            Source::Split(split) => split.next_resource(),
            Source::Multipart {
                parts,
                ranged_names,
                requested,
                split,
            } => loop {
                if let Some(resource) = split.as_mut().and_then(Split::next_resource) {
                    return Some(resource);
                }
                *split = None;

                let part = match parts.next()? {
                    Ok(part) => part,
                    Err(e) => return Some(Err(e)),
                };
                let Some(range) = part.header("content-range").and_then(ContentRange::parse)
                else {
                    return Some(Err(Error::CorruptMultipart(
                        "part without a valid Content-Range".to_string(),
                    )));
                };
                if let Some(name) = ranged_names.get(&range.key()) {
                    return Some(decode_entry(name.clone(), Box::new(part.into_reader())));
                }
                match Split::new(Box::new(part.into_reader()), requested, range) {
                    Some(merged) => *split = Some(merged),
                    None => return Some(Err(unrequested(&range))),
                }
            },
        }
    }
}

impl Iterator for RemoteResources<'_> {
    type Item = Result<RemoteResource>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next_resource();
        if item.is_none() {
            self.source = Source::Empty;
        }
        item
    }
}

fn decode_entry(name: String, input: Box<dyn Read>) -> Result<RemoteResource> {
    let data = ZipEntryDecoder::new(input)?;
    if data.name() != name {
        return Err(Error::CorruptIndex(format!(
            "range for {name:?} holds entry {:?}",
            data.name()
        )));
    }
    Ok(RemoteResource { name, data })
}

/// Extract the `boundary` parameter of a multipart `Content-Type`.
fn boundary(content_type: &str) -> Option<String> {
    const DELIM: &str = "boundary=";
    let start = content_type.find(DELIM)? + DELIM.len();
    let rest = &content_type[start..];
    let value = rest.split(';').next().unwrap_or(rest).trim();
    let value = value.trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn log_headers(url: &str, headers: &[(String, String)]) {
    for (name, value) in headers {
        info!("HTTPResponseHeader - {}: {} ({})", name, value, url);
    }
}
