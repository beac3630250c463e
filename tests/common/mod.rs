//! Shared fixtures: archive builders and a range-capable mock server.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};
use zipsync::ProgressListener;

pub const BOUNDARY: &str = "zipsync_test_boundary";
pub const MANIFEST: &str = "META-INF/MANIFEST.MF";

/// Build an archive from `(name, content)` pairs. Names ending in `/` become
/// directory entries.
pub fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Entry names and contents of an archive file, in archive order.
pub fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            (file.name().to_string(), content)
        })
        .collect()
}

pub fn names(entries: &[(String, Vec<u8>)]) -> Vec<&str> {
    entries.iter().map(|(name, _)| name.as_str()).collect()
}

fn le16(data: &[u8], at: usize) -> usize {
    u16::from_le_bytes([data[at], data[at + 1]]) as usize
}

fn le32(data: &[u8], at: usize) -> usize {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap()) as usize
}

/// Clear general purpose bit 11 (UTF-8 names) in every central directory
/// and local header of an archive without a comment, as older tools write
/// them.
pub fn clear_utf8_flag(data: &mut [u8]) {
    let eocd = data.len() - 22;
    let count = le16(data, eocd + 10);
    let mut record = le32(data, eocd + 16);

    for _ in 0..count {
        // Bit 11 is bit 3 of the flags' high byte.
        data[record + 9] &= !0x08;
        let local = le32(data, record + 42);
        data[local + 7] &= !0x08;
        record += 46 + le16(data, record + 28) + le16(data, record + 30) + le16(data, record + 32);
    }
}

/// Serves byte ranges of `data` like a range-capable web server: one range
/// gets a plain 206 body, several get a `multipart/byteranges` body.
pub struct RangeResponder {
    data: Vec<u8>,
    merge_adjacent: bool,
}

impl RangeResponder {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            merge_adjacent: false,
        }
    }

    /// Coalesces adjacent requested ranges before answering, like servers
    /// that optimize multi-range requests.
    pub fn merging(data: Vec<u8>) -> Self {
        Self {
            data,
            merge_adjacent: true,
        }
    }

    fn merge(ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        let mut merged: Vec<(usize, usize)> = Vec::new();
        for (first, last) in ranges {
            match merged.last_mut() {
                Some(previous) if previous.1 + 1 == first => previous.1 = last,
                _ => merged.push((first, last)),
            }
        }
        merged
    }

    fn parse_ranges(header: &str) -> Vec<(usize, usize)> {
        header
            .trim()
            .strip_prefix("bytes=")
            .unwrap()
            .split(',')
            .map(|spec| {
                let (first, last) = spec.trim().split_once('-').unwrap();
                (first.parse().unwrap(), last.parse().unwrap())
            })
            .collect()
    }

    fn content_range(&self, first: usize, last: usize) -> String {
        format!("bytes {}-{}/{}", first, last, self.data.len())
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(header) = request.headers.get("range") else {
            return ResponseTemplate::new(200).set_body_bytes(self.data.clone());
        };
        let mut ranges = Self::parse_ranges(header.to_str().unwrap());
        if self.merge_adjacent {
            ranges = Self::merge(ranges);
        }

        if let [(first, last)] = ranges[..] {
            return ResponseTemplate::new(206)
                .insert_header("content-range", self.content_range(first, last).as_str())
                .insert_header("content-type", "application/zip")
                .set_body_bytes(self.data[first..=last].to_vec());
        }

        let mut body = Vec::new();
        for (first, last) in ranges {
            write!(
                body,
                "\r\n--{BOUNDARY}\r\nContent-Type: application/zip\r\nContent-Range: {}\r\n\r\n",
                self.content_range(first, last)
            )
            .unwrap();
            body.extend_from_slice(&self.data[first..=last]);
        }
        write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();

        ResponseTemplate::new(206)
            .insert_header(
                "content-type",
                format!("multipart/byteranges; boundary={BOUNDARY}").as_str(),
            )
            .set_body_bytes(body)
    }
}

/// Publish `data` as `/<name>` plus its index `/<name>.idx` and return the
/// archive URL. The range mock expects `range_requests` calls when given.
pub async fn publish(
    server: &MockServer,
    dir: &Path,
    name: &str,
    data: Vec<u8>,
    range_requests: Option<u64>,
) -> reqwest::Url {
    publish_with(server, dir, name, RangeResponder::new(data), range_requests).await
}

/// Like [`publish`], with the archive served by `responder`.
pub async fn publish_with(
    server: &MockServer,
    dir: &Path,
    name: &str,
    responder: RangeResponder,
    range_requests: Option<u64>,
) -> reqwest::Url {
    let golden = dir.join(format!("golden-{name}"));
    std::fs::write(&golden, &responder.data).unwrap();
    let records = zipsync::index::build_index(&golden).await.unwrap();
    let index = zipsync::index::encode_to_vec(&records).unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/{name}.idx")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(index))
        .mount(server)
        .await;

    let mut archive_mock = Mock::given(method("GET"))
        .and(path(format!("/{name}")))
        .respond_with(responder);
    if let Some(calls) = range_requests {
        archive_mock = archive_mock.expect(calls);
    }
    archive_mock.mount(server).await;

    format!("{}/{}", server.uri(), name).parse().unwrap()
}

/// Records progress messages.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressListener for Recorder {
    fn init(&self, message: &str) {
        self.events.lock().unwrap().push(format!("init {message}"));
    }

    fn init_range(&self, message: &str, min: u64, max: u64) {
        self.events
            .lock()
            .unwrap()
            .push(format!("init {message} {min}..{max}"));
    }

    fn update(&self, _value: u64) {}

    fn label(&self, text: &str) {
        self.events.lock().unwrap().push(format!("label {text}"));
    }

    fn progress(&self) -> u64 {
        0
    }

    fn finish(&self) {
        self.events.lock().unwrap().push("finish".to_string());
    }
}
