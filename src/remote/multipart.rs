//! Forward-only parser for `multipart/byteranges` bodies.
//!
//! The size of each part's payload comes from its `Content-Length` header,
//! or failing that from its `Content-Range`. Payloads are never scanned for
//! the boundary, so those headers must be accurate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, BufRead, Read};
use std::rc::Rc;

use crate::error::{Error, Result};

use super::range::ContentRange;

struct Shared<R> {
    /// `None` once the closing delimiter was seen
    input: Option<R>,
    /// Id of the part whose payload is being read
    current: u64,
    /// Unread payload bytes of the current part
    remaining: u64,
}

/// Iterator over the parts of a multipart body.
///
/// Advancing to the next part first skips whatever is left of the previous
/// part's payload, so callers may ignore a part's body entirely. Readers of
/// earlier parts return no more data once the iterator has moved on.
pub struct MultipartReader<R: BufRead> {
    shared: Rc<RefCell<Shared<R>>>,
    dash_boundary: Vec<u8>,
    next_id: u64,
    done: bool,
}

impl<R: BufRead> MultipartReader<R> {
    pub fn new(input: R, boundary: &str) -> Self {
        let mut dash_boundary = b"--".to_vec();
        dash_boundary.extend_from_slice(boundary.as_bytes());

        Self {
            shared: Rc::new(RefCell::new(Shared {
                input: Some(input),
                current: 0,
                remaining: 0,
            })),
            dash_boundary,
            next_id: 1,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Option<Part<R>>> {
        let id = self.next_id;
        self.next_id += 1;

        let mut guard = self.shared.borrow_mut();
        let shared = &mut *guard;
        let remaining = shared.remaining;
        shared.remaining = 0;
        shared.current = id;

        let Some(input) = shared.input.as_mut() else {
            return Ok(None);
        };

        if remaining > 0 {
            let skipped = io::copy(&mut input.by_ref().take(remaining), &mut io::sink())?;
            if skipped < remaining {
                return Err(Error::CorruptMultipart(
                    "body ends inside a part payload".to_string(),
                ));
            }
        }

        // Skip the preamble or the CRLF that ends the previous payload.
        loop {
            let line = read_line(input)?.ok_or_else(|| {
                Error::CorruptMultipart("missing closing boundary delimiter".to_string())
            })?;
            let line = trim_padding(&line);

            if line == self.dash_boundary.as_slice() {
                break;
            }
            if line.len() == self.dash_boundary.len() + 2
                && line.starts_with(&self.dash_boundary)
                && line.ends_with(b"--")
            {
                // Closing delimiter: release the underlying stream.
                shared.input = None;
                return Ok(None);
            }
        }

        let mut headers = HashMap::new();
        loop {
            let line = read_line(input)?.ok_or_else(|| {
                Error::CorruptMultipart("body ends inside part headers".to_string())
            })?;
            if line.is_empty() {
                break;
            }
            let line = String::from_utf8_lossy(&line);
            let (name, value) = line.split_once(':').ok_or_else(|| {
                Error::CorruptMultipart(format!("malformed part header: {line:?}"))
            })?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let size = payload_size(&headers)?;
        shared.remaining = size;

        Ok(Some(Part {
            headers,
            size,
            body: PartReader {
                shared: Rc::clone(&self.shared),
                id,
            },
        }))
    }
}

impl<R: BufRead> Iterator for MultipartReader<R> {
    type Item = Result<Part<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(part)) => Some(Ok(part)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.shared.borrow_mut().input = None;
                Some(Err(e))
            }
        }
    }
}

/// Read one line without its terminator. `None` at end of input.
///
/// Lines end with CRLF; a bare LF is accepted too. A CR anywhere else is a
/// framing error.
fn read_line<R: BufRead>(input: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if input.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    if line.contains(&b'\r') {
        return Err(Error::CorruptMultipart(
            "found CR not followed by LF".to_string(),
        ));
    }
    Ok(Some(line))
}

/// Strip the linear whitespace allowed after a boundary delimiter.
fn trim_padding(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| *b != b' ' && *b != b'\t')
        .map_or(0, |i| i + 1);
    &line[..end]
}

fn payload_size(headers: &HashMap<String, String>) -> Result<u64> {
    if let Some(length) = headers.get("content-length") {
        return length.parse().map_err(|_| {
            Error::CorruptMultipart(format!("invalid Content-Length: {length:?}"))
        });
    }
    if let Some(range) = headers.get("content-range") {
        return ContentRange::parse(range)
            .map(|r| r.len())
            .ok_or_else(|| Error::CorruptMultipart(format!("invalid Content-Range: {range:?}")));
    }
    Err(Error::CorruptMultipart(
        "part has neither Content-Length nor Content-Range".to_string(),
    ))
}

/// One part of a multipart body.
pub struct Part<R> {
    headers: HashMap<String, String>,
    size: u64,
    body: PartReader<R>,
}

impl<R: BufRead> Part<R> {
    /// Header names are stored lowercase; `name` is matched
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Declared payload size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Another handle on this part's payload
    pub fn reader(&self) -> PartReader<R> {
        PartReader {
            shared: Rc::clone(&self.body.shared),
            id: self.body.id,
        }
    }

    pub fn into_reader(self) -> PartReader<R> {
        self.body
    }
}

/// Bounded reader over one part's payload.
pub struct PartReader<R> {
    shared: Rc<RefCell<Shared<R>>>,
    id: u64,
}

impl<R: BufRead> Read for PartReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.shared.borrow_mut();
        let shared = &mut *guard;
        if shared.current != self.id || shared.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = buf.len().min(usize::try_from(shared.remaining).unwrap_or(usize::MAX));
        let Some(input) = shared.input.as_mut() else {
            return Ok(0);
        };
        let n = input.read(&mut buf[..limit])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "multipart body ends inside a part payload",
            ));
        }
        shared.remaining -= n as u64;
        Ok(n)
    }
}
