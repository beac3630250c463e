use std::cmp::Ordering;
use std::fmt;

/// Byte range of one entry inside a remote archive.
///
/// `start` is the end offset of the previous entry (`-1` for the first), so
/// the inclusive HTTP range is `start + 1 ..= end`. Ordering compares the
/// full 64-bit `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// First byte of the range, as sent in a `Range` header
    pub fn first_byte(&self) -> i64 {
        self.start + 1
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        (self.end - self.start).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// `"<first>-<last>"`, the key under which a response part's
    /// `Content-Range` is resolved back to an entry name.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first_byte(), self.end)
    }
}

impl Ord for Range {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Build a `Range` header value listing `ranges` in ascending order.
///
/// Returns `None` when there is nothing to request.
pub fn range_header(ranges: &[Range]) -> Option<String> {
    if ranges.is_empty() {
        return None;
    }
    let mut sorted = ranges.to_vec();
    sorted.sort();

    let specs: Vec<String> = sorted.iter().map(Range::key).collect();
    Some(format!("bytes={}", specs.join(",")))
}

/// Parsed `Content-Range: bytes START-END/TOTAL` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
    /// `None` when the total is `*`
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = spec.split_once('/')?;
        let (first, last) = range.trim().split_once('-')?;

        let first = first.trim().parse().ok()?;
        let last = last.trim().parse().ok()?;
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        Some(Self { first, last, total })
    }

    /// Same form as [`Range::key`]
    pub fn key(&self) -> String {
        format!("{}-{}", self.first, self.last)
    }

    /// Inclusive byte count
    pub fn len(&self) -> u64 {
        (self.last + 1).saturating_sub(self.first)
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lists_ranges_ascending_with_one_based_start() {
        let ranges = [Range::new(10, 20), Range::new(50, 60), Range::new(1, 5)];
        assert_eq!(
            range_header(&ranges).as_deref(),
            Some("bytes=2-5,11-20,51-60")
        );
    }

    #[test]
    fn ordering_uses_full_width_offsets() {
        // Truncating these starts to 32 bits would put the second one first.
        let low = Range::new(0x7FFF_FFF0, 0x8000_0010);
        let high = Range::new(0x1_0000_0000, 0x1_0000_0100);
        let mut ranges = vec![high, low];
        ranges.sort();
        assert_eq!(ranges, vec![low, high]);
        assert!(Range::new(-1, 10) < Range::new(10, 20));
    }

    #[test]
    fn first_range_starts_at_zero() {
        let first = Range::new(-1, 99);
        assert_eq!(first.key(), "0-99");
        assert_eq!(first.len(), 100);
    }

    #[test]
    fn empty_selection_has_no_header() {
        assert_eq!(range_header(&[]), None);
    }

    #[test]
    fn parses_content_range() {
        let range = ContentRange::parse("bytes 11-20/4096").unwrap();
        assert_eq!(range.key(), "11-20");
        assert_eq!(range.len(), 10);
        assert_eq!(range.total, Some(4096));

        assert_eq!(ContentRange::parse("bytes 0-0/*").unwrap().total, None);
        assert_eq!(ContentRange::parse("items 1-2/3"), None);
        assert_eq!(ContentRange::parse("bytes 1-x/3"), None);
    }
}
