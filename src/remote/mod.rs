//! Remote side of an update: index download, byte range requests and
//! decoding of the returned entry data.

mod fetcher;
mod multipart;
mod range;

pub use fetcher::{CacheEntry, RangeFetcher, RemoteResource, RemoteResources};
pub use multipart::{MultipartReader, Part, PartReader};
pub use range::{ContentRange, Range, range_header};
