//! Common flow classifier.
//!
//! Filters are 5-tuple patterns (plus ToS, IPv6 flow label and IPsec SPI) with per-field
//! masks, each bound to a class. They are kept in 256 hash buckets keyed by the exact
//! destination address (IPv4) or flow label (IPv6), plus one wildcard bucket for everything
//! else. Within a bucket, filters are ordered by descending rule number and the first match
//! wins.

use thiserror::Error;

mod classifier;
pub use classifier::{Classifier, FilterHandle, ACC_FILTER_TABLESIZE, ACC_WILDCARD_INDEX};

mod filter;
pub use filter::FlowFilter;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Unsupported address family, filters must be IPv4 or IPv6")]
    UnsupportedFamily,
    #[error("Address family mismatch: {0}")]
    FamilyMismatch(&'static str),
    #[error("Invalid prefix length {len} for a {bits}-bit address")]
    InvalidPrefix { len: u8, bits: u8 },
    #[error("Filter not found")]
    FilterNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
