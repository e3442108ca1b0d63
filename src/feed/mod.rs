//! RSS/Atom ingestion: normalization and incremental diffing.
//!
//! This module family owns the real design decisions of the tool:
//!
//! - [`parser`] - Dialect detection (RSS 2.0 vs Atom 1.0) and per-dialect
//!   field extraction into the uniform [`model::Entry`] shape
//! - [`guid`] - The ordered identifier fallback chain that makes entries
//!   diffable even when feeds omit native guids
//! - [`diff`] - The watermark-based unseen-entry computation
//! - [`fetcher`] - Thin HTTP retrieval with a bounded timeout and size limit
//!
//! A [`model::Feed`] is built fresh each cycle and discarded after diffing;
//! only the per-feed watermark (owned by [`crate::store`]) crosses runs.

pub mod diff;
pub mod fetcher;
pub mod guid;
pub mod model;
pub mod parser;

pub use diff::{next_watermark, unseen, MissingId};
pub use fetcher::{fetch_document, FetchError};
pub use model::{Entry, Feed};
pub use parser::{parse, ParseError};
