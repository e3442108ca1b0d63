//! feedmail: delivers unseen RSS/Atom entries as email.
//!
//! The core of the crate is the [`feed`] module family — dialect detection,
//! field-extraction fallback, and watermark-based incremental sync. The
//! [`store`] holds the per-feed watermark in an OPML file, [`deliver`] pipes
//! rendered messages to a sendmail-compatible command, and [`pipeline`] wires
//! the pieces together one feed at a time.

pub mod config;
pub mod deliver;
pub mod feed;
pub mod pipeline;
pub mod store;
pub mod util;
