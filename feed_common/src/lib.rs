//!
//! Common types shared by the feed server and any future tooling.
//!
//! This crate aggregates:
//! - `error` — unified error type `FeedError` used across the workspace.
//! - `result` — handy `Result<T, FeedError>` alias.
//! - `instruments` — the fixed set of tracked market indices together with
//!   the identifiers each upstream provider expects for them.
#![warn(missing_docs)]
pub mod error;
pub mod result;
pub mod instruments;

pub use error::FeedError;
pub use result::Result;
pub use instruments::Instrument;
