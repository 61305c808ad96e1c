//! A Task's outbound Page queue, keyed by a per-client monotonic sequence
//! id (§4.7): the home for pages produced by a Task's terminal Output
//! operator until each downstream Exchange Client has pulled and
//! acknowledged them.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod buffer;
pub mod error;

pub use buffer::{GetResult, OutputBuffer, OutputBufferPolicy};
pub use error::OutputBufferError;
