//! In-worker redistribution of Pages between pipelines (§4.6): passthrough,
//! round-robin, hash-partitioned, and scale-writer local exchanges, all
//! built on the same memory-accounted [`Pipe`](pipe::Pipe).

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

mod pipe;

pub mod partitioned;
pub mod passthrough;
pub mod round_robin;
pub mod scale_writer;
