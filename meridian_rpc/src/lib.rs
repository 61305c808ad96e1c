//! Identity types and the named external-collaborator traits from §6:
//! `SplitSource`, `ConnectorPageSource`, `ConnectorPageSink`,
//! `WorkerTaskApi`, `CoordinatorQueryApi`. The wire-level resource layer
//! that would implement these over HTTP is explicitly out of scope (§1);
//! this crate exists so the rest of the core has a stable, dependency-free
//! seam to program against instead of a direct dependency on a connector or
//! resource-layer crate.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod ids;
pub mod split;
pub mod traits;
