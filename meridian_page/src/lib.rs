//! The columnar in-memory data model and its wire codec (§3, §4.1, §4.2):
//! [`block::Block`]/[`page::Page`] are built and sliced through
//! [`builder::BlockBuilder`], serialized by [`codec`], and optionally
//! spill-encrypted through [`cipher::SpillCipher`].

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod block;
pub mod builder;
pub mod cipher;
pub mod codec;
pub mod error;
pub mod null_mask;
pub mod page;
