//! An [`Operator`] is a polymorphic value producing/consuming stage in a
//! [`Driver`](https://docs.rs/meridian_driver)'s pipeline (§4.4). The
//! variant set named in §4.4 is implemented as a closed `enum` dispatched
//! through a single `match` (§9: "deep interface hierarchies → closed
//! tagged variants with dispatched methods"), with a `Other(Box<dyn
//! OperatorLogic>)` escape hatch for connector-supplied operators whose
//! concrete type the core cannot enumerate ahead of time.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

mod pageutil;
pub mod operator;
pub mod processor;
pub mod variants;

pub use operator::{Operator, OperatorLogic};
pub use processor::{ClosurePageProcessor, ClosureRowProcessor, CompiledPageProcessor, CompiledRowProcessor, ProcessorError};
