//! The Driver and Driver Scheduler (§4.5): a [`Driver`] walks a linear chain
//! of [`meridian_operator::Operator`]s one quantum at a time; a
//! [`DriverScheduler`] holds the FIFO ready queue of Drivers across every
//! query running on a worker and maps them onto a shared thread pool via
//! [`executor::DedicatedExecutor`].
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

mod admission;
mod driver;
mod scheduler;

pub use admission::{AdmissionPolicy, Unrestricted};
pub use driver::{Driver, DriverState};
pub use scheduler::{DriverScheduler, DriverSchedulerConfig};
