//! Test utilities and mock systems for Timewarp development.
//!
//! Provides a deterministic in-memory [`MockSystem`] implementing the
//! full call surface, plus record fixtures and failing I/O sinks for
//! exercising error paths.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
pub mod system;

pub use fixtures::{records, segment, FailingWriter};
pub use system::{MockSystem, CLOCK_STEP, ROOT_FD};
