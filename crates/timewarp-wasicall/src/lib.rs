//! Recording and replaying WASI system calls.
//!
//! A guest's host-call dispatcher talks to a [`System`](timewarp_core::System).
//! This crate provides two decorators with the same interface:
//!
//! - [`Recorder`] forwards calls to a live system and appends one record
//!   per call to a log
//! - [`Replay`] answers calls from a recording and detects when the guest
//!   stops following it
//!
//! plus readers that interpret a recording after the fact:
//! [`StdioReader`] for guest output and [`ExchangeReader`] for
//! request/response pairs.
//!
//! # Call payload
//!
//! ```text
//! [params_len u32] [params] [tag u8] [value | errno u16]
//! ```
//!
//! See [`call`] for the value encoding.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod call;
pub mod error;
pub mod exchange;
pub mod recorder;
pub mod replay;
pub mod stdio;

pub use call::{Decode, DecodeError, Encode};
pub use error::{RecordError, ReplayError};
pub use exchange::{Exchange, ExchangeReader, Message, Request, Response};
pub use recorder::{RecordSink, Recorder};
pub use replay::{Replay, ReplayState};
pub use stdio::StdioReader;
