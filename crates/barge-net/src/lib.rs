//! # Barge Net
//!
//! Event plumbing for the barge transfer system.
//!
//! This crate provides:
//! - A resynchronizing per-connection frame accumulator
//! - A `poll(2)`-driven readiness loop over pluggable handles
//! - Connections and the listening socket
//! - A signal watch that turns termination signals into a pollable flag
//! - The request broker: a FIFO queue drained by a fixed worker pool
//!
//! One thread runs the readiness loop and does all reading, framing and
//! decoding; everything blocking (file I/O, hashing, socket writes)
//! happens on the broker's workers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod conn;
pub mod error;
pub mod framing;
pub mod listener;
pub mod poll;
pub mod request;
pub mod signal;
mod sockopt;

pub use broker::{Broker, RequestHandler};
pub use conn::Connection;
pub use error::NetError;
pub use framing::FrameAccumulator;
pub use listener::{Listener, DEFAULT_PORT};
pub use poll::{PollGroup, Pollable};
pub use request::Request;
pub use signal::SignalWatch;
