//! Pipeline assembly and output stage for statspipe.
//!
//! This crate wires the parsing and aggregation services from
//! `statspipe-metrics` into a running [`Pipeline`], fans finished buckets out
//! to every configured [`Sink`], and implements the bundled sinks: console
//! output and TCP forwarding to a peer instance using a length-prefixed,
//! optionally gzip-compressed frame protocol.
//!
//! Shutdown is a cascade of closing inboxes: dropping the pipeline handle
//! drains the parser, which closes the aggregators, whose final buckets reach
//! the broadcaster before it completes each sink in turn. No admitted line is
//! lost.

#![warn(missing_docs)]

pub mod codec;
pub mod sinks;

mod pipeline;
mod service;
mod sink;
mod statsd;

pub use self::pipeline::*;
pub use self::service::*;
pub use self::sink::*;
