//! Metrics protocol and aggregation for statspipe.
//!
//! This crate implements the core of the pipeline:
//!
//!  - [`Message`]: the typed representation of one metric line, produced by
//!    the stateless [parser](Message::parse).
//!  - [`Bucket`]: the immutable snapshot of one aggregator's state for one
//!    flush round, shared read-only between all sinks.
//!  - [`MessageRouter`]: dispatches parsed messages to the aggregators
//!    registered for their kind.
//!  - [Aggregators](aggregate): per-kind accumulators with snapshot-and-clear
//!    flush semantics, each running in its own [`AggregatorService`] task.
//!  - [`IntervalService`]: the single clock source broadcasting flush ticks,
//!    with one shared epoch per round.
//!
//! # Concurrency
//!
//! Aggregator state is owned by a single task per aggregator. Producers only
//! pay for a channel send; the task serializes `Add` messages and flush
//! ticks, which makes the snapshot boundary atomic without locks: a message
//! lands deterministically either in the bucket being produced or in the
//! next one.

#![warn(missing_docs)]

pub mod aggregate;

mod bucket;
mod interval;
mod protocol;
mod router;
mod service;
mod statsd;

pub use self::bucket::*;
pub use self::interval::*;
pub use self::protocol::*;
pub use self::router::*;
pub use self::service::*;
