//! Configuration for the statspipe CLI and server.
//!
//! Only the values consumed by the pipeline core are modeled here: flush
//! cadence, per-aggregator namespaces and tuning knobs, and sink settings.
//! Loading uses YAML; every section has defaults so a missing or partial
//! file yields a working console-only pipeline.

#![warn(missing_docs)]

mod config;

pub use self::config::*;
