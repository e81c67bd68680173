//! Foundational system components for statspipe's services.
//!
//! Services are much like actors: they receive messages from an inbox and
//! handle them one by one on a dedicated task. The [`Addr`] of a service
//! allows sending messages to it; dropping every `Addr` closes the inbox,
//! which is how completion propagates through the pipeline during shutdown.
//!
//! The [`Controller`] owns the process-wide cooperative shutdown signal.

#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
