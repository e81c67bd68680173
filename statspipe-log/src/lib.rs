//! Logging facade for statspipe.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The
//! configuration implements `serde` traits, so it can be obtained from
//! configuration files.
//!
//! ```
//! use statspipe_log::{LogConfig, LogFormat};
//!
//! let config = LogConfig {
//!     format: LogFormat::Json,
//!     ..LogConfig::default()
//! };
//! ```
//!
//! # Logging
//!
//! The basic use is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`], where `error!` represents the
//! highest-priority messages and `trace!` the lowest.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer
//! short and precise log messages over verbose text. Choose the log level
//! according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! # Testing
//!
//! For unit tests there is a separate initialization function [`init_test`]
//! that can be called at the beginning of a test. It is idempotent and
//! forwards output to the test writer.

#![warn(missing_docs)]

mod setup;
pub use setup::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
