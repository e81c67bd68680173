//! Common utilities shared across the statspipe workspace.

#![warn(missing_docs)]

mod time;

pub use self::time::*;
