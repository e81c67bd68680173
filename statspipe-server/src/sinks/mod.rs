//! Bundled sink implementations.

mod console;
mod forward;

pub use self::console::*;
pub use self::forward::*;
