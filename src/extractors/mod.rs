//! Request extractors.

mod identity;
pub use identity::*;
