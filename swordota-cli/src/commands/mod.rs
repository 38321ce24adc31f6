//! Command implementations.
//!
//! Each mode is implemented in its own module.

pub(crate) mod flash;
pub(crate) mod generate;
pub(crate) mod inspect;
