//! CLI command implementations
//!
//! Each mode is implemented in its own submodule.

pub mod build;
pub mod inspect;
