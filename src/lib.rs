//! usbforge - Bootable USB images from installer ISOs
//!
//! This library converts an isolinux-booted installer ISO into a raw disk
//! image that boots from USB through syslinux, and keeps such images up to
//! date.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Build planning, text patching and the build pipeline
//! - [`infra`] - Infrastructure layer (disk image backend, host files)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
