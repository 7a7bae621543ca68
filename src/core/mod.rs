//! Core business logic module
//!
//! Pure text and planning logic plus the build pipeline. Every disk
//! operation goes through [`crate::infra::disk::DiskImageService`].
//!
//! # Submodules
//!
//! - [`patch`] - Line-oriented text patching
//! - [`label`] - Volume label derivation and config rewriting
//! - [`selection`] - Copy source resolution
//! - [`profile`] - Named build presets
//! - [`plan`] - Build plan construction and preflight checks
//! - [`syslinux`] - isolinux to syslinux conversion
//! - [`session`] - Build session with guaranteed release
//! - [`orchestrator`] - Build state machine
//! - [`inspect`] - Read-only image inspection
//! - [`global_config`] - Global configuration management

pub mod global_config;
pub mod inspect;
pub mod label;
pub mod orchestrator;
pub mod patch;
pub mod plan;
pub mod profile;
pub mod selection;
pub mod session;
pub mod syslinux;
