//! Infrastructure layer
//!
//! Handles all I/O operations: the disk image backend and host files.
//! This module is the only place where side effects occur.

pub mod disk;
pub mod filesystem;
pub mod guestfish;
