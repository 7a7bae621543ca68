//! Error types for usbforge
//!
//! Domain-specific error types using thiserror.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::orchestrator::BuildState;

/// Disk Image Service errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiskError {
    /// Backend tool is not installed
    #[error("'{tool}' not found in PATH. Install libguestfs-tools to build images")]
    ToolNotFound { tool: String },

    /// Backend process could not be started
    #[error("Failed to run '{command}': {error}")]
    Spawn { command: String, error: String },

    /// Backend operation reported a failure
    #[error("'{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Backend answered with something we could not interpret
    #[error("Unexpected response from disk service: {message}")]
    Protocol { message: String },

    /// Host-side IO error
    #[error("IO error for '{path}': {error}")]
    HostIo { path: PathBuf, error: String },

    /// Path does not exist inside the image
    #[error("No such file or directory in image: {path}")]
    NotFound { path: String },
}

/// Invalid or contradictory build plan
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    /// Create mode against an existing image without --force
    #[error("Output image '{path}' already exists. Use --force to overwrite it")]
    TargetExists { path: PathBuf },

    /// Update mode against a missing image
    #[error("Output image '{path}' does not exist. Use --create to build it first")]
    TargetMissing { path: PathBuf },

    /// Source ISO is required but missing
    #[error("Source image '{path}' does not exist")]
    SourceMissing { path: PathBuf },

    /// Image size out of range
    #[error("Image size must be greater than zero and at most {max_mb} MB (got {size_mb} MB)")]
    InvalidSize { size_mb: u64, max_mb: u64 },

    /// --edit and --sed counts differ
    #[error("Every --edit needs a matching --sed ({edits} edit paths, {seds} sed expressions)")]
    UnpairedEdit { edits: usize, seds: usize },

    /// Malformed edit expression
    #[error("Invalid edit for '{path}': {reason}")]
    InvalidEdit { path: String, reason: String },

    /// A required path argument was not given
    #[error("Missing required path: {what}")]
    MissingPath { what: String },
}

/// Fatal build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Plan rejected before any image mutation
    #[error("Configuration error: {0}")]
    Configuration(#[from] PlanError),

    /// A stage failed in the disk service
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: BuildState,
        #[source]
        source: DiskError,
    },

    /// Existing image is not a usable boot image
    #[error("Image '{path}' is not a valid boot image: {reason}")]
    InvalidImage { path: PathBuf, reason: String },

    /// Releasing the session failed after an otherwise successful build
    #[error("Cleanup failed: {0}")]
    Cleanup(DiskError),
}

impl BuildError {
    /// Stage the error is attributed to
    pub fn stage(&self) -> BuildState {
        match self {
            Self::Configuration(_) => BuildState::Init,
            Self::Stage { stage, .. } => *stage,
            Self::InvalidImage { .. } => BuildState::Partitioned,
            Self::Cleanup(_) => BuildState::CleanedUp,
        }
    }
}

/// Non-fatal conditions collected during a build
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    /// Volume label shortened to fit the filesystem
    #[error("Label '{original}' truncated to '{truncated}' ({max} characters max for {fstype})")]
    LabelTruncated {
        original: String,
        truncated: String,
        max: usize,
        fstype: String,
    },

    /// No line contained the match token
    #[error("No lines in '{path}' contain '{match_token}'")]
    PatchNotApplicable { path: String, match_token: String },

    /// Lines matched but none changed
    #[error("Lines in '{path}' matched '{match_token}' but '{search}' was not found")]
    NoReplacements {
        path: String,
        match_token: String,
        search: String,
    },

    /// A single copy directive failed
    #[error("Copy of '{source_path}' failed: {reason}")]
    CopyFailure { source_path: String, reason: String },

    /// A single edit directive failed
    #[error("Edit of '{path}' failed: {reason}")]
    EditFailure { path: String, reason: String },

    /// syslinux helper module absent on the host
    #[error("Syslinux module '{path}' not found, skipping")]
    MissingSyslinuxModule { path: PathBuf },

    /// Autolabel found several candidates
    #[error("Multiple labels found in bootloader config ({}); specify one with --label", candidates.join(", "))]
    AmbiguousLabel { candidates: Vec<String> },

    /// Expected entry absent from the source image root
    #[error("Expected '{entry}' in the source image root but it is missing")]
    MissingSourceEntry { entry: String },
}

impl BuildWarning {
    /// Whether this warning makes the overall build exit non-zero
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::CopyFailure { .. } | Self::EditFailure { .. })
    }
}
