//! Build session
//!
//! Owns the Disk Image Service handle and every mount made during one
//! build. Resources are released by [`BuildSession::close`]; if a session is
//! dropped without being closed (for example while unwinding), `Drop`
//! releases them on a best-effort basis.

use serde::Serialize;

use super::label::AppliedLabel;
use super::orchestrator::BuildState;
use crate::error::DiskError;
use crate::infra::disk::{Access, DiskImageService};

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage did its work
    Completed,
    /// Stage was not applicable to this plan
    Skipped,
}

/// One entry of the stage log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    /// Stage that was entered
    pub stage: BuildState,
    /// Outcome
    pub status: StageStatus,
}

/// Mutable state of a single build
pub struct BuildSession<S: DiskImageService> {
    service: S,
    target_device: Option<String>,
    target_partition: Option<String>,
    source_device: Option<String>,
    mounts: Vec<String>,
    label: Option<AppliedLabel>,
    stages: Vec<StageRecord>,
    closed: bool,
}

impl<S: DiskImageService> BuildSession<S> {
    /// Take ownership of a started service
    pub fn new(service: S) -> Self {
        Self {
            service,
            target_device: None,
            target_partition: None,
            source_device: None,
            mounts: Vec::new(),
            label: None,
            stages: Vec::new(),
            closed: false,
        }
    }

    /// The underlying service
    pub fn service(&mut self) -> &mut S {
        &mut self.service
    }

    /// Record the target's whole-disk device
    pub fn set_target_device(&mut self, device: String) {
        self.target_device = Some(device);
    }

    /// Record the target partition
    pub fn set_target_partition(&mut self, partition: String) {
        self.target_partition = Some(partition);
    }

    /// Record the source ISO device
    pub fn set_source_device(&mut self, device: String) {
        self.source_device = Some(device);
    }

    /// Target whole-disk device
    pub fn target_device(&self) -> Result<&str, DiskError> {
        self.target_device.as_deref().ok_or_else(|| DiskError::Protocol {
            message: "target image is not attached".to_string(),
        })
    }

    /// Target partition
    pub fn target_partition(&self) -> Result<&str, DiskError> {
        self.target_partition
            .as_deref()
            .ok_or_else(|| DiskError::Protocol {
                message: "target partition is not known".to_string(),
            })
    }

    /// Source ISO device, when one is attached
    pub fn source_device(&self) -> Option<&str> {
        self.source_device.as_deref()
    }

    /// Mount a device and remember the mount point for release
    pub fn mount(&mut self, device: &str, mountpoint: &str, access: Access) -> Result<(), DiskError> {
        if self.is_mounted(mountpoint) {
            return Ok(());
        }
        tracing::debug!("Mounting {} at {}", device, mountpoint);
        self.service.mount(device, mountpoint, access)?;
        self.mounts.push(mountpoint.to_string());
        Ok(())
    }

    /// Whether a mount point is held by this session
    pub fn is_mounted(&self, mountpoint: &str) -> bool {
        self.mounts.iter().any(|m| m == mountpoint)
    }

    /// Remember the label that was applied
    pub fn set_label(&mut self, label: AppliedLabel) {
        self.label = Some(label);
    }

    /// Label applied during this session
    pub fn label(&self) -> Option<&AppliedLabel> {
        self.label.as_ref()
    }

    /// Append to the stage log
    pub fn record(&mut self, stage: BuildState, status: StageStatus) {
        self.stages.push(StageRecord { stage, status });
    }

    /// Stage log so far
    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Unmount everything (most recent first) and close the service
    ///
    /// Every release step is attempted even after a failure; the first
    /// error is returned. Calling this twice is harmless.
    pub fn close(&mut self) -> Result<(), DiskError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        while let Some(mountpoint) = self.mounts.pop() {
            tracing::debug!("Unmounting {}", mountpoint);
            if let Err(e) = self.service.unmount(&mountpoint) {
                tracing::warn!("Failed to unmount {}: {}", mountpoint, e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.service.close() {
            tracing::warn!("Failed to close disk service: {}", e);
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: DiskImageService> Drop for BuildSession<S> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
