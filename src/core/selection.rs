//! File selection policy
//!
//! Decides where each copy directive reads from and where it lands on the
//! target.

use std::path::PathBuf;

use super::plan::CopySpec;
use crate::config::defaults::{ISOLINUX_DIR, SOURCE_MOUNT, TARGET_MOUNT};
use crate::infra::disk::{join, parent};

/// Where a copied file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// The invoking host's filesystem
    HostFs,
    /// The mounted source ISO
    SourceImageFs,
}

/// A copy directive resolved to its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// Origin filesystem
    pub origin: Origin,
    /// Path within the origin (relative to the ISO root for image paths)
    pub path: String,
}

impl ResolvedSource {
    /// Host path, resolved against the working directory by the OS
    pub fn host_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// Appliance path of an image-origin entry
    pub fn appliance_path(&self) -> String {
        join(SOURCE_MOUNT, &self.path)
    }

    /// Target directory that receives the copy
    ///
    /// Image paths keep their directory structure (`images/pxeboot` lands
    /// in `/usb/images`); host paths land in the target root.
    pub fn destination_dir(&self) -> String {
        match self.origin {
            Origin::HostFs => TARGET_MOUNT.to_string(),
            Origin::SourceImageFs => parent(&join(TARGET_MOUNT, &self.path)),
        }
    }
}

/// Resolve the origin of a copy directive
pub fn resolve_source(spec: &CopySpec) -> ResolvedSource {
    if spec.is_host_path {
        let path = spec
            .source_path
            .strip_prefix("./")
            .unwrap_or(&spec.source_path);
        ResolvedSource {
            origin: Origin::HostFs,
            path: path.to_string(),
        }
    } else {
        ResolvedSource {
            origin: Origin::SourceImageFs,
            path: spec.source_path.trim_matches('/').to_string(),
        }
    }
}

/// Top-level source entries copied by a bulk copy
///
/// Everything except the isolinux directory, which bootloader conversion
/// owns.
pub fn bulk_entries(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.as_str() != ISOLINUX_DIR && !e.is_empty())
        .cloned()
        .collect()
}

/// Normalize an edit target to an appliance path under the target mount
pub fn target_path(path: &str) -> String {
    let prefix = format!("{TARGET_MOUNT}/");
    if path.starts_with(&prefix) || path == TARGET_MOUNT {
        path.to_string()
    } else {
        join(TARGET_MOUNT, path)
    }
}
