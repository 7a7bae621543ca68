//! Inspect mode
//!
//! Opens the target and/or source image read-only and shows one path: the
//! entries of a directory or the contents of a file. Nothing is written.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::orchestrator::{failed, BuildState};
use super::selection;
use super::session::BuildSession;
use crate::config::defaults::{SOURCE_MOUNT, TARGET_MOUNT};
use crate::error::{BuildError, DiskError, PlanError};
use crate::infra::disk::{Access, DiskImageService};

/// What to inspect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectRequest {
    /// Target image, mounted at `/usb`
    pub image_path: Option<PathBuf>,
    /// Source ISO, mounted at `/iso`
    pub source_image_path: Option<PathBuf>,
    /// Path to show
    pub path: String,
}

/// Contents of an inspected path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inspection {
    /// A directory and its entries
    Directory { path: String, entries: Vec<String> },
    /// A file and its text
    File { path: String, content: String },
}

impl InspectRequest {
    /// Images that exist on the host, with their mount points
    fn images(&self) -> Vec<(&Path, &'static str)> {
        [
            (self.image_path.as_deref(), TARGET_MOUNT),
            (self.source_image_path.as_deref(), SOURCE_MOUNT),
        ]
        .into_iter()
        .filter_map(|(path, mountpoint)| path.filter(|p| p.is_file()).map(|p| (p, mountpoint)))
        .collect()
    }

    /// Appliance path to show
    ///
    /// Paths already under `/usb` or `/iso` are kept; anything else is
    /// relative to the first attached image.
    fn resolve_path(&self, default_mount: &str) -> String {
        let path = self.path.as_str();
        let under = |mount: &str| path == mount || path.starts_with(&format!("{mount}/"));
        if under(TARGET_MOUNT) || under(SOURCE_MOUNT) {
            path.to_string()
        } else if default_mount == TARGET_MOUNT {
            selection::target_path(path)
        } else {
            crate::infra::disk::join(SOURCE_MOUNT, path)
        }
    }
}

/// Show a path inside the images
pub fn inspect<S, F>(request: &InspectRequest, start: F) -> Result<Inspection, BuildError>
where
    S: DiskImageService,
    F: FnOnce() -> Result<S, DiskError>,
{
    let images = request.images();
    let Some(&(_, first_mount)) = images.first() else {
        return Err(PlanError::MissingPath {
            what: "an existing image to inspect (-o or -i)".to_string(),
        }
        .into());
    };

    let service = start().map_err(failed(BuildState::Prepared))?;
    let mut session = BuildSession::new(service);
    let result = read_path(&mut session, &images, &request.resolve_path(first_mount));
    let cleanup = session.close();

    match (result, cleanup) {
        (Ok(inspection), Ok(())) => Ok(inspection),
        (Ok(_), Err(e)) => Err(BuildError::Cleanup(e)),
        (Err(e), cleanup) => {
            if let Err(cleanup_error) = cleanup {
                tracing::warn!("Cleanup after failed inspect also failed: {}", cleanup_error);
            }
            Err(e)
        }
    }
}

fn read_path<S: DiskImageService>(
    session: &mut BuildSession<S>,
    images: &[(&Path, &'static str)],
    path: &str,
) -> Result<Inspection, BuildError> {
    let prepare = failed(BuildState::Prepared);
    for (image, _) in images {
        tracing::debug!("Attaching {} read-only", image.display());
        session
            .service()
            .attach_image(image, Access::ReadOnly)
            .map_err(prepare)?;
    }
    session.service().launch().map_err(prepare)?;

    let mount = failed(BuildState::Mounted);
    let devices = session.service().list_devices().map_err(mount)?;
    let partitions = session.service().list_partitions().map_err(mount)?;
    for ((_, mountpoint), device) in images.iter().zip(devices) {
        // The target has one partition; the ISO filesystem sits on the whole device.
        let filesystem = if *mountpoint == TARGET_MOUNT {
            partitions
                .iter()
                .find(|p| p.starts_with(&device))
                .cloned()
                .unwrap_or(device)
        } else {
            device
        };
        session
            .mount(&filesystem, mountpoint, Access::ReadOnly)
            .map_err(mount)?;
    }

    if !session.service().exists(path).map_err(mount)? {
        return Err(mount(DiskError::NotFound {
            path: path.to_string(),
        }));
    }

    if session.service().is_dir(path).map_err(mount)? {
        let mut entries = session.service().list_directory(path).map_err(mount)?;
        entries.sort();
        Ok(Inspection::Directory {
            path: path.to_string(),
            entries,
        })
    } else {
        let bytes = session.service().read_file(path).map_err(mount)?;
        Ok(Inspection::File {
            path: path.to_string(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> InspectRequest {
        InspectRequest {
            image_path: None,
            source_image_path: None,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(request("/iso/isolinux").resolve_path(TARGET_MOUNT), "/iso/isolinux");
        assert_eq!(
            request("syslinux/syslinux.cfg").resolve_path(TARGET_MOUNT),
            "/usb/syslinux/syslinux.cfg"
        );
        assert_eq!(request("/").resolve_path(SOURCE_MOUNT), "/iso");
    }
}
