//! Host filesystem operations
//!
//! Moves host files and trees into the target image and manages host-side
//! image files.

use std::path::Path;

use crate::error::DiskError;
use crate::infra::disk::{join, DiskImageService};

fn host_io(path: &Path, error: impl ToString) -> DiskError {
    DiskError::HostIo {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

/// Remove an existing host file before it is recreated
pub fn remove_file(path: &Path) -> Result<(), DiskError> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| host_io(path, e))?;
    }
    Ok(())
}

/// Upload a host file or directory tree into `target_dir`
///
/// A file lands at `target_dir/<name>`; a directory is recreated as
/// `target_dir/<name>/...`. Returns the number of files uploaded.
pub fn upload<S: DiskImageService>(
    service: &mut S,
    host_path: &Path,
    target_dir: &str,
) -> Result<usize, DiskError> {
    let metadata = std::fs::metadata(host_path).map_err(|e| host_io(host_path, e))?;
    let name = host_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| host_io(host_path, "path has no file name"))?;
    let root = join(target_dir, &name);

    if metadata.is_file() {
        tracing::debug!("Uploading {} to {}", host_path.display(), root);
        service.copy_in(host_path, &root)?;
        return Ok(1);
    }

    let mut uploaded = 0;
    for entry in walkdir::WalkDir::new(host_path)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| host_io(host_path, e))?;
        let relative = entry
            .path()
            .strip_prefix(host_path)
            .map_err(|e| host_io(entry.path(), e))?;
        let target = join(&root, &relative.to_string_lossy());

        if entry.file_type().is_dir() {
            service.make_dir(&target)?;
        } else if entry.file_type().is_file() {
            tracing::debug!("Uploading {} to {}", entry.path().display(), target);
            service.copy_in(entry.path(), &target)?;
            uploaded += 1;
        }
    }

    Ok(uploaded)
}
