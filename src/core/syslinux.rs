//! isolinux to syslinux conversion
//!
//! The source ISO boots through isolinux. A writable USB image needs the same
//! tree under `syslinux/`, a `syslinux.cfg`, the menu helper modules from the
//! host's syslinux install, the syslinux boot sector and a boot record.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::patch::LineEdit;
use super::session::BuildSession;
use crate::config::defaults::{
    ISOLINUX_CFG, ISOLINUX_DIR, SOURCE_MOUNT, SYSLINUX_CFG, SYSLINUX_DIR, SYSLINUX_MBR,
    SYSLINUX_MENU_MODULES, SYSLINUX_TARGET_DIR, TARGET_MOUNT,
};
use crate::error::{BuildWarning, DiskError};
use crate::infra::disk::{join, BootloaderInstall, DiskImageService};

/// Host-side syslinux files to install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyslinuxAssets {
    /// Directory containing the syslinux distribution
    pub dir: PathBuf,
    /// Boot record image, absolute or relative to `dir`
    pub mbr: String,
    /// Menu helper modules, relative to `dir`
    pub menu_modules: Vec<String>,
}

impl Default for SyslinuxAssets {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(SYSLINUX_DIR),
            mbr: SYSLINUX_MBR.to_string(),
            menu_modules: SYSLINUX_MENU_MODULES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl SyslinuxAssets {
    /// Use a different syslinux directory
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Host path of a file from the syslinux distribution
    pub fn file_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    /// Host path of the boot record image
    pub fn mbr_path(&self) -> PathBuf {
        self.file_path(&self.mbr)
    }

    /// Host paths of the menu modules
    pub fn module_paths(&self) -> Vec<PathBuf> {
        self.menu_modules.iter().map(|m| self.file_path(m)).collect()
    }
}

/// Target directory holding the converted bootloader
pub fn target_dir() -> String {
    join(TARGET_MOUNT, SYSLINUX_TARGET_DIR)
}

/// Path of the converted config on the target
pub fn target_config() -> String {
    join(&target_dir(), SYSLINUX_CFG)
}

/// Rewrites turning isolinux references into syslinux ones
pub fn conversion_edits() -> Vec<LineEdit> {
    vec![
        LineEdit::new("/isolinux/", "/isolinux/", "/syslinux/"),
        LineEdit::new(ISOLINUX_CFG, ISOLINUX_CFG, SYSLINUX_CFG),
    ]
}

/// Convert an isolinux config text to its syslinux form
pub fn convert_config(content: &str) -> String {
    conversion_edits()
        .iter()
        .fold(content.to_string(), |text, edit| edit.apply(&text).content)
}

/// Locate and read the bootloader config on the target
///
/// Prefers `syslinux/syslinux.cfg` and falls back to
/// `isolinux/isolinux.cfg`. Returns the path and its text.
pub fn find_config<S: DiskImageService>(
    session: &mut BuildSession<S>,
) -> Result<Option<(String, String)>, DiskError> {
    let candidates = [
        target_config(),
        join(&join(TARGET_MOUNT, ISOLINUX_DIR), ISOLINUX_CFG),
    ];

    for path in candidates {
        if session.service().exists(&path)? {
            let bytes = session.service().read_file(&path)?;
            return Ok(Some((path, String::from_utf8_lossy(&bytes).into_owned())));
        }
    }
    Ok(None)
}

/// Copy the isolinux tree as syslinux and make the target bootable
pub fn convert<S: DiskImageService>(
    session: &mut BuildSession<S>,
    assets: &SyslinuxAssets,
) -> Result<Vec<BuildWarning>, DiskError> {
    let mut warnings = Vec::new();
    let source_dir = join(SOURCE_MOUNT, ISOLINUX_DIR);
    let syslinux_dir = target_dir();

    if !session.service().is_dir(&source_dir)? {
        return Err(DiskError::NotFound { path: source_dir });
    }

    tracing::info!("Copying {} to {}", source_dir, syslinux_dir);
    session.service().make_dir(&syslinux_dir)?;
    for entry in session.service().list_directory(&source_dir)? {
        session
            .service()
            .copy_tree(&join(&source_dir, &entry), &syslinux_dir)?;
    }

    for module in assets.module_paths() {
        if !module.is_file() {
            tracing::warn!("Syslinux module {} not found", module.display());
            warnings.push(BuildWarning::MissingSyslinuxModule { path: module });
            continue;
        }
        let name = module
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::debug!("Uploading {}", module.display());
        session
            .service()
            .copy_in(&module, &join(&syslinux_dir, &name))?;
    }

    let mbr_host = assets.mbr_path();
    if !mbr_host.is_file() {
        return Err(DiskError::HostIo {
            path: mbr_host,
            error: "syslinux boot record not found".to_string(),
        });
    }
    let mbr = join(&syslinux_dir, SYSLINUX_MBR);
    session.service().copy_in(&mbr_host, &mbr)?;

    let isolinux_cfg = join(&syslinux_dir, ISOLINUX_CFG);
    let content = session.service().read_file(&isolinux_cfg)?;
    let converted = convert_config(&String::from_utf8_lossy(&content));
    session
        .service()
        .write_file(&target_config(), converted.as_bytes())?;

    let install = BootloaderInstall {
        device: session.target_device()?.to_string(),
        partition: session.target_partition()?.to_string(),
        mountpoint: TARGET_MOUNT.to_string(),
        directory: format!("/{SYSLINUX_TARGET_DIR}"),
        mbr,
    };
    tracing::info!("Installing syslinux on {}", install.partition);
    session.service().install_bootloader(&install)?;

    Ok(warnings)
}
