//! libguestfs backend
//!
//! Drives a `guestfish --listen` server through `guestfish --remote`
//! invocations. Each call is one guestfish command and blocks until the
//! appliance has executed it.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::defaults::{MBR_BOOT_CODE_SIZE, PARTITION_START_SECTOR};
use crate::error::DiskError;
use crate::infra::disk::{Access, BootloaderInstall, DiskImageService};

const GUESTFISH: &str = "guestfish";
const PID_VAR: &str = "GUESTFISH_PID=";

/// Extract the server pid from `guestfish --listen` output
pub fn parse_pid(output: &str) -> Option<u32> {
    let start = output.find(PID_VAR)? + PID_VAR.len();
    let digits: String = output[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn parse_bool(command: &str, output: &str) -> Result<bool, DiskError> {
    match output.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(DiskError::Protocol {
            message: format!("'{command}' returned '{other}', expected true or false"),
        }),
    }
}

/// Disk Image Service backed by a guestfish server process
#[derive(Debug)]
pub struct GuestfishService {
    program: PathBuf,
    pid: u32,
    drives: usize,
    mountpoints: HashSet<String>,
    closed: bool,
}

impl GuestfishService {
    /// Start a guestfish server
    ///
    /// # Errors
    ///
    /// Returns `DiskError::ToolNotFound` when guestfish is not installed.
    pub fn start() -> Result<Self, DiskError> {
        let program = which::which(GUESTFISH).map_err(|_| DiskError::ToolNotFound {
            tool: GUESTFISH.to_string(),
        })?;

        tracing::debug!("Starting {} --listen", program.display());
        let output = Command::new(&program)
            .arg("--listen")
            .output()
            .map_err(|e| DiskError::Spawn {
                command: format!("{GUESTFISH} --listen"),
                error: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(DiskError::CommandFailed {
                command: format!("{GUESTFISH} --listen"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pid = parse_pid(&stdout).ok_or_else(|| DiskError::Protocol {
            message: format!("no {PID_VAR} in '{}'", stdout.trim()),
        })?;
        tracing::debug!("guestfish server running as pid {}", pid);

        Ok(Self {
            program,
            pid,
            drives: 0,
            mountpoints: HashSet::new(),
            closed: false,
        })
    }

    /// Run one guestfish command on the server
    fn call(&mut self, args: &[&str]) -> Result<String, DiskError> {
        let command = args.join(" ");
        tracing::debug!("guestfish: {}", command);

        let output = Command::new(&self.program)
            .arg(format!("--remote={}", self.pid))
            .arg("--")
            .args(args)
            .output()
            .map_err(|e| DiskError::Spawn {
                command: command.clone(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(DiskError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn call_bool(&mut self, args: &[&str]) -> Result<bool, DiskError> {
        let output = self.call(args)?;
        parse_bool(args[0], &output)
    }
}

fn host_str(path: &Path) -> String {
    path.display().to_string()
}

fn scratch_error(error: impl ToString) -> DiskError {
    DiskError::HostIo {
        path: std::env::temp_dir(),
        error: error.to_string(),
    }
}

impl DiskImageService for GuestfishService {
    fn create_image(&mut self, path: &Path, size_mb: u64) -> Result<(), DiskError> {
        let bytes = size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| DiskError::Protocol {
                message: format!("image size of {size_mb} MB does not fit in a byte count"),
            })?
            .to_string();
        self.call(&["disk-create", &host_str(path), "raw", &bytes])?;
        Ok(())
    }

    fn attach_image(&mut self, path: &Path, access: Access) -> Result<usize, DiskError> {
        let readonly = format!("readonly:{}", flag(access.is_read_only()));
        self.call(&["add-drive", &host_str(path), "format:raw", &readonly])?;
        self.drives += 1;
        Ok(self.drives - 1)
    }

    fn launch(&mut self) -> Result<(), DiskError> {
        self.call(&["run"])?;
        Ok(())
    }

    fn list_devices(&mut self) -> Result<Vec<String>, DiskError> {
        Ok(lines(&self.call(&["list-devices"])?))
    }

    fn list_partitions(&mut self) -> Result<Vec<String>, DiskError> {
        Ok(lines(&self.call(&["list-partitions"])?))
    }

    fn create_partition_table(&mut self, device: &str) -> Result<String, DiskError> {
        self.call(&["part-init", device, "mbr"])?;
        let start = PARTITION_START_SECTOR.to_string();
        self.call(&["part-add", device, "p", &start, "-1"])?;

        self.list_partitions()?
            .into_iter()
            .find(|p| p.starts_with(device))
            .ok_or_else(|| DiskError::Protocol {
                message: format!("no partition on {device} after part-add"),
            })
    }

    fn set_bootable(&mut self, device: &str, index: u32, bootable: bool) -> Result<(), DiskError> {
        let index = index.to_string();
        self.call(&["part-set-bootable", device, &index, flag(bootable)])?;
        Ok(())
    }

    fn is_bootable(&mut self, device: &str, index: u32) -> Result<bool, DiskError> {
        let index = index.to_string();
        self.call_bool(&["part-get-bootable", device, &index])
    }

    fn format_filesystem(&mut self, partition: &str, fstype: &str) -> Result<(), DiskError> {
        self.call(&["mkfs", fstype, partition])?;
        Ok(())
    }

    fn filesystem_type(&mut self, device: &str) -> Result<String, DiskError> {
        Ok(self.call(&["vfs-type", device])?.trim().to_string())
    }

    fn mount(&mut self, device: &str, mountpoint: &str, access: Access) -> Result<(), DiskError> {
        if !self.mountpoints.contains(mountpoint) {
            self.call(&["mkmountpoint", mountpoint])?;
            self.mountpoints.insert(mountpoint.to_string());
        }
        let command = if access.is_read_only() {
            "mount-ro"
        } else {
            "mount"
        };
        self.call(&[command, device, mountpoint])?;
        Ok(())
    }

    fn unmount(&mut self, mountpoint: &str) -> Result<(), DiskError> {
        self.call(&["umount", mountpoint])?;
        Ok(())
    }

    fn copy_in(&mut self, host_path: &Path, target_path: &str) -> Result<(), DiskError> {
        self.call(&["upload", &host_str(host_path), target_path])?;
        Ok(())
    }

    fn copy_out(&mut self, source_path: &str, host_path: &Path) -> Result<(), DiskError> {
        self.call(&["download", source_path, &host_str(host_path)])?;
        Ok(())
    }

    fn copy_tree(&mut self, source: &str, target_dir: &str) -> Result<(), DiskError> {
        self.call(&["cp-a", source, target_dir])?;
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, DiskError> {
        let scratch = tempfile::NamedTempFile::new().map_err(scratch_error)?;
        self.copy_out(path, scratch.path())?;
        std::fs::read(scratch.path()).map_err(|e| DiskError::HostIo {
            path: scratch.path().to_path_buf(),
            error: e.to_string(),
        })
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), DiskError> {
        let mut scratch = tempfile::NamedTempFile::new().map_err(scratch_error)?;
        scratch
            .write_all(content)
            .and_then(|()| scratch.flush())
            .map_err(scratch_error)?;
        self.copy_in(scratch.path(), path)
    }

    fn list_directory(&mut self, path: &str) -> Result<Vec<String>, DiskError> {
        Ok(lines(&self.call(&["ls", path])?))
    }

    fn exists(&mut self, path: &str) -> Result<bool, DiskError> {
        self.call_bool(&["exists", path])
    }

    fn is_dir(&mut self, path: &str) -> Result<bool, DiskError> {
        self.call_bool(&["is-dir", path])
    }

    fn make_dir(&mut self, path: &str) -> Result<(), DiskError> {
        self.call(&["mkdir-p", path])?;
        Ok(())
    }

    fn install_bootloader(&mut self, install: &BootloaderInstall) -> Result<(), DiskError> {
        let size = format!("size:{MBR_BOOT_CODE_SIZE}");
        self.call(&["copy-file-to-device", &install.mbr, &install.device, &size])?;

        // syslinux needs the filesystem unmounted
        self.unmount(&install.mountpoint)?;
        let directory = format!("directory:{}", install.directory);
        self.call(&["syslinux", &install.partition, &directory])?;
        self.call(&["mount", &install.partition, &install.mountpoint])?;
        Ok(())
    }

    fn read_volume_label(&mut self, device: &str) -> Result<String, DiskError> {
        Ok(self
            .call(&["vfs-label", device])?
            .trim_end_matches(['\n', '\r'])
            .to_string())
    }

    fn set_volume_label(&mut self, partition: &str, label: &str) -> Result<(), DiskError> {
        self.call(&["set-label", partition, label])?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DiskError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let shutdown = self.call(&["shutdown"]);
        self.call(&["exit"])?;
        shutdown.map(|_| ())
    }
}

impl Drop for GuestfishService {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.call(&["exit"]);
        }
    }
}
