//! Disk Image Service interface
//!
//! Primitive operations on raw disk images and the filesystems inside them.
//! Paths given to the service are appliance paths: filesystems are visible
//! under the mount point they were mounted at (for example `/usb/syslinux`).
//! Device names follow the `/dev/sdX` convention with partitions `/dev/sdXN`.

use std::path::Path;

use crate::error::DiskError;

/// Access mode for attached images and mounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Writable
    ReadWrite,
    /// Never written
    ReadOnly,
}

impl Access {
    /// Whether writes are refused
    pub fn is_read_only(self) -> bool {
        self == Self::ReadOnly
    }
}

/// Parameters for installing the syslinux boot loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderInstall {
    /// Whole-disk device receiving the boot record
    pub device: String,
    /// Partition receiving the syslinux boot sector
    pub partition: String,
    /// Where the partition is currently mounted
    pub mountpoint: String,
    /// Directory holding syslinux files, relative to the partition root
    pub directory: String,
    /// Boot record image already present inside the appliance
    pub mbr: String,
}

/// Operations the build needs from a disk image backend
///
/// Every call blocks until the backend has finished the operation.
pub trait DiskImageService {
    /// Create a sparse raw image file on the host
    fn create_image(&mut self, path: &Path, size_mb: u64) -> Result<(), DiskError>;

    /// Attach an image file, returning its drive index
    fn attach_image(&mut self, path: &Path, access: Access) -> Result<usize, DiskError>;

    /// Start the backend once all images are attached
    fn launch(&mut self) -> Result<(), DiskError>;

    /// Whole-disk devices, in attach order
    fn list_devices(&mut self) -> Result<Vec<String>, DiskError>;

    /// All partitions across every device
    fn list_partitions(&mut self) -> Result<Vec<String>, DiskError>;

    /// Write an MBR table with one primary partition spanning the disk
    ///
    /// Returns the new partition's device name.
    fn create_partition_table(&mut self, device: &str) -> Result<String, DiskError>;

    /// Set or clear the bootable flag of partition `index` (1-based)
    fn set_bootable(&mut self, device: &str, index: u32, bootable: bool) -> Result<(), DiskError>;

    /// Read the bootable flag of partition `index` (1-based)
    fn is_bootable(&mut self, device: &str, index: u32) -> Result<bool, DiskError>;

    /// Create a filesystem on a partition
    fn format_filesystem(&mut self, partition: &str, fstype: &str) -> Result<(), DiskError>;

    /// Filesystem type on a device, empty when unformatted
    fn filesystem_type(&mut self, device: &str) -> Result<String, DiskError>;

    /// Mount a device, creating the mount point when needed
    fn mount(&mut self, device: &str, mountpoint: &str, access: Access) -> Result<(), DiskError>;

    /// Unmount a mount point
    fn unmount(&mut self, mountpoint: &str) -> Result<(), DiskError>;

    /// Upload a single host file to `target_path`
    fn copy_in(&mut self, host_path: &Path, target_path: &str) -> Result<(), DiskError>;

    /// Download a single file to the host
    fn copy_out(&mut self, source_path: &str, host_path: &Path) -> Result<(), DiskError>;

    /// Recursively copy `source` into `target_dir`, preserving attributes
    ///
    /// Follows `cp -a`: when `target_dir` is an existing directory the copy
    /// lands at `target_dir/<basename of source>`.
    fn copy_tree(&mut self, source: &str, target_dir: &str) -> Result<(), DiskError>;

    /// Read a whole file
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, DiskError>;

    /// Replace a file's contents
    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), DiskError>;

    /// Entry names directly inside a directory
    fn list_directory(&mut self, path: &str) -> Result<Vec<String>, DiskError>;

    /// Whether a path exists
    fn exists(&mut self, path: &str) -> Result<bool, DiskError>;

    /// Whether a path is a directory
    fn is_dir(&mut self, path: &str) -> Result<bool, DiskError>;

    /// Create a directory and its parents
    fn make_dir(&mut self, path: &str) -> Result<(), DiskError>;

    /// Install the syslinux boot sector and boot record
    fn install_bootloader(&mut self, install: &BootloaderInstall) -> Result<(), DiskError>;

    /// Volume label of a device's filesystem
    fn read_volume_label(&mut self, device: &str) -> Result<String, DiskError>;

    /// Set the volume label of a partition's filesystem
    fn set_volume_label(&mut self, partition: &str, label: &str) -> Result<(), DiskError>;

    /// Flush and shut the backend down
    fn close(&mut self) -> Result<(), DiskError>;
}

/// Partition number of a partition device name (`/dev/sda1` -> 1)
pub fn partition_index(partition: &str) -> Option<u32> {
    let digits = partition
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .count();
    partition[partition.len() - digits..].parse().ok()
}

/// Join an appliance directory and a relative path
pub fn join(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        dir.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent directory of an appliance path
pub fn parent(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}
