//! Default configuration values

/// Default image size in megabytes
pub const DEFAULT_IMAGE_SIZE_MB: u64 = 12 * 1024;

/// Largest image an MBR partition table can address (2 TiB of 512-byte sectors)
pub const MAX_IMAGE_SIZE_MB: u64 = 2 * 1024 * 1024;

/// Default target filesystem
pub const DEFAULT_FSTYPE: &str = "vfat";

/// Host directory holding the syslinux distribution files
pub const SYSLINUX_DIR: &str = "/usr/share/syslinux";

/// Boot sector image shipped with syslinux
pub const SYSLINUX_MBR: &str = "mbr.bin";

/// Helper modules needed for the graphical boot menu
pub const SYSLINUX_MENU_MODULES: &[&str] =
    &["vesamenu.c32", "libcom32.c32", "libutil.c32", "menu.c32"];

/// Bytes of boot code at the start of the disk
pub const MBR_BOOT_CODE_SIZE: u64 = 440;

/// First sector of the single primary partition
pub const PARTITION_START_SECTOR: i64 = 2048;

/// Mount point of the target partition
pub const TARGET_MOUNT: &str = "/usb";

/// Mount point of the source ISO
pub const SOURCE_MOUNT: &str = "/iso";

/// Bootloader directory on the source ISO
pub const ISOLINUX_DIR: &str = "isolinux";

/// Bootloader directory on the target partition
pub const SYSLINUX_TARGET_DIR: &str = "syslinux";

/// Config file name inside the isolinux directory
pub const ISOLINUX_CFG: &str = "isolinux.cfg";

/// Config file name inside the syslinux directory
pub const SYSLINUX_CFG: &str = "syslinux.cfg";

/// Directory name under the user config dir
pub const CONFIG_DIR_NAME: &str = "usbforge";

/// Global configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Copy directive naming the source ISO file itself
pub const ISOFILE_DIRECTIVE: &str = ":isofile";

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;
