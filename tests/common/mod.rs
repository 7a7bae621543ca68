//! Common test utilities and helpers
//!
//! This module provides an in-memory Disk Image Service for integration
//! tests. Images live in a shared [`World`] so that a later service
//! instance (an update run) sees what an earlier one (a create run) wrote.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use usbforge::core::syslinux::SyslinuxAssets;
use usbforge::error::DiskError;
use usbforge::infra::disk::{Access, BootloaderInstall, DiskImageService};

/// A node in a fake filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(Vec<u8>),
}

fn norm(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn base(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn child_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// An in-memory filesystem
#[derive(Debug, Clone, Default)]
pub struct FakeFs {
    pub fstype: String,
    pub label: String,
    pub nodes: BTreeMap<String, Node>,
}

impl FakeFs {
    /// Empty filesystem
    pub fn new(fstype: &str, label: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            fstype: fstype.to_string(),
            label: label.to_string(),
            nodes,
        }
    }

    /// Add a file, creating its parents
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        let path = norm(path);
        self.mkdir_p(&parent_of(&path));
        self.nodes.insert(path, Node::File(content.as_bytes().to_vec()));
        self
    }

    /// Add a directory and its parents
    pub fn with_dir(mut self, path: &str) -> Self {
        self.mkdir_p(&norm(path));
        self
    }

    fn mkdir_p(&mut self, path: &str) {
        let mut current = String::new();
        self.nodes.insert("/".to_string(), Node::Dir);
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            self.nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(&norm(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.get(path) == Some(&Node::Dir)
    }

    /// File contents as text
    pub fn read(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Node::File(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Node::Dir => None,
        }
    }

    /// Names directly inside a directory
    pub fn children(&self, dir: &str) -> Vec<String> {
        let dir = norm(dir);
        self.nodes
            .keys()
            .filter(|k| k.as_str() != "/" && parent_of(k) == dir)
            .map(|k| base(k).to_string())
            .collect()
    }

    fn subtree(&self, root: &str) -> Vec<(String, Node)> {
        let prefix = if root == "/" {
            "/".to_string()
        } else {
            format!("{root}/")
        };
        self.nodes
            .iter()
            .filter(|(k, _)| k.as_str() == root || k.starts_with(&prefix))
            .map(|(k, v)| (k[root.len()..].to_string(), v.clone()))
            .collect()
    }
}

/// A target partition
#[derive(Debug, Clone, Default)]
pub struct FakePartition {
    pub bootable: bool,
    pub fs: Option<FakeFs>,
}

/// A disk image file
#[derive(Debug, Clone, Default)]
pub struct FakeImage {
    /// Single partition (target images)
    pub partition: Option<FakePartition>,
    /// Whole-device filesystem (ISOs)
    pub filesystem: Option<FakeFs>,
    /// Boot code written to the start of the disk
    pub mbr: Option<Vec<u8>>,
    /// Directory syslinux was installed with
    pub syslinux_dir: Option<String>,
}

/// Every image the fake knows about, plus a log of calls
#[derive(Debug, Default)]
pub struct World {
    pub images: HashMap<PathBuf, FakeImage>,
    pub calls: Vec<String>,
    pub failures: Vec<(String, String)>,
    pub closed: usize,
    pub mounts_at_close: Vec<usize>,
}

pub type SharedWorld = Arc<Mutex<World>>;

impl World {
    /// Fresh shared world
    pub fn shared() -> SharedWorld {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Register an ISO (and create its host file)
    pub fn add_iso(&mut self, path: &Path, fs: FakeFs) {
        std::fs::write(path, b"iso").expect("Failed to write ISO placeholder");
        self.images.insert(
            path.to_path_buf(),
            FakeImage {
                filesystem: Some(fs),
                ..FakeImage::default()
            },
        );
    }

    /// Make every call to `op` whose arguments contain `arg` fail
    pub fn fail(&mut self, op: &str, arg: &str) {
        self.failures.push((op.to_string(), arg.to_string()));
    }

    /// The target image's partition filesystem
    pub fn target_fs(&self, image: &Path) -> &FakeFs {
        self.images[image]
            .partition
            .as_ref()
            .and_then(|p| p.fs.as_ref())
            .expect("target has no filesystem")
    }

    pub fn target(&self, image: &Path) -> &FakeImage {
        &self.images[image]
    }

    /// Calls whose operation is `op`
    pub fn calls_of(&self, op: &str) -> Vec<&String> {
        self.calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Target {
    image: PathBuf,
    partition: bool,
    access: Access,
}

/// In-memory Disk Image Service
pub struct FakeDiskService {
    world: SharedWorld,
    attached: Vec<(PathBuf, Access)>,
    mounts: Vec<(String, Target)>,
}

fn begin<'a>(world: &'a SharedWorld, op: &str, arg: &str) -> Result<MutexGuard<'a, World>, DiskError> {
    let mut world = world.lock().expect("world lock poisoned");
    let call = format!("{op} {arg}").trim_end().to_string();
    world.calls.push(call.clone());
    if world
        .failures
        .iter()
        .any(|(o, a)| o == op && arg.contains(a.as_str()))
    {
        return Err(DiskError::CommandFailed {
            command: call,
            stderr: "injected failure".to_string(),
        });
    }
    Ok(world)
}

fn fs_mut<'a>(world: &'a mut World, target: &Target) -> Option<&'a mut FakeFs> {
    let image = world.images.get_mut(&target.image)?;
    if target.partition {
        image.partition.as_mut()?.fs.as_mut()
    } else {
        image.filesystem.as_mut()
    }
}

fn not_found(path: &str) -> DiskError {
    DiskError::NotFound {
        path: path.to_string(),
    }
}

fn read_only(command: &str) -> DiskError {
    DiskError::CommandFailed {
        command: command.to_string(),
        stderr: "Read-only file system".to_string(),
    }
}

impl FakeDiskService {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: Arc::clone(world),
            attached: Vec::new(),
            mounts: Vec::new(),
        }
    }

    /// Service starter for `Orchestrator::run`
    pub fn starter(world: &SharedWorld) -> impl FnOnce() -> Result<Self, DiskError> {
        let world = Arc::clone(world);
        move || Ok(Self::new(&world))
    }

    fn device(&self, name: &str) -> Option<Target> {
        let rest = name.strip_prefix("/dev/sd")?;
        let mut chars = rest.chars();
        let letter = chars.next()?;
        let index = (letter as u8).checked_sub(b'a')? as usize;
        let (image, access) = self.attached.get(index)?.clone();
        Some(Target {
            image,
            partition: chars.as_str() == "1",
            access,
        })
    }

    fn locate(&self, path: &str) -> Option<(Target, String)> {
        self.mounts
            .iter()
            .filter(|(mp, _)| path == mp || path.starts_with(&format!("{mp}/")))
            .max_by_key(|(mp, _)| mp.len())
            .map(|(mp, target)| (target.clone(), norm(&path[mp.len()..])))
    }
}

impl DiskImageService for FakeDiskService {
    fn create_image(&mut self, path: &Path, size_mb: u64) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "create_image", &format!("{} {size_mb}", path.display()))?;
        std::fs::write(path, b"").map_err(|e| DiskError::HostIo {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        world.images.insert(path.to_path_buf(), FakeImage::default());
        Ok(())
    }

    fn attach_image(&mut self, path: &Path, access: Access) -> Result<usize, DiskError> {
        let mut world = begin(&self.world, "attach_image", &path.display().to_string())?;
        if !path.exists() {
            return Err(not_found(&path.display().to_string()));
        }
        world.images.entry(path.to_path_buf()).or_default();
        self.attached.push((path.to_path_buf(), access));
        Ok(self.attached.len() - 1)
    }

    fn launch(&mut self) -> Result<(), DiskError> {
        begin(&self.world, "launch", "")?;
        Ok(())
    }

    fn list_devices(&mut self) -> Result<Vec<String>, DiskError> {
        begin(&self.world, "list_devices", "")?;
        Ok((0..self.attached.len())
            .map(|i| format!("/dev/sd{}", (b'a' + i as u8) as char))
            .collect())
    }

    fn list_partitions(&mut self) -> Result<Vec<String>, DiskError> {
        let world = begin(&self.world, "list_partitions", "")?;
        Ok(self
            .attached
            .iter()
            .enumerate()
            .filter(|(_, (path, _))| world.images[path].partition.is_some())
            .map(|(i, _)| format!("/dev/sd{}1", (b'a' + i as u8) as char))
            .collect())
    }

    fn create_partition_table(&mut self, device: &str) -> Result<String, DiskError> {
        let mut world = begin(&self.world, "create_partition_table", device)?;
        let target = self.device(device).ok_or_else(|| not_found(device))?;
        let image = world.images.get_mut(&target.image).ok_or_else(|| not_found(device))?;
        image.partition = Some(FakePartition::default());
        Ok(format!("{device}1"))
    }

    fn set_bootable(&mut self, device: &str, index: u32, bootable: bool) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "set_bootable", &format!("{device} {index} {bootable}"))?;
        let target = self.device(device).ok_or_else(|| not_found(device))?;
        let partition = world
            .images
            .get_mut(&target.image)
            .and_then(|i| i.partition.as_mut())
            .ok_or_else(|| not_found(device))?;
        partition.bootable = bootable;
        Ok(())
    }

    fn is_bootable(&mut self, device: &str, index: u32) -> Result<bool, DiskError> {
        let world = begin(&self.world, "is_bootable", &format!("{device} {index}"))?;
        let target = self.device(device).ok_or_else(|| not_found(device))?;
        Ok(world.images[&target.image]
            .partition
            .as_ref()
            .is_some_and(|p| p.bootable))
    }

    fn format_filesystem(&mut self, partition: &str, fstype: &str) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "format_filesystem", &format!("{partition} {fstype}"))?;
        let target = self.device(partition).ok_or_else(|| not_found(partition))?;
        let part = world
            .images
            .get_mut(&target.image)
            .and_then(|i| i.partition.as_mut())
            .ok_or_else(|| not_found(partition))?;
        part.fs = Some(FakeFs::new(fstype, ""));
        Ok(())
    }

    fn filesystem_type(&mut self, device: &str) -> Result<String, DiskError> {
        let mut world = begin(&self.world, "filesystem_type", device)?;
        let target = self.device(device).ok_or_else(|| not_found(device))?;
        Ok(fs_mut(&mut world, &target)
            .map(|fs| fs.fstype.clone())
            .unwrap_or_default())
    }

    fn mount(&mut self, device: &str, mountpoint: &str, access: Access) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "mount", &format!("{device} {mountpoint}"))?;
        let mut target = self.device(device).ok_or_else(|| not_found(device))?;
        if target.access.is_read_only() && !access.is_read_only() {
            return Err(read_only("mount"));
        }
        if fs_mut(&mut world, &target).is_none() {
            return Err(DiskError::CommandFailed {
                command: format!("mount {device}"),
                stderr: "no filesystem".to_string(),
            });
        }
        target.access = access;
        self.mounts.push((mountpoint.to_string(), target));
        Ok(())
    }

    fn unmount(&mut self, mountpoint: &str) -> Result<(), DiskError> {
        begin(&self.world, "unmount", mountpoint)?;
        let index = self
            .mounts
            .iter()
            .position(|(mp, _)| mp == mountpoint)
            .ok_or_else(|| not_found(mountpoint))?;
        self.mounts.remove(index);
        Ok(())
    }

    fn copy_in(&mut self, host_path: &Path, target_path: &str) -> Result<(), DiskError> {
        let content = std::fs::read(host_path).map_err(|e| DiskError::HostIo {
            path: host_path.to_path_buf(),
            error: e.to_string(),
        })?;
        self.write_file(target_path, &content)
    }

    fn copy_out(&mut self, source_path: &str, host_path: &Path) -> Result<(), DiskError> {
        let content = self.read_file(source_path)?;
        std::fs::write(host_path, content).map_err(|e| DiskError::HostIo {
            path: host_path.to_path_buf(),
            error: e.to_string(),
        })
    }

    fn copy_tree(&mut self, source: &str, target_dir: &str) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "copy_tree", &format!("{source} {target_dir}"))?;
        let (src, src_inner) = self.locate(source).ok_or_else(|| not_found(source))?;
        let (dst, dst_inner) = self.locate(target_dir).ok_or_else(|| not_found(target_dir))?;
        if dst.access.is_read_only() {
            return Err(read_only("copy_tree"));
        }

        let entries = {
            let fs = fs_mut(&mut world, &src).ok_or_else(|| not_found(source))?;
            if !fs.exists(&src_inner) {
                return Err(not_found(source));
            }
            fs.subtree(&src_inner)
        };

        let fs = fs_mut(&mut world, &dst).ok_or_else(|| not_found(target_dir))?;
        let root = if fs.is_dir(&dst_inner) {
            child_path(&dst_inner, base(&src_inner))
        } else if fs.is_dir(&parent_of(&dst_inner)) {
            dst_inner
        } else {
            return Err(not_found(target_dir));
        };
        for (relative, node) in entries {
            fs.nodes.insert(norm(&format!("{root}{relative}")), node);
        }
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, DiskError> {
        let mut world = begin(&self.world, "read_file", path)?;
        let (target, inner) = self.locate(path).ok_or_else(|| not_found(path))?;
        let fs = fs_mut(&mut world, &target).ok_or_else(|| not_found(path))?;
        match fs.get(&inner) {
            Some(Node::File(bytes)) => Ok(bytes.clone()),
            _ => Err(not_found(path)),
        }
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "write_file", path)?;
        let (target, inner) = self.locate(path).ok_or_else(|| not_found(path))?;
        if target.access.is_read_only() {
            return Err(read_only("write_file"));
        }
        let fs = fs_mut(&mut world, &target).ok_or_else(|| not_found(path))?;
        if !fs.is_dir(&parent_of(&inner)) {
            return Err(not_found(path));
        }
        fs.nodes.insert(inner, Node::File(content.to_vec()));
        Ok(())
    }

    fn list_directory(&mut self, path: &str) -> Result<Vec<String>, DiskError> {
        let mut world = begin(&self.world, "list_directory", path)?;
        let (target, inner) = self.locate(path).ok_or_else(|| not_found(path))?;
        let fs = fs_mut(&mut world, &target).ok_or_else(|| not_found(path))?;
        if !fs.is_dir(&inner) {
            return Err(not_found(path));
        }
        Ok(fs.children(&inner))
    }

    fn exists(&mut self, path: &str) -> Result<bool, DiskError> {
        let mut world = begin(&self.world, "exists", path)?;
        Ok(match self.locate(path) {
            Some((target, inner)) => fs_mut(&mut world, &target).is_some_and(|fs| fs.exists(&inner)),
            None => false,
        })
    }

    fn is_dir(&mut self, path: &str) -> Result<bool, DiskError> {
        let mut world = begin(&self.world, "is_dir", path)?;
        Ok(match self.locate(path) {
            Some((target, inner)) => fs_mut(&mut world, &target).is_some_and(|fs| fs.is_dir(&inner)),
            None => false,
        })
    }

    fn make_dir(&mut self, path: &str) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "make_dir", path)?;
        let (target, inner) = self.locate(path).ok_or_else(|| not_found(path))?;
        if target.access.is_read_only() {
            return Err(read_only("make_dir"));
        }
        let fs = fs_mut(&mut world, &target).ok_or_else(|| not_found(path))?;
        fs.mkdir_p(&inner);
        Ok(())
    }

    fn install_bootloader(&mut self, install: &BootloaderInstall) -> Result<(), DiskError> {
        let mbr = self.read_file(&install.mbr)?;
        let mut world = begin(&self.world, "install_bootloader", &install.partition)?;
        let target = self
            .device(&install.device)
            .ok_or_else(|| not_found(&install.device))?;
        let image = world
            .images
            .get_mut(&target.image)
            .ok_or_else(|| not_found(&install.device))?;
        image.mbr = Some(mbr);
        image.syslinux_dir = Some(install.directory.clone());
        Ok(())
    }

    fn read_volume_label(&mut self, device: &str) -> Result<String, DiskError> {
        let mut world = begin(&self.world, "read_volume_label", device)?;
        let target = self.device(device).ok_or_else(|| not_found(device))?;
        Ok(fs_mut(&mut world, &target)
            .map(|fs| fs.label.clone())
            .unwrap_or_default())
    }

    fn set_volume_label(&mut self, partition: &str, label: &str) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "set_volume_label", &format!("{partition} {label}"))?;
        let target = self.device(partition).ok_or_else(|| not_found(partition))?;
        let fs = fs_mut(&mut world, &target).ok_or_else(|| not_found(partition))?;
        fs.label = label.to_string();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DiskError> {
        let mut world = begin(&self.world, "close", "")?;
        world.closed += 1;
        world.mounts_at_close.push(self.mounts.len());
        Ok(())
    }
}

/// Host syslinux files in a temporary directory
pub struct SyslinuxFixture {
    pub dir: TempDir,
}

impl SyslinuxFixture {
    /// All menu modules and the boot record present
    pub fn complete() -> Self {
        Self::with_modules(&["vesamenu.c32", "libcom32.c32", "libutil.c32", "menu.c32"])
    }

    /// Only the given modules present, plus the boot record
    pub fn with_modules(modules: &[&str]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::write(dir.path().join("mbr.bin"), vec![0xEB; 440]).expect("Failed to write mbr");
        for module in modules {
            std::fs::write(dir.path().join(module), module.as_bytes())
                .expect("Failed to write module");
        }
        Self { dir }
    }

    pub fn assets(&self) -> SyslinuxAssets {
        SyslinuxAssets::default().with_dir(self.dir.path())
    }
}

/// isolinux.cfg of a CentOS 7 installer
pub const CENTOS_ISOLINUX_CFG: &str = "\
default vesamenu.c32
timeout 600
menu background splash.png
menu title CentOS 7
label linux
  menu label ^Install CentOS 7
  kernel vmlinuz
  append initrd=initrd.img inst.stage2=hd:LABEL=CentOS\\x207\\x20x86_64 quiet
label check
  menu label Test this ^media & install CentOS 7
  kernel vmlinuz
  append initrd=initrd.img inst.stage2=hd:LABEL=CentOS\\x207\\x20x86_64 rd.live.check quiet
";

/// A CentOS 7 style installer ISO
pub fn centos_iso() -> FakeFs {
    FakeFs::new("iso9660", "CentOS 7 x86_64")
        .with_file("/isolinux/isolinux.cfg", CENTOS_ISOLINUX_CFG)
        .with_file("/isolinux/vmlinuz", "kernel")
        .with_file("/isolinux/initrd.img", "initrd")
        .with_file("/isolinux/splash.png", "png")
        .with_file("/images/pxeboot/vmlinuz", "kernel")
        .with_file("/images/efiboot.img", "efi")
        .with_file("/EFI/BOOT/grubx64.efi", "grub")
        .with_file("/Packages/bash-4.2.rpm", "rpm")
        .with_file("/Repodata/repomd.xml", "<repomd/>")
        .with_file("/repodata/repomd.xml", "<repomd/>")
        .with_file("/.discinfo", "discinfo")
        .with_file("/.treeinfo", "treeinfo")
}

/// Paths used by a build under a temporary directory
pub struct BuildDir {
    pub dir: TempDir,
}

impl BuildDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn iso(&self) -> PathBuf {
        self.dir.path().join("CentOS-7-x86_64-Minimal.iso")
    }

    pub fn image(&self) -> PathBuf {
        self.dir.path().join("usb.img")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for BuildDir {
    fn default() -> Self {
        Self::new()
    }
}
