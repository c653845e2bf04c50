// In-memory stand-ins for host capabilities, used by unit tests
// SPDX-License-Identifier: GPL-3.0-or-later

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::boot::{BootArgumentSet, ImageLayer, InitramfsRequest, KargEdit};
use crate::fstab::{count_references, swap_entry, Activation, MountError, MountTable};
use crate::meminfo::{HostMemoryInfo, MemInfoError, MemorySource};
use crate::selinux::{FileContext, PolicyError, PolicyToolchain};
use crate::volume::{VolumeError, Volumes};

pub const FAKE_UUID: &str = "0f7c6a52-4f0e-4c3b-9a51-3d1c2b9e8f10";
pub const FAKE_OFFSET: u64 = 533760;

pub struct FakeMemory {
    total_bytes: Option<u64>,
}

impl FakeMemory {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes: Some(total_bytes),
        }
    }

    pub fn unreadable() -> Self {
        Self { total_bytes: None }
    }
}

impl MemorySource for FakeMemory {
    fn memory_info(&self) -> crate::meminfo::Result<HostMemoryInfo> {
        self.total_bytes
            .map(|total_bytes| HostMemoryInfo { total_bytes })
            .ok_or_else(|| MemInfoError::MissingField("MemTotal".to_string()))
    }
}

#[derive(Debug)]
struct VolumeState {
    files: BTreeSet<PathBuf>,
    subvolumes: BTreeSet<PathBuf>,
    directories: BTreeSet<PathBuf>,
    free_space: u64,
    fail_allocation: bool,
    fail_uuid: bool,
    calls: Vec<String>,
}

/// A btrfs volume that only records what was asked of it.
/// Clones share state, so a test can hand one to a `Host` and inspect another.
#[derive(Clone)]
pub struct FakeVolumes {
    state: Rc<RefCell<VolumeState>>,
}

impl Default for FakeVolumes {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(VolumeState {
                files: BTreeSet::new(),
                subvolumes: BTreeSet::new(),
                directories: BTreeSet::new(),
                free_space: 1 << 50,
                fail_allocation: false,
                fail_uuid: false,
                calls: Vec::new(),
            })),
        }
    }
}

impl FakeVolumes {
    pub fn add_swapfile(&self, path: &str) {
        let path = PathBuf::from(path);
        let mut state = self.state.borrow_mut();
        if let Some(parent) = path.parent() {
            state.subvolumes.insert(parent.to_path_buf());
        }
        state.files.insert(path);
    }

    pub fn add_subvolume(&self, path: &str) {
        self.state.borrow_mut().subvolumes.insert(PathBuf::from(path));
    }

    pub fn add_directory(&self, path: &str) {
        self.state.borrow_mut().directories.insert(PathBuf::from(path));
    }

    pub fn set_free_space(&self, bytes: u64) {
        self.state.borrow_mut().free_space = bytes;
    }

    pub fn fail_allocation(&self) {
        self.state.borrow_mut().fail_allocation = true;
    }

    pub fn fail_uuid(&self) {
        self.state.borrow_mut().fail_uuid = true;
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.borrow_mut();
        state.fail_allocation = false;
        state.fail_uuid = false;
    }

    /// Mutating calls in order, as "<op> <path> [size]"
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Volumes for FakeVolumes {
    fn exists(&self, path: &Path) -> bool {
        let state = self.state.borrow();
        state.files.contains(path)
            || state.subvolumes.contains(path)
            || state.directories.contains(path)
    }

    fn is_subvolume(&self, path: &Path) -> bool {
        self.state.borrow().subvolumes.contains(path)
    }

    fn create_subvolume(&self, path: &Path) -> crate::volume::Result<()> {
        self.record(format!("create_subvolume {}", path.display()));
        self.state.borrow_mut().subvolumes.insert(path.to_path_buf());
        Ok(())
    }

    fn disable_cow(&self, path: &Path) -> crate::volume::Result<()> {
        self.record(format!("disable_cow {}", path.display()));
        Ok(())
    }

    fn free_space(&self, _path: &Path) -> crate::volume::Result<u64> {
        Ok(self.state.borrow().free_space)
    }

    fn make_swapfile(&self, path: &Path, size_bytes: u64) -> crate::volume::Result<()> {
        self.record(format!("make_swapfile {} {}", path.display(), size_bytes));
        let mut state = self.state.borrow_mut();
        if state.fail_allocation {
            return Err(VolumeError::Allocation(
                path.display().to_string(),
                "No space left on device".to_string(),
            ));
        }
        state.files.insert(path.to_path_buf());
        Ok(())
    }

    fn restrict_permissions(&self, path: &Path) -> crate::volume::Result<()> {
        self.record(format!("restrict_permissions {}", path.display()));
        Ok(())
    }

    fn filesystem_uuid(&self, path: &Path) -> crate::volume::Result<String> {
        if self.state.borrow().fail_uuid {
            return Err(VolumeError::BadOutput(
                format!("findmnt {}", path.display()),
                String::new(),
            ));
        }
        Ok(FAKE_UUID.to_string())
    }

    fn swapfile_offset(&self, path: &Path) -> crate::volume::Result<u64> {
        if !self.state.borrow().files.contains(path) {
            return Err(VolumeError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }
        Ok(FAKE_OFFSET)
    }
}

#[derive(Default)]
struct MountState {
    entries: Vec<String>,
    active: BTreeSet<PathBuf>,
    fail_activation: bool,
}

/// fstab lines plus the set of active swaps
#[derive(Clone, Default)]
pub struct FakeMounts {
    state: Rc<RefCell<MountState>>,
}

impl FakeMounts {
    pub fn entries(&self) -> Vec<String> {
        self.state.borrow().entries.clone()
    }

    pub fn active(&self, path: &Path) -> bool {
        self.state.borrow().active.contains(path)
    }

    pub fn fail_activation(&self) {
        self.state.borrow_mut().fail_activation = true;
    }
}

impl MountTable for FakeMounts {
    fn references(&self, path: &Path) -> crate::fstab::Result<usize> {
        Ok(count_references(&self.state.borrow().entries.join("\n"), path))
    }

    fn append_swap(&self, path: &Path, priority: i32) -> crate::fstab::Result<()> {
        self.state.borrow_mut().entries.push(swap_entry(path, priority));
        Ok(())
    }

    fn is_active(&self, path: &Path) -> crate::fstab::Result<bool> {
        Ok(self.active(path))
    }

    fn activate(&self, path: &Path, _priority: i32) -> crate::fstab::Result<Activation> {
        let mut state = self.state.borrow_mut();
        if state.fail_activation {
            return Err(MountError::Activate(
                path.display().to_string(),
                io::Error::from_raw_os_error(libc::EINVAL),
            ));
        }
        if state.active.insert(path.to_path_buf()) {
            Ok(Activation::Activated)
        } else {
            Ok(Activation::AlreadyActive)
        }
    }
}

#[derive(Default)]
struct PolicyState {
    modules: BTreeSet<String>,
    file_contexts: Vec<String>,
    relabelled: Vec<PathBuf>,
    fail_compile: bool,
}

/// Policy store that writes placeholder build outputs
#[derive(Clone, Default)]
pub struct FakePolicy {
    state: Rc<RefCell<PolicyState>>,
}

impl FakePolicy {
    pub fn fail_compile(&self) {
        self.state.borrow_mut().fail_compile = true;
    }

    /// Registered contexts as "<spec> <type>"
    pub fn file_contexts(&self) -> Vec<String> {
        self.state.borrow().file_contexts.clone()
    }

    pub fn relabelled(&self) -> Vec<PathBuf> {
        self.state.borrow().relabelled.clone()
    }
}

impl PolicyToolchain for FakePolicy {
    fn compile(&self, source: &Path, module_out: &Path) -> crate::selinux::Result<()> {
        if self.state.borrow().fail_compile {
            return Err(PolicyError::Tool {
                tool: "checkmodule".to_string(),
                message: format!("{}:1:ERROR 'syntax error'", source.display()),
            });
        }
        std::fs::write(module_out, b"mod")?;
        Ok(())
    }

    fn package(&self, _module: &Path, package_out: &Path) -> crate::selinux::Result<()> {
        std::fs::write(package_out, b"pp")?;
        Ok(())
    }

    fn install(&self, package: &Path) -> crate::selinux::Result<()> {
        let name = package
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.state.borrow_mut().modules.insert(name);
        Ok(())
    }

    fn installed_modules(&self) -> crate::selinux::Result<Vec<String>> {
        Ok(self.state.borrow().modules.iter().cloned().collect())
    }

    fn add_file_context(
        &self,
        spec: &str,
        selinux_type: &str,
    ) -> crate::selinux::Result<FileContext> {
        let entry = format!("{} {}", spec, selinux_type);
        let mut state = self.state.borrow_mut();
        if state.file_contexts.contains(&entry) {
            return Ok(FileContext::AlreadyDefined);
        }
        state.file_contexts.push(entry);
        Ok(FileContext::Added)
    }

    fn restore_labels(&self, path: &Path) -> crate::selinux::Result<()> {
        self.state.borrow_mut().relabelled.push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Default)]
struct ImageState {
    args: BootArgumentSet,
    initramfs: bool,
    edits: usize,
}

/// rpm-ostree deployment with initramfs regeneration initially off
#[derive(Clone, Default)]
pub struct FakeImage {
    state: Rc<RefCell<ImageState>>,
}

impl FakeImage {
    pub fn with_args(line: &str) -> Self {
        let image = Self::default();
        image.state.borrow_mut().args = BootArgumentSet::parse(line);
        image
    }

    pub fn args(&self) -> BootArgumentSet {
        self.state.borrow().args.clone()
    }

    /// Number of `edit_kernel_args` calls
    pub fn edit_count(&self) -> usize {
        self.state.borrow().edits
    }
}

impl ImageLayer for FakeImage {
    fn kernel_args(&self) -> crate::boot::Result<Vec<String>> {
        Ok(self.state.borrow().args.args().to_vec())
    }

    fn edit_kernel_args(&self, edits: &[KargEdit]) -> crate::boot::Result<()> {
        let mut state = self.state.borrow_mut();
        state.edits += 1;
        state.args.apply(edits);
        Ok(())
    }

    fn enable_initramfs(&self) -> crate::boot::Result<InitramfsRequest> {
        let mut state = self.state.borrow_mut();
        if std::mem::replace(&mut state.initramfs, true) {
            Ok(InitramfsRequest::AlreadyEnabled)
        } else {
            Ok(InitramfsRequest::Queued)
        }
    }

    fn initramfs_enabled(&self) -> crate::boot::Result<bool> {
        Ok(self.state.borrow().initramfs)
    }
}
