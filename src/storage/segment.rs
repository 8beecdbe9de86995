//! # Segment Storage Adapter
//!
//! `SegmentStorage` binds a caller-reserved virtual address range to a
//! datastore on disk through a [`SegmentEngine`], and owns that binding for its
//! whole life: create or open, grow, flush, release.
//!
//! ## State Machine
//!
//! ```text
//!                create / open
//!  Uninitialized ─────────────> Created | Opened
//!        ^                              │
//!        └──────── destroy ─────────────┘
//! ```
//!
//! The binding lives in an `Option`, so "at most one binding per adapter" and
//! "an engine exists iff the adapter is bound" hold by construction. Calling
//! `create`/`open` on a bound adapter is rejected and leaves the existing
//! binding untouched. The type is neither `Clone` nor `Copy`; moving it moves
//! the binding.
//!
//! ## Two Failure Channels
//!
//! | Condition                                     | Outcome          |
//! |-----------------------------------------------|------------------|
//! | VM region size/address not page aligned       | process abort    |
//! | Engine cannot bind at the address on `open`   | process abort    |
//! | Datastore missing on `open`                   | `Err`            |
//! | Writable `open` of a metadata copy            | `Err`            |
//! | Directory/file creation failure on `create`   | `Err`            |
//! | `extend` past the VM region, read-only, idle  | `Err`            |
//! | Engine resize failure                         | `Err`            |
//!
//! The abort class signals a broken caller (it reserved a bad region) or a
//! datastore that cannot live in the caller's address layout. Neither can be
//! handled by retrying, so they never surface as an error value.
//!
//! ## Metadata Copies
//!
//! `copy` duplicates only `version_metadata/`, which still names the source's
//! blocks directory. The engine writes blocks in place, so a writable binding
//! of such a copy would modify the source. `open` therefore accepts a copy only
//! read-only: a writable open requires the recorded blocks directory to be the
//! datastore's own `blocks/`.
//!
//! ## Freeing Regions
//!
//! The engine cannot punch holes into block storage. `free_region` only tells
//! the caller whether the range lies inside the current segment; it never
//! releases anything and never changes the segment size.
//!
//! ## Teardown
//!
//! Dropping the adapter flushes a writable binding and then releases it, in
//! that order. `destroy` alone does not flush.
//!
//! ## Thread Safety
//!
//! Not internally synchronized. Every mutation takes `&mut self`; share behind
//! a lock if more than one thread needs it.

use std::fs;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use eyre::{bail, ensure, Result, WrapErr};
use log::{debug, error, info, warn};

use super::engine::SegmentEngine;
use super::mmap::MmapEngine;
use crate::config::{BLOCKS_DIR_NAME, VERSION_METADATA_DIR_NAME};
use crate::os::fs::{
    clone_files_in_directory_in_parallel, copy_files_in_directory_in_parallel, create_directory,
    directory_exist, file_exist,
};
use crate::os::vm::{self, is_aligned};

/// Segment storage backed by the native fixed-address mmap engine.
pub type MmapSegmentStorage = SegmentStorage<MmapEngine>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Uninitialized,
    Created,
    Opened,
}

#[derive(Debug)]
struct Binding<E> {
    base_path: PathBuf,
    vm_region_size: usize,
    vm_region: NonNull<u8>,
    current_segment_size: usize,
    read_only: bool,
    state: SegmentState,
    engine: E,
}

#[derive(Debug)]
pub struct SegmentStorage<E: SegmentEngine> {
    page_size: usize,
    binding: Option<Binding<E>>,
}

// SAFETY: the VM region pointer is an address the adapter hands back to its
// owner and passes to the engine; the adapter itself never dereferences it.
// The engine is `Send` by the trait bound.
unsafe impl<E: SegmentEngine> Send for SegmentStorage<E> {}

fn fatal(message: &str) -> ! {
    error!("{}", message);
    log::logger().flush();
    std::process::abort()
}

fn metadata_dir(base_path: &Path) -> PathBuf {
    base_path.join(VERSION_METADATA_DIR_NAME)
}

impl<E: SegmentEngine> SegmentStorage<E> {
    pub fn new() -> Result<Self> {
        let page_size = vm::page_size().map_err(|e| {
            error!("failed to get system page size: {:#}", e);
            e
        })?;

        Ok(Self {
            page_size,
            binding: None,
        })
    }

    /// Returns whether a datastore exists at `base_path`.
    pub fn openable<P: AsRef<Path>>(base_path: P) -> bool {
        file_exist(base_path.as_ref())
    }

    /// Returns the segment size recorded in an existing datastore without
    /// mapping it.
    pub fn get_size<P: AsRef<Path>>(base_path: P) -> Result<usize> {
        let base_path = base_path.as_ref();
        E::version_size(&metadata_dir(base_path)).wrap_err_with(|| {
            format!("failed to read segment size of '{}'", base_path.display())
        })
    }

    /// Copies the version metadata of the datastore at `source` into
    /// `destination`, cloning files when `clone` is set.
    ///
    /// Only `version_metadata/` is copied; the recorded blocks path still
    /// points at the source's blocks. `max_num_threads == 0` lets the
    /// implementation pick the worker count.
    pub fn copy<P: AsRef<Path>, Q: AsRef<Path>>(
        source: P,
        destination: Q,
        clone: bool,
        max_num_threads: usize,
    ) -> Result<()> {
        let source = source.as_ref();
        let destination = destination.as_ref();

        let destination_metadata = metadata_dir(destination);
        if !directory_exist(&destination_metadata) {
            if let Err(e) = create_directory(&destination_metadata) {
                error!(
                    "cannot create directory '{}': {:#}",
                    destination_metadata.display(),
                    e
                );
            }
        }

        let source_metadata = metadata_dir(source);

        if clone {
            info!("clone: {}", source.display());
            clone_files_in_directory_in_parallel(
                &source_metadata,
                &destination_metadata,
                max_num_threads,
            )
        } else {
            info!("copy: {}", source.display());
            copy_files_in_directory_in_parallel(
                &source_metadata,
                &destination_metadata,
                max_num_threads,
            )
        }
    }

    /// Creates a new datastore at `base_path` and maps it at `vm_region`.
    ///
    /// `[vm_region, vm_region + vm_region_size)` must already be reserved by
    /// the caller. Both values must be page aligned, otherwise the process
    /// aborts. `size_hint` is accepted for interface compatibility; the engine
    /// chooses the initial size.
    pub fn create<P: AsRef<Path>>(
        &mut self,
        base_path: P,
        vm_region_size: usize,
        vm_region: NonNull<u8>,
        _size_hint: usize,
    ) -> Result<()> {
        let base_path = base_path.as_ref();
        self.ensure_unbound()?;
        self.check_region(vm_region_size, vm_region, "create");

        let blocks_dir = base_path.join(BLOCKS_DIR_NAME);
        let version_dir = metadata_dir(base_path);

        for dir in [base_path, blocks_dir.as_path(), version_dir.as_path()] {
            create_directory(dir).map_err(|e| {
                error!("failed to create directory '{}': {:#}", dir.display(), e);
                e
            })?;
        }

        let engine = E::create(vm_region, &blocks_dir, &version_dir, vm_region_size)
            .wrap_err_with(|| format!("failed to create segment at '{}'", base_path.display()))?;

        let current_segment_size = engine.current_size();
        ensure!(
            current_segment_size <= vm_region_size,
            "engine backed {} bytes, more than the {}-byte VM region",
            current_segment_size,
            vm_region_size
        );

        debug!(
            "created segment '{}' at {:p}: {} of {} bytes",
            base_path.display(),
            vm_region.as_ptr(),
            current_segment_size,
            vm_region_size
        );

        self.binding = Some(Binding {
            base_path: base_path.to_path_buf(),
            vm_region_size,
            vm_region,
            current_segment_size,
            read_only: false,
            state: SegmentState::Created,
            engine,
        });

        Ok(())
    }

    /// Opens the datastore at `base_path` and maps it at `vm_region`.
    ///
    /// A missing datastore is an error, and so is a writable open of a
    /// datastore produced by `copy`. Misaligned arguments, unreadable
    /// metadata, a recorded size larger than the VM region, or any failure of
    /// the engine to map at `vm_region` abort the process.
    pub fn open<P: AsRef<Path>>(
        &mut self,
        base_path: P,
        vm_region_size: usize,
        vm_region: NonNull<u8>,
        read_only: bool,
    ) -> Result<()> {
        let base_path = base_path.as_ref();
        self.ensure_unbound()?;
        self.check_region(vm_region_size, vm_region, "open");

        if !file_exist(base_path) {
            bail!("segment datastore '{}' does not exist", base_path.display());
        }

        let version_dir = metadata_dir(base_path);

        let recorded_size = match E::version_size(&version_dir) {
            Ok(size) => size,
            Err(e) => fatal(&format!(
                "cannot read segment metadata of '{}': {:#}",
                base_path.display(),
                e
            )),
        };

        if recorded_size > vm_region_size {
            fatal(&format!(
                "segment '{}' holds {} bytes, more than the {}-byte VM region",
                base_path.display(),
                recorded_size,
                vm_region_size
            ));
        }

        if !read_only {
            self.ensure_owns_blocks(base_path, &version_dir)?;
        }

        let engine = match E::open(vm_region, &version_dir, read_only) {
            Ok(engine) => engine,
            Err(e) => fatal(&format!(
                "failed to map segment '{}' at {:p}: {:#}",
                base_path.display(),
                vm_region.as_ptr(),
                e
            )),
        };

        let current_segment_size = engine.current_size();

        debug!(
            "opened segment '{}' at {:p}: {} bytes{}",
            base_path.display(),
            vm_region.as_ptr(),
            current_segment_size,
            if read_only { " (read-only)" } else { "" }
        );

        self.binding = Some(Binding {
            base_path: base_path.to_path_buf(),
            vm_region_size,
            vm_region,
            current_segment_size,
            read_only,
            state: SegmentState::Opened,
            engine,
        });

        Ok(())
    }

    /// Grows the segment to at least `request_size` bytes.
    ///
    /// Fails without effect on an unbound or read-only adapter, or when
    /// `request_size` exceeds the reserved VM region.
    pub fn extend(&mut self, request_size: usize) -> Result<()> {
        let Some(binding) = self.binding.as_mut() else {
            bail!("cannot extend: no segment is bound");
        };

        ensure!(
            !binding.read_only,
            "cannot extend read-only segment '{}'",
            binding.base_path.display()
        );

        ensure!(
            request_size <= binding.vm_region_size,
            "requested segment size {} is bigger than the reserved VM size {}",
            request_size,
            binding.vm_region_size
        );

        binding.engine.resize(request_size).wrap_err_with(|| {
            format!(
                "failed to extend segment '{}' to {} bytes",
                binding.base_path.display(),
                request_size
            )
        })?;

        binding.current_segment_size = binding.engine.current_size();
        debug!(
            "extended segment '{}' to {} bytes",
            binding.base_path.display(),
            binding.current_segment_size
        );

        Ok(())
    }

    /// Flushes a writable binding to persistent storage. No-op when unbound
    /// or read-only.
    ///
    /// `_synchronous` exists for parity with asynchronous flush variants; the
    /// flush is always synchronous.
    pub fn sync(&self, _synchronous: bool) -> Result<()> {
        match &self.binding {
            Some(binding) if !binding.read_only => binding.engine.msync().wrap_err_with(|| {
                format!("failed to sync segment '{}'", binding.base_path.display())
            }),
            _ => Ok(()),
        }
    }

    /// Releases the binding without flushing. No-op when unbound.
    pub fn destroy(&mut self) {
        if let Some(binding) = self.binding.take() {
            debug!(
                "releasing segment '{}' ({} bytes)",
                binding.base_path.display(),
                binding.current_segment_size
            );
        }
    }

    /// Returns whether `[offset, offset + nbytes)` lies inside the current
    /// segment of a writable binding. Never releases storage.
    pub fn free_region(&self, offset: usize, nbytes: usize) -> bool {
        match &self.binding {
            Some(binding) if !binding.read_only => offset
                .checked_add(nbytes)
                .is_some_and(|end| end <= binding.current_segment_size),
            _ => false,
        }
    }

    pub fn get_segment(&self) -> Option<NonNull<u8>> {
        self.binding.as_ref().map(|b| b.vm_region)
    }

    pub fn size(&self) -> usize {
        self.binding.as_ref().map_or(0, |b| b.current_segment_size)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_only(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| b.read_only)
    }

    pub fn vm_region_size(&self) -> usize {
        self.binding.as_ref().map_or(0, |b| b.vm_region_size)
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.binding.as_ref().map(|b| b.base_path.as_path())
    }

    pub fn state(&self) -> SegmentState {
        self.binding
            .as_ref()
            .map_or(SegmentState::Uninitialized, |b| b.state)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    fn ensure_unbound(&self) -> Result<()> {
        if let Some(binding) = &self.binding {
            bail!(
                "segment storage is already bound to '{}'",
                binding.base_path.display()
            );
        }
        Ok(())
    }

    fn ensure_owns_blocks(&self, base_path: &Path, version_dir: &Path) -> Result<()> {
        let recorded = match E::version_blocks_dir(version_dir) {
            Ok(path) => path,
            Err(e) => fatal(&format!(
                "cannot read segment metadata of '{}': {:#}",
                base_path.display(),
                e
            )),
        };

        let own = fs::canonicalize(base_path.join(BLOCKS_DIR_NAME)).ok();
        if own.as_deref() != Some(recorded.as_path()) {
            bail!(
                "segment datastore '{}' is a metadata copy of the blocks in '{}' and can only be opened read-only",
                base_path.display(),
                recorded.display()
            );
        }

        Ok(())
    }

    fn check_region(&self, vm_region_size: usize, vm_region: NonNull<u8>, operation: &str) {
        if !is_aligned(vm_region_size, self.page_size)
            || !is_aligned(vm_region.as_ptr() as usize, self.page_size)
        {
            fatal(&format!(
                "invalid argument to {} segment: VM region {:p} ({} bytes) is not aligned to page size {}",
                operation,
                vm_region.as_ptr(),
                vm_region_size,
                self.page_size
            ));
        }
    }
}

impl<E: SegmentEngine> Drop for SegmentStorage<E> {
    fn drop(&mut self) {
        if let Err(e) = self.sync(true) {
            warn!("failed to sync segment on drop: {:#}", e);
        }
        self.destroy();
    }
}
