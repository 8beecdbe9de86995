//! # Fixed-Address Memory-Mapped Engine
//!
//! `MmapEngine` is the native `SegmentEngine`. It backs a segment with a single
//! block file mapped `MAP_SHARED | MAP_FIXED` at the address the caller
//! reserved, and records the segment's size in a small metadata file that is
//! itself memory-mapped through `memmap2`.
//!
//! ## Files
//!
//! ```text
//! blocks/segment.blocks          # Raw segment bytes, offset 0 == segment address
//! version_metadata/segment.meta  # SegmentMetaHeader + canonical blocks dir path
//! ```
//!
//! The metadata file is the entry point: `open` only needs the metadata
//! directory and resolves the block file through the path recorded there.
//!
//! ## Growth
//!
//! Growth never remaps what is already mapped. The block file is extended and
//! only the new tail `[addr + old, addr + new)` is mapped at file offset `old`.
//! Existing pointers into the segment therefore stay valid across `resize`,
//! which is what a persistent allocator handing out raw addresses needs.
//!
//! ```text
//!  addr                     addr+old            addr+new        addr+capacity
//!   |------ mapped ------------|---- new tail ----|-- reserved ----|
//! ```
//!
//! ## Teardown
//!
//! Dropping the engine does not flush. It replaces the mapped range with a
//! fresh `PROT_NONE` reservation, so the caller's address range stays reserved
//! and can be bound again.
//!
//! ## Error Handling
//!
//! All fallible operations return `eyre::Result` with the file path and
//! operation in the message.

use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use eyre::{bail, ensure, Result, WrapErr};
use log::warn;
use memmap2::{Mmap, MmapMut};

use super::engine::SegmentEngine;
use super::headers::{self, encode_metadata, SegmentMetaHeader};
use crate::config::{
    BLOCK_FILE_NAME, DEFAULT_INITIAL_SEGMENT_SIZE, METADATA_FILE_NAME, METADATA_FILE_SIZE,
};
use crate::os::vm::{self, align_up, is_aligned};

#[derive(Debug)]
enum MetadataMap {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl MetadataMap {
    fn bytes(&self) -> &[u8] {
        match self {
            MetadataMap::Writable(m) => &m[..],
            MetadataMap::ReadOnly(m) => &m[..],
        }
    }

    fn set_segment_size(&mut self, size: usize) -> Result<()> {
        match self {
            MetadataMap::Writable(m) => {
                SegmentMetaHeader::from_bytes_mut(&mut m[..])?.set_segment_size(size as u64);
                Ok(())
            }
            MetadataMap::ReadOnly(_) => bail!("segment metadata is mapped read-only"),
        }
    }

    fn flush(&self) -> Result<()> {
        match self {
            MetadataMap::Writable(m) => m.flush().wrap_err("failed to sync segment metadata"),
            MetadataMap::ReadOnly(_) => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct MmapEngine {
    block_file: File,
    metadata: MetadataMap,
    addr: NonNull<u8>,
    mapped: usize,
    capacity: usize,
    page_size: usize,
    read_only: bool,
}

// SAFETY: MmapEngine exclusively owns the mapping at `addr`; the raw pointer is
// never shared, and every access to the mapped range goes through `&mut self`
// or through the owner of the reservation.
unsafe impl Send for MmapEngine {}

impl MmapEngine {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn metadata_file(metadata_dir: &Path) -> PathBuf {
        metadata_dir.join(METADATA_FILE_NAME)
    }

    fn read_metadata(meta_path: &Path) -> Result<Vec<u8>> {
        fs::read(meta_path)
            .wrap_err_with(|| format!("failed to read metadata file '{}'", meta_path.display()))
    }
}

/// Maps `len` bytes of `file` starting at `offset` exactly at `addr`.
///
/// # Safety
///
/// `[addr, addr + len)` must be owned by the caller (reserved or already
/// mapped by it) and no references into it may be live.
unsafe fn map_fixed(
    addr: *mut u8,
    len: usize,
    file: &File,
    offset: usize,
    writable: bool,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }

    let prot = if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };

    let ptr = libc::mmap(
        addr as *mut libc::c_void,
        len,
        prot,
        libc::MAP_SHARED | libc::MAP_FIXED,
        file.as_raw_fd(),
        offset as libc::off_t,
    );

    if ptr == libc::MAP_FAILED {
        bail!(
            "failed to map {} bytes at {:p} (file offset {}): {}",
            len,
            addr,
            offset,
            std::io::Error::last_os_error()
        );
    }

    ensure!(
        ptr as *mut u8 == addr,
        "kernel placed mapping at {:p} instead of {:p}",
        ptr,
        addr
    );

    Ok(())
}

impl SegmentEngine for MmapEngine {
    fn create(
        addr: NonNull<u8>,
        blocks_dir: &Path,
        metadata_dir: &Path,
        capacity: usize,
    ) -> Result<Self> {
        let page_size = vm::page_size()?;

        ensure!(
            capacity > 0 && is_aligned(capacity, page_size),
            "segment capacity {} is not a non-zero multiple of page size {}",
            capacity,
            page_size
        );
        ensure!(
            is_aligned(addr.as_ptr() as usize, page_size),
            "segment address {:p} is not page aligned",
            addr.as_ptr()
        );

        let blocks_dir = fs::canonicalize(blocks_dir).wrap_err_with(|| {
            format!("failed to resolve blocks directory '{}'", blocks_dir.display())
        })?;

        let initial_size = align_up(DEFAULT_INITIAL_SEGMENT_SIZE.min(capacity), page_size).min(capacity);

        let block_path = blocks_dir.join(BLOCK_FILE_NAME);
        let block_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&block_path)
            .wrap_err_with(|| format!("failed to create block file '{}'", block_path.display()))?;

        block_file
            .set_len(initial_size as u64)
            .wrap_err_with(|| format!("failed to size block file to {} bytes", initial_size))?;

        let image = encode_metadata(page_size as u32, capacity as u64, initial_size as u64, &blocks_dir)?;

        let meta_path = Self::metadata_file(metadata_dir);
        let meta_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&meta_path)
            .wrap_err_with(|| format!("failed to create metadata file '{}'", meta_path.display()))?;

        meta_file
            .set_len(METADATA_FILE_SIZE as u64)
            .wrap_err_with(|| format!("failed to size metadata file '{}'", meta_path.display()))?;

        // SAFETY: MmapMut::map_mut is unsafe because the file could be modified
        // externally. We just created and truncated it, and the map is owned by
        // this engine for its whole lifetime.
        let mut meta_map = unsafe {
            MmapMut::map_mut(&meta_file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", meta_path.display()))?
        };
        meta_map.copy_from_slice(&image);
        meta_map
            .flush()
            .wrap_err("failed to sync new segment metadata")?;

        // SAFETY: the caller reserved [addr, addr + capacity) and initial_size
        // never exceeds capacity; nothing references the range yet.
        unsafe { map_fixed(addr.as_ptr(), initial_size, &block_file, 0, true)? };

        Ok(Self {
            block_file,
            metadata: MetadataMap::Writable(meta_map),
            addr,
            mapped: initial_size,
            capacity,
            page_size,
            read_only: false,
        })
    }

    fn open(addr: NonNull<u8>, metadata_dir: &Path, read_only: bool) -> Result<Self> {
        let page_size = vm::page_size()?;

        ensure!(
            is_aligned(addr.as_ptr() as usize, page_size),
            "segment address {:p} is not page aligned",
            addr.as_ptr()
        );

        let meta_path = Self::metadata_file(metadata_dir);
        let meta_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&meta_path)
            .wrap_err_with(|| format!("failed to open metadata file '{}'", meta_path.display()))?;

        // SAFETY: the metadata file belongs to this datastore and is not meant
        // to be modified by other processes while mapped; all reads go through
        // the validated header.
        let metadata = unsafe {
            if read_only {
                MetadataMap::ReadOnly(
                    Mmap::map(&meta_file)
                        .wrap_err_with(|| format!("failed to memory-map '{}'", meta_path.display()))?,
                )
            } else {
                MetadataMap::Writable(
                    MmapMut::map_mut(&meta_file)
                        .wrap_err_with(|| format!("failed to memory-map '{}'", meta_path.display()))?,
                )
            }
        };

        let header = SegmentMetaHeader::from_bytes(metadata.bytes())
            .wrap_err_with(|| format!("corrupt segment metadata '{}'", meta_path.display()))?;
        let segment_size = header.segment_size() as usize;
        let capacity = header.capacity() as usize;

        ensure!(
            is_aligned(segment_size, page_size) && is_aligned(capacity, page_size),
            "datastore sizes (segment={}, capacity={}) are not multiples of system page size {}",
            segment_size,
            capacity,
            page_size
        );

        let block_path = headers::blocks_path(metadata.bytes())?.join(BLOCK_FILE_NAME);
        let block_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&block_path)
            .wrap_err_with(|| format!("failed to open block file '{}'", block_path.display()))?;

        let file_len = block_file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", block_path.display()))?
            .len();

        ensure!(
            file_len >= segment_size as u64,
            "block file '{}' holds {} bytes but metadata records {}",
            block_path.display(),
            file_len,
            segment_size
        );

        // SAFETY: the caller reserved a range of at least segment_size bytes at
        // addr (the adapter checks this before opening) and nothing references
        // it yet.
        unsafe { map_fixed(addr.as_ptr(), segment_size, &block_file, 0, !read_only)? };

        Ok(Self {
            block_file,
            metadata,
            addr,
            mapped: segment_size,
            capacity,
            page_size,
            read_only,
        })
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        ensure!(!self.read_only, "cannot resize a read-only segment");

        if new_size <= self.mapped {
            return Ok(());
        }

        ensure!(
            new_size <= self.capacity,
            "requested segment size {} exceeds capacity {}",
            new_size,
            self.capacity
        );

        let target = align_up(new_size, self.page_size).min(self.capacity);

        self.block_file
            .set_len(target as u64)
            .wrap_err_with(|| format!("failed to extend block file to {} bytes", target))?;

        let old = self.mapped;
        // SAFETY: addr + old stays inside the reserved capacity.
        let tail = unsafe { NonNull::new_unchecked(self.addr.as_ptr().add(old)) };

        // SAFETY: [addr + old, addr + target) lies inside the reserved
        // capacity and is not mapped yet; resize takes &mut self, so no borrows
        // handed out by this engine are alive.
        unsafe {
            map_fixed(
                tail.as_ptr(),
                target - old,
                &self.block_file,
                old,
                true,
            )?
        };
        self.mapped = target;

        if let Err(e) = self.metadata.set_segment_size(target) {
            // SAFETY: the tail was mapped above and nothing has seen it yet.
            match unsafe { vm::restore_reservation(tail, target - old) } {
                Ok(()) => self.mapped = old,
                Err(restore) => warn!(
                    "failed to unmap segment tail after metadata update failed: {:#}",
                    restore
                ),
            }
            return Err(e).wrap_err_with(|| {
                format!("failed to record segment size {} in metadata", target)
            });
        }

        Ok(())
    }

    fn current_size(&self) -> usize {
        self.mapped
    }

    fn msync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }

        if self.mapped > 0 {
            // SAFETY: [addr, addr + mapped) is a live mapping owned by self.
            let rc = unsafe {
                libc::msync(
                    self.addr.as_ptr() as *mut libc::c_void,
                    self.mapped,
                    libc::MS_SYNC,
                )
            };
            if rc != 0 {
                bail!(
                    "failed to sync segment blocks: {}",
                    std::io::Error::last_os_error()
                );
            }
        }

        self.block_file
            .sync_all()
            .wrap_err("failed to sync block file")?;

        self.metadata.flush()
    }

    fn version_size(metadata_dir: &Path) -> Result<usize> {
        let meta_path = Self::metadata_file(metadata_dir);
        let bytes = Self::read_metadata(&meta_path)?;

        let header = SegmentMetaHeader::from_bytes(&bytes)
            .wrap_err_with(|| format!("corrupt segment metadata '{}'", meta_path.display()))?;

        Ok(header.segment_size() as usize)
    }

    fn version_blocks_dir(metadata_dir: &Path) -> Result<PathBuf> {
        let meta_path = Self::metadata_file(metadata_dir);
        let bytes = Self::read_metadata(&meta_path)?;

        headers::blocks_path(&bytes)
            .wrap_err_with(|| format!("corrupt segment metadata '{}'", meta_path.display()))
    }
}

impl Drop for MmapEngine {
    fn drop(&mut self) {
        if self.mapped == 0 {
            return;
        }

        // SAFETY: the engine owns [addr, addr + mapped) and is going away, so
        // nothing it handed out can still reference the range.
        if let Err(e) = unsafe { vm::restore_reservation(self.addr, self.mapped) } {
            warn!("failed to release segment mapping: {:#}", e);
        }
    }
}
