//! # Segment Engine Abstraction
//!
//! `SegmentEngine` is the boundary between the segment adapter and whatever
//! actually backs a segment with durable blocks. The adapter only ever talks to
//! an engine through this trait; it validates arguments, enforces the binding
//! state machine and caches sizes, while the engine owns mapping, growth and
//! flushing.
//!
//! ## Contract
//!
//! ```text
//! create(addr, blocks_dir, metadata_dir, capacity) -> engine mapped at addr
//! open(addr, metadata_dir, read_only)              -> engine mapped at addr
//! resize(new_size)                                 -> grow, never shrink
//! current_size()                                   -> bytes currently backed
//! msync()                                          -> flush blocks + metadata
//! version_size(metadata_dir)                       -> recorded size, no mapping
//! version_blocks_dir(metadata_dir)                 -> recorded blocks directory
//! ```
//!
//! An engine instance exclusively owns the mapping it created. Dropping the
//! engine unmaps it without flushing; callers that need durability call
//! `msync()` first.
//!
//! ## Backends
//!
//! | Backend       | Blocks                        | Metadata                  |
//! |---------------|-------------------------------|---------------------------|
//! | `MmapEngine`  | one file, `MAP_FIXED` mapping | header file via `memmap2` |

use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use eyre::Result;

pub trait SegmentEngine: Sized + Send {
    /// Creates a new datastore and maps its initial blocks at `addr`.
    ///
    /// `capacity` is the most the segment may ever grow to; the engine picks
    /// the initial size itself. `addr` and `capacity` are page aligned and the
    /// range `[addr, addr + capacity)` is reserved by the caller.
    fn create(
        addr: NonNull<u8>,
        blocks_dir: &Path,
        metadata_dir: &Path,
        capacity: usize,
    ) -> Result<Self>;

    /// Maps an existing datastore at `addr`.
    fn open(addr: NonNull<u8>, metadata_dir: &Path, read_only: bool) -> Result<Self>;

    /// Grows the segment so that at least `new_size` bytes are backed.
    ///
    /// Requests at or below the current size succeed without effect.
    fn resize(&mut self, new_size: usize) -> Result<()>;

    fn current_size(&self) -> usize;

    /// Flushes all dirty block and metadata state to persistent storage.
    fn msync(&self) -> Result<()>;

    /// Reads the segment size recorded under `metadata_dir` without mapping.
    fn version_size(metadata_dir: &Path) -> Result<usize>;

    /// Reads the canonical blocks directory recorded under `metadata_dir`.
    ///
    /// A datastore whose metadata was copied from another one records the
    /// source's blocks directory here, not its own.
    fn version_blocks_dir(metadata_dir: &Path) -> Result<PathBuf>;
}
