//! # segstore Configuration Constants
//!
//! Constants that depend on each other are co-located and checked at compile
//! time.
//!
//! ## Dependency Graph
//!
//! ```text
//! METADATA_FILE_SIZE (4096 bytes)
//!       │
//!       ├─> METADATA_HEADER_SIZE (64 bytes, fixed)
//!       │
//!       └─> MAX_BLOCKS_PATH_LEN (derived: METADATA_FILE_SIZE - METADATA_HEADER_SIZE)
//!             The canonical blocks directory path is stored right after the
//!             header, so it must fit in the remainder of the metadata file.
//!
//! DEFAULT_INITIAL_SEGMENT_SIZE (1 MiB)
//!       │
//!       └─> Clamped to the segment capacity and rounded up to the OS page
//!           size when a datastore is created.
//! ```
//!
//! ## Datastore Layout
//!
//! ```text
//! base_path/
//! ├── blocks/
//! │   └── segment.blocks     # Block data, mapped at the caller's address
//! └── version_metadata/
//!     └── segment.meta       # Header + canonical blocks directory path
//! ```

/// Subdirectory holding the block data of a datastore.
pub const BLOCKS_DIR_NAME: &str = "blocks";

/// Subdirectory holding size and version metadata of a datastore.
pub const VERSION_METADATA_DIR_NAME: &str = "version_metadata";

pub const BLOCK_FILE_NAME: &str = "segment.blocks";
pub const METADATA_FILE_NAME: &str = "segment.meta";

pub const METADATA_MAGIC: &[u8; 16] = b"SegStore Meta\x00\x00\x00";
pub const METADATA_VERSION: u32 = 1;

pub const METADATA_HEADER_SIZE: usize = 64;
pub const METADATA_FILE_SIZE: usize = 4096;
pub const MAX_BLOCKS_PATH_LEN: usize = METADATA_FILE_SIZE - METADATA_HEADER_SIZE;

const _: () = assert!(METADATA_HEADER_SIZE < METADATA_FILE_SIZE);
const _: () = assert!(MAX_BLOCKS_PATH_LEN + METADATA_HEADER_SIZE == METADATA_FILE_SIZE);

/// Size the block file starts with on create, before any `extend`.
pub const DEFAULT_INITIAL_SEGMENT_SIZE: usize = 1 << 20;

const _: () = assert!(DEFAULT_INITIAL_SEGMENT_SIZE.is_power_of_two());

/// Environment variable naming the directory integration tests create
/// datastores under. Falls back to the system temp directory.
pub const TEST_DIR_ENV: &str = "SEGSTORE_TEST_DIR";
