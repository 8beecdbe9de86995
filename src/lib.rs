//! # segstore - Fixed-Address Segment Storage
//!
//! segstore is the storage layer underneath a persistent memory allocator. The
//! allocator reserves a range of virtual address space; segstore binds that
//! range to a datastore directory on disk so that whatever the allocator
//! writes into the range survives the process and is found at the same
//! addresses when the datastore is opened again.
//!
//! ## Quick Start
//!
//! ```ignore
//! use segstore::{MmapSegmentStorage, VmRegion};
//!
//! let region = VmRegion::reserve(1 << 30)?;
//! let mut storage = MmapSegmentStorage::new()?;
//!
//! storage.create("./datastore", region.len(), region.as_ptr(), 0)?;
//! storage.extend(64 << 20)?;
//! // ... allocator writes through region.as_ptr() ...
//! storage.sync(true)?;
//! storage.destroy();
//!
//! storage.open("./datastore", region.len(), region.as_ptr(), false)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   SegmentStorage (binding lifecycle) │
//! ├─────────────────────────────────────┤
//! │   SegmentEngine / MmapEngine         │
//! ├─────────────────────────────────────┤
//! │   OS probe (page size, fs, VM)       │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Segment adapter, engine trait, mmap engine, metadata header
//! - [`os`]: Page size, directory helpers, parallel copy/clone, VM reservation
//! - [`config`]: Directory names, file format and sizing constants
//!
//! ## Logging
//!
//! Diagnostics go through the `log` facade. Install any logger (for example
//! `env_logger`) to see them; nothing is printed otherwise.

#[cfg(not(unix))]
compile_error!("segstore maps segments at fixed addresses and requires a unix target");

#[macro_use]
mod macros;

pub mod config;
pub mod os;
pub mod storage;

pub use os::VmRegion;
pub use storage::{MmapEngine, MmapSegmentStorage, SegmentEngine, SegmentState, SegmentStorage};
