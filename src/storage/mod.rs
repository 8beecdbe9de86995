//! # Storage Module
//!
//! Binds caller-reserved virtual address ranges to durable, file-backed
//! segments.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │   Persistent allocator (caller)      │  reserves the VM region
//! ├──────────────────────────────────────┤
//! │   SegmentStorage (adapter)           │  validation, binding state,
//! │                                      │  cached sizes, teardown order
//! ├──────────────────────────────────────┤
//! │   SegmentEngine (MmapEngine)         │  MAP_FIXED block mapping,
//! │                                      │  growth, msync, metadata
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Datastore Layout
//!
//! ```text
//! base_path/
//! ├── blocks/              # Block storage area
//! └── version_metadata/    # Segment size + blocks location
//! ```
//!
//! ## Module Organization
//!
//! - `segment`: The adapter (`SegmentStorage`) and its state machine
//! - `engine`: The `SegmentEngine` trait the adapter drives
//! - `mmap`: `MmapEngine`, the native engine
//! - `headers`: Zerocopy layout of the metadata file
//!
//! ## Safety Model
//!
//! Segments live at raw addresses chosen by the caller, so the borrow checker
//! cannot tie references into a segment to the engine that maps it. Instead
//! growth never moves existing mappings, and release swaps the mapping for an
//! inaccessible reservation rather than unmapping, so a stale pointer faults
//! instead of reading unrelated memory.

mod engine;
mod headers;
mod mmap;
mod segment;

pub use engine::SegmentEngine;
pub use headers::SegmentMetaHeader;
pub use mmap::MmapEngine;
pub use segment::{MmapSegmentStorage, SegmentState, SegmentStorage};
