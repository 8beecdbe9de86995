//! # OS Probe
//!
//! Thin wrappers over the operating system used by the storage layer:
//!
//! - `fs`: path existence, directory creation, parallel copy/clone of a
//!   directory tree
//! - `vm`: page size discovery and virtual address range reservation

pub mod fs;
pub mod vm;

pub use fs::{
    clone_files_in_directory_in_parallel, copy_files_in_directory_in_parallel, create_directory,
    directory_exist, file_exist, transfer_tree, TransferMode,
};
pub use vm::{align_up, is_aligned, page_size, VmRegion};
