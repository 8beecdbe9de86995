//! Shared helpers for integration tests.
//!
//! Datastores are created under `$SEGSTORE_TEST_DIR` when set (useful to run
//! the suite on a reflink-capable filesystem), otherwise under the system temp
//! directory.

#![allow(dead_code)]

use std::env;
use std::path::PathBuf;

use segstore::config::TEST_DIR_ENV;
use tempfile::TempDir;

pub fn test_dir() -> PathBuf {
    env::var_os(TEST_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
}

pub fn scratch_dir() -> TempDir {
    let root = test_dir();
    std::fs::create_dir_all(&root).unwrap();
    tempfile::tempdir_in(root).unwrap()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
