//! # Fatal Precondition Tests
//!
//! Misaligned VM regions and datastores that cannot be mapped at the caller's
//! address terminate the process instead of returning an error. Each case runs
//! in a child process: the test binary re-executes itself, selecting
//! `abort_child` with `SEGSTORE_ABORT_CASE` naming the scenario, and the parent
//! asserts the child died from `SIGABRT`.

mod common;

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::ptr::NonNull;

use segstore::config::{METADATA_FILE_NAME, VERSION_METADATA_DIR_NAME};
use segstore::os::page_size;
use segstore::{MmapSegmentStorage, VmRegion};

const CASE_ENV: &str = "SEGSTORE_ABORT_CASE";
const REGION_SIZE: usize = 4096 * 1024;

fn run_case(case: &str) -> ExitStatus {
    let exe = std::env::current_exe().unwrap();
    Command::new(exe)
        .args(["--exact", "abort_child", "--test-threads=1", "--nocapture"])
        .env(CASE_ENV, case)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap()
}

fn assert_aborts(case: &str) {
    let status = run_case(case);

    assert!(!status.success(), "case '{}' SHOULD abort, child exited cleanly", case);
    assert_eq!(
        status.signal(),
        Some(libc::SIGABRT),
        "case '{}' SHOULD die from SIGABRT, got {:?}",
        case,
        status
    );
}

fn misaligned(region: &VmRegion) -> NonNull<u8> {
    NonNull::new(unsafe { region.as_ptr().as_ptr().add(1) }).unwrap()
}

/// Child entry point; a no-op unless launched by `run_case`.
#[test]
fn abort_child() {
    let Ok(case) = std::env::var(CASE_ENV) else {
        return;
    };
    common::init_logging();

    let dir = common::scratch_dir();
    let path = dir.path().join("ds");
    let page = page_size().unwrap();
    let region = VmRegion::reserve(REGION_SIZE).unwrap();
    let mut storage = MmapSegmentStorage::new().unwrap();

    let _ = match case.as_str() {
        "create_misaligned_size" => storage.create(&path, REGION_SIZE - page / 2, region.as_ptr(), 0),
        "create_misaligned_address" => storage.create(&path, REGION_SIZE - page, misaligned(&region), 0),
        "open_misaligned_size" => storage.open(&path, REGION_SIZE + 1, region.as_ptr(), false),
        "open_misaligned_address" => {
            storage.open(&path, REGION_SIZE - page, misaligned(&region), false)
        }
        "open_corrupt_metadata" => {
            let metadata = path.join(VERSION_METADATA_DIR_NAME);
            std::fs::create_dir_all(&metadata).unwrap();
            std::fs::write(metadata.join(METADATA_FILE_NAME), b"not metadata").unwrap();
            storage.open(&path, REGION_SIZE, region.as_ptr(), false)
        }
        "open_into_smaller_region" => {
            storage.create(&path, REGION_SIZE, region.as_ptr(), 0).unwrap();
            storage.extend(REGION_SIZE).unwrap();
            storage.destroy();
            let small = VmRegion::reserve(page * 4).unwrap();
            storage.open(&path, small.len(), small.as_ptr(), false)
        }
        other => panic!("unknown abort case '{}'", other),
    };
}

#[test]
fn create_with_misaligned_size_aborts() {
    assert_aborts("create_misaligned_size");
}

#[test]
fn create_with_misaligned_address_aborts() {
    assert_aborts("create_misaligned_address");
}

#[test]
fn open_with_misaligned_size_aborts() {
    assert_aborts("open_misaligned_size");
}

#[test]
fn open_with_misaligned_address_aborts() {
    assert_aborts("open_misaligned_address");
}

#[test]
fn open_with_corrupt_metadata_aborts() {
    assert_aborts("open_corrupt_metadata");
}

#[test]
fn open_into_region_smaller_than_segment_aborts() {
    assert_aborts("open_into_smaller_region");
}
