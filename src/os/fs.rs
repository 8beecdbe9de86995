//! # Filesystem Helpers
//!
//! Existence checks, directory creation and the parallel copy/clone used to
//! duplicate a datastore's metadata tree.
//!
//! ## Parallel Transfer
//!
//! A transfer first walks the source tree, recreating every subdirectory
//! under the destination, and collects the list of regular files. The files
//! are then handed out to a bounded set of scoped worker threads through a
//! shared atomic cursor. Each worker owns the files it pulls, so workers never
//! touch the same path. Failures are collected and reported together once all
//! workers have joined.
//!
//! ## Clone vs Copy
//!
//! `TransferMode::Clone` asks the filesystem for a copy-on-write reflink
//! (`FICLONE` on Linux). Filesystems without reflink support reject the ioctl,
//! in which case the file is byte copied instead, so a clone never fails only
//! because the filesystem cannot share extents.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use eyre::{bail, ensure, Result, WrapErr};
use log::debug;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Clone,
}

impl TransferMode {
    fn verb(self) -> &'static str {
        match self {
            TransferMode::Copy => "copy",
            TransferMode::Clone => "clone",
        }
    }
}

pub fn file_exist(path: &Path) -> bool {
    path.exists()
}

pub fn directory_exist(path: &Path) -> bool {
    path.is_dir()
}

/// Creates `path` and any missing parents. Succeeds if it already exists.
pub fn create_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .wrap_err_with(|| format!("failed to create directory '{}'", path.display()))
}

pub fn copy_files_in_directory_in_parallel(
    source: &Path,
    destination: &Path,
    max_num_threads: usize,
) -> Result<()> {
    transfer_tree(source, destination, max_num_threads, TransferMode::Copy)
}

pub fn clone_files_in_directory_in_parallel(
    source: &Path,
    destination: &Path,
    max_num_threads: usize,
) -> Result<()> {
    transfer_tree(source, destination, max_num_threads, TransferMode::Clone)
}

/// Copies or clones every file under `source` into `destination`, using at
/// most `max_num_threads` workers (0 picks the available parallelism).
pub fn transfer_tree(
    source: &Path,
    destination: &Path,
    max_num_threads: usize,
    mode: TransferMode,
) -> Result<()> {
    ensure!(
        directory_exist(source),
        "source directory '{}' does not exist",
        source.display()
    );

    let mut files = Vec::new();
    collect_files(source, destination, &mut files)?;

    if files.is_empty() {
        return Ok(());
    }

    let workers = worker_count(max_num_threads, files.len());
    debug!(
        "{} {} files from '{}' to '{}' with {} workers",
        mode.verb(),
        files.len(),
        source.display(),
        destination.display(),
        workers
    );

    let cursor = AtomicUsize::new(0);
    let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some((from, to)) = files.get(index) else {
                    break;
                };

                if let Err(e) = transfer_file(from, to, mode) {
                    failures.lock().push(format!("{:#}", e));
                }
            });
        }
    });

    let failures = failures.into_inner();
    if !failures.is_empty() {
        bail!(
            "failed to {} {} of {} files from '{}': {}",
            mode.verb(),
            failures.len(),
            files.len(),
            source.display(),
            failures.join("; ")
        );
    }

    Ok(())
}

fn worker_count(max_num_threads: usize, file_count: usize) -> usize {
    let limit = if max_num_threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        max_num_threads
    };

    limit.min(file_count).max(1)
}

fn collect_files(source: &Path, destination: &Path, out: &mut Vec<(PathBuf, PathBuf)>) -> Result<()> {
    create_directory(destination)?;

    let entries = fs::read_dir(source)
        .wrap_err_with(|| format!("failed to read directory '{}'", source.display()))?;

    for entry in entries {
        let entry =
            entry.wrap_err_with(|| format!("failed to read entry in '{}'", source.display()))?;
        let from = entry.path();
        let to = destination.join(entry.file_name());

        let file_type = entry
            .file_type()
            .wrap_err_with(|| format!("failed to stat '{}'", from.display()))?;

        if file_type.is_dir() {
            collect_files(&from, &to, out)?;
        } else {
            out.push((from, to));
        }
    }

    Ok(())
}

fn transfer_file(from: &Path, to: &Path, mode: TransferMode) -> Result<()> {
    match mode {
        TransferMode::Copy => copy_file(from, to),
        TransferMode::Clone => clone_file(from, to),
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).wrap_err_with(|| {
        format!(
            "failed to copy '{}' to '{}'",
            from.display(),
            to.display()
        )
    })?;
    Ok(())
}

#[cfg(target_os = "linux")]
const FICLONE: libc::c_ulong = 0x4004_9409;

#[cfg(target_os = "linux")]
fn clone_file(from: &Path, to: &Path) -> Result<()> {
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;

    let src = File::open(from)
        .wrap_err_with(|| format!("failed to open '{}' for cloning", from.display()))?;
    let dst = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(to)
        .wrap_err_with(|| format!("failed to create clone target '{}'", to.display()))?;

    // SAFETY: both descriptors stay open for the duration of the call and
    // FICLONE takes the source descriptor by value.
    let rc = unsafe { libc::ioctl(dst.as_raw_fd(), FICLONE as _, src.as_raw_fd()) };
    if rc == 0 {
        return Ok(());
    }

    debug!(
        "reflink of '{}' unavailable ({}), falling back to copy",
        from.display(),
        std::io::Error::last_os_error()
    );
    drop(dst);
    copy_file(from, to)
}

#[cfg(not(target_os = "linux"))]
fn clone_file(from: &Path, to: &Path) -> Result<()> {
    copy_file(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("a.meta"), b"alpha").unwrap();
        fs::write(root.join("b.meta"), vec![7u8; 10_000]).unwrap();
        fs::write(root.join("nested/c.meta"), b"gamma").unwrap();
        fs::write(root.join("nested/deeper/d.meta"), b"delta").unwrap();
    }

    fn assert_same_tree(source: &Path, destination: &Path) {
        assert_eq!(fs::read(destination.join("a.meta")).unwrap(), b"alpha");
        assert_eq!(
            fs::read(destination.join("b.meta")).unwrap(),
            fs::read(source.join("b.meta")).unwrap()
        );
        assert_eq!(fs::read(destination.join("nested/c.meta")).unwrap(), b"gamma");
        assert_eq!(
            fs::read(destination.join("nested/deeper/d.meta")).unwrap(),
            b"delta"
        );
    }

    #[test]
    fn create_directory_is_recursive_and_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x/y/z");

        create_directory(&path).unwrap();
        create_directory(&path).unwrap();

        assert!(directory_exist(&path));
        assert!(file_exist(&path));
    }

    #[test]
    fn file_exist_is_false_for_missing_path() {
        let dir = tempdir().unwrap();

        assert!(!file_exist(&dir.path().join("missing")));
        assert!(!directory_exist(&dir.path().join("missing")));
    }

    #[test]
    fn directory_exist_is_false_for_regular_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();

        assert!(file_exist(&file));
        assert!(!directory_exist(&file));
    }

    #[test]
    fn copy_replicates_nested_tree() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let destination = dir.path().join("dst");
        populate(&source);

        copy_files_in_directory_in_parallel(&source, &destination, 2).unwrap();

        assert_same_tree(&source, &destination);
    }

    #[test]
    fn clone_replicates_nested_tree() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let destination = dir.path().join("dst");
        populate(&source);

        clone_files_in_directory_in_parallel(&source, &destination, 0).unwrap();

        assert_same_tree(&source, &destination);
    }

    #[test]
    fn copy_with_single_thread_matches_parallel() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        let destination = dir.path().join("dst");
        populate(&source);

        copy_files_in_directory_in_parallel(&source, &destination, 1).unwrap();

        assert_same_tree(&source, &destination);
    }

    #[test]
    fn copy_of_empty_directory_succeeds() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(&source).unwrap();

        copy_files_in_directory_in_parallel(&source, &dir.path().join("dst"), 4).unwrap();

        assert!(directory_exist(&dir.path().join("dst")));
    }

    #[test]
    fn copy_fails_for_missing_source() {
        let dir = tempdir().unwrap();

        let result =
            copy_files_in_directory_in_parallel(&dir.path().join("nope"), &dir.path().join("dst"), 2);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn worker_count_is_bounded_by_files_and_hint() {
        assert_eq!(worker_count(8, 3), 3);
        assert_eq!(worker_count(2, 100), 2);
        assert_eq!(worker_count(4, 0), 1);
        assert!(worker_count(0, 1000) >= 1);
    }
}
