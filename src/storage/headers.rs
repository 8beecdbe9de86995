//! # Segment Metadata Header
//!
//! The `version_metadata/segment.meta` file of every datastore starts with a
//! 64-byte zerocopy header, followed by the canonical path of the datastore's
//! blocks directory.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       16    Magic: "SegStore Meta\x00\x00\x00"
//! 16      4     Format version
//! 20      4     Page size the datastore was created with
//! 24      8     Capacity (maximum segment size, bytes)
//! 32      8     Current segment size (bytes)
//! 40      4     Length of the blocks path that follows the header
//! 44      4     Flags (unused, zero)
//! 48      16    Reserved
//! 64      ..    Blocks directory path bytes
//! ```
//!
//! ## Zerocopy Safety
//!
//! The header derives `FromBytes`, `IntoBytes`, `Immutable`, `KnownLayout` and
//! `Unaligned`, so it can be viewed in place inside the metadata mmap and
//! updated without any serialization step.
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    MAX_BLOCKS_PATH_LEN, METADATA_FILE_SIZE, METADATA_HEADER_SIZE, METADATA_MAGIC,
    METADATA_VERSION,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SegmentMetaHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    capacity: U64,
    segment_size: U64,
    blocks_path_len: U32,
    flags: U32,
    reserved: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<SegmentMetaHeader>() == METADATA_HEADER_SIZE);

impl SegmentMetaHeader {
    pub fn new(page_size: u32, capacity: u64, segment_size: u64, blocks_path_len: u32) -> Self {
        Self {
            magic: *METADATA_MAGIC,
            version: U32::new(METADATA_VERSION),
            page_size: U32::new(page_size),
            capacity: U64::new(capacity),
            segment_size: U64::new(segment_size),
            blocks_path_len: U32::new(blocks_path_len),
            flags: U32::new(0),
            reserved: [0u8; 16],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= METADATA_HEADER_SIZE,
            "buffer too small for SegmentMetaHeader: {} < {}",
            bytes.len(),
            METADATA_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..METADATA_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse SegmentMetaHeader: {:?}", e))?;

        header.validate()?;

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= METADATA_HEADER_SIZE,
            "buffer too small for SegmentMetaHeader: {} < {}",
            bytes.len(),
            METADATA_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..METADATA_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse SegmentMetaHeader: {:?}", e))?;

        header.validate()?;

        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            &self.magic == METADATA_MAGIC,
            "invalid magic bytes in segment metadata"
        );

        ensure!(
            self.version.get() == METADATA_VERSION,
            "unsupported metadata version: {} (expected {})",
            self.version.get(),
            METADATA_VERSION
        );

        let page_size = self.page_size.get() as u64;
        ensure!(page_size > 0, "metadata records a zero page size");

        ensure!(
            self.capacity.get() % page_size == 0 && self.segment_size.get() % page_size == 0,
            "metadata sizes (capacity={}, segment={}) are not multiples of page size {}",
            self.capacity.get(),
            self.segment_size.get(),
            page_size
        );

        ensure!(
            self.segment_size.get() <= self.capacity.get(),
            "metadata segment size {} exceeds capacity {}",
            self.segment_size.get(),
            self.capacity.get()
        );

        ensure!(
            self.blocks_path_len.get() as usize <= MAX_BLOCKS_PATH_LEN,
            "blocks path length {} exceeds {}",
            self.blocks_path_len.get(),
            MAX_BLOCKS_PATH_LEN
        );

        Ok(())
    }

    zerocopy_accessors! {
        segment_size: u64,
    }

    zerocopy_getters! {
        version: u32,
        page_size: u32,
        capacity: u64,
        blocks_path_len: u32,
        flags: u32,
    }
}

/// Encodes a complete metadata file image: header plus blocks path, zero padded
/// to `METADATA_FILE_SIZE`.
pub fn encode_metadata(
    page_size: u32,
    capacity: u64,
    segment_size: u64,
    blocks_path: &Path,
) -> Result<Vec<u8>> {
    let path_bytes = blocks_path.as_os_str().as_bytes();
    ensure!(
        path_bytes.len() <= MAX_BLOCKS_PATH_LEN,
        "blocks path '{}' is too long for segment metadata ({} > {} bytes)",
        blocks_path.display(),
        path_bytes.len(),
        MAX_BLOCKS_PATH_LEN
    );

    let header = SegmentMetaHeader::new(page_size, capacity, segment_size, path_bytes.len() as u32);
    header.validate()?;

    let mut image = vec![0u8; METADATA_FILE_SIZE];
    image[..METADATA_HEADER_SIZE].copy_from_slice(header.as_bytes());
    image[METADATA_HEADER_SIZE..METADATA_HEADER_SIZE + path_bytes.len()]
        .copy_from_slice(path_bytes);

    Ok(image)
}

/// Returns the blocks directory recorded after the header.
pub fn blocks_path(bytes: &[u8]) -> Result<PathBuf> {
    let header = SegmentMetaHeader::from_bytes(bytes)?;
    let len = header.blocks_path_len() as usize;

    ensure!(
        bytes.len() >= METADATA_HEADER_SIZE + len,
        "segment metadata truncated: {} bytes, blocks path needs {}",
        bytes.len(),
        METADATA_HEADER_SIZE + len
    );
    ensure!(len > 0, "segment metadata records an empty blocks path");

    let raw = &bytes[METADATA_HEADER_SIZE..METADATA_HEADER_SIZE + len];
    Ok(PathBuf::from(OsStr::from_bytes(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_matches_constant() {
        assert_eq!(std::mem::size_of::<SegmentMetaHeader>(), METADATA_HEADER_SIZE);
    }

    #[test]
    fn encoded_image_parses_back() {
        let image = encode_metadata(4096, 1 << 22, 1 << 20, Path::new("/data/ds/blocks")).unwrap();

        assert_eq!(image.len(), METADATA_FILE_SIZE);

        let header = SegmentMetaHeader::from_bytes(&image).unwrap();
        assert_eq!(header.version(), METADATA_VERSION);
        assert_eq!(header.page_size(), 4096);
        assert_eq!(header.capacity(), 1 << 22);
        assert_eq!(header.segment_size(), 1 << 20);
        assert_eq!(header.flags(), 0);
        assert_eq!(blocks_path(&image).unwrap(), PathBuf::from("/data/ds/blocks"));
    }

    #[test]
    fn set_segment_size_updates_in_place() {
        let mut image = encode_metadata(4096, 1 << 22, 4096, Path::new("/b")).unwrap();

        SegmentMetaHeader::from_bytes_mut(&mut image)
            .unwrap()
            .set_segment_size(8192);

        assert_eq!(SegmentMetaHeader::from_bytes(&image).unwrap().segment_size(), 8192);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = encode_metadata(4096, 8192, 4096, Path::new("/b")).unwrap();
        image[0] = b'X';

        let err = SegmentMetaHeader::from_bytes(&image).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }

    #[test]
    fn rejects_segment_larger_than_capacity() {
        let result = encode_metadata(4096, 4096, 8192, Path::new("/b"));

        assert!(result.is_err());
    }

    #[test]
    fn rejects_unaligned_sizes() {
        let result = encode_metadata(4096, 8192, 100, Path::new("/b"));

        assert!(result.is_err());
    }

    #[test]
    fn rejects_short_buffer() {
        let result = SegmentMetaHeader::from_bytes(&[0u8; 10]);

        assert!(result.is_err());
    }

    #[test]
    fn rejects_overlong_blocks_path() {
        let long = "x".repeat(MAX_BLOCKS_PATH_LEN + 1);

        let result = encode_metadata(4096, 8192, 4096, Path::new(&long));

        assert!(result.is_err());
    }
}
