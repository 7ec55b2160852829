//! Packs named file blobs into an ExeFS archive: a fixed 0x200-byte header
//! (8 file-info slots plus their SHA-256 hashes, stored in reverse order)
//! followed by the files themselves, each aligned to a 0x200-byte boundary.

use crate::crypto::sha256;
use crate::error::{BuildResult, LayoutError};

pub const MAX_FILES: usize = 8;
const ALIGN: u32 = 0x200;

#[derive(Debug, Clone)]
pub struct ExeFsFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Lays out and serializes an ExeFS archive from a list of named files.
///
/// File info entries are stored in the order given; their hashes are stored
/// in reverse order in the trailing hash table, matching the on-disk layout
/// the reference tool produces.
pub fn pack(files: &[ExeFsFile]) -> BuildResult<Vec<u8>> {
    if files.len() > MAX_FILES {
        return Err(LayoutError::TooManyExefsFiles(files.len()).into());
    }

    let mut entries = Vec::with_capacity(files.len());
    let mut offset = 0u32;
    for file in files {
        if file.name.as_bytes().len() > 8 {
            return Err(LayoutError::ExefsNameTooLong(file.name.clone()).into());
        }
        let size = file.data.len() as u32;
        entries.push((file.name.clone(), offset, size));
        offset += align_up(size, ALIGN);
    }

    let body_size = offset as usize;
    let mut out = vec![0u8; 0x200 + body_size];

    // Header: 8 * (8-byte name, 4-byte offset, 4-byte size) = 0x80 bytes,
    // followed by 0x80 bytes reserved, then 8 * 0x20-byte hashes = 0x100
    // bytes, reversed relative to file order.
    for (i, (name, off, size)) in entries.iter().enumerate() {
        let base = i * 0x10;
        let mut name_bytes = [0u8; 8];
        name_bytes[..name.as_bytes().len()].copy_from_slice(name.as_bytes());
        out[base..base + 8].copy_from_slice(&name_bytes);
        out[base + 8..base + 12].copy_from_slice(&off.to_le_bytes());
        out[base + 12..base + 16].copy_from_slice(&size.to_le_bytes());
    }

    for (i, (_, off, size)) in entries.iter().enumerate() {
        let file_data = &files[i].data;
        let hash = sha256(file_data);
        let hash_slot = MAX_FILES - 1 - i;
        let hash_base = 0x100 + hash_slot * 0x20;
        out[hash_base..hash_base + 0x20].copy_from_slice(&hash);

        let data_start = 0x200 + *off as usize;
        out[data_start..data_start + *size as usize].copy_from_slice(file_data);
    }

    Ok(out)
}

const fn align_up(val: u32, alignment: u32) -> u32 {
    if val % alignment != 0 {
        val + (alignment - (val % alignment))
    } else {
        val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_0x200_bytes_before_data() {
        let files = vec![ExeFsFile {
            name: ".code".to_string(),
            data: vec![0xAA; 0x10],
        }];
        let blob = pack(&files).unwrap();
        assert_eq!(&blob[0..5], b".code");
        assert_eq!(&blob[0x200..0x210], &[0xAA; 0x10][..]);
    }

    #[test]
    fn rejects_too_many_files() {
        let files: Vec<_> = (0..9)
            .map(|i| ExeFsFile {
                name: format!("f{i}"),
                data: vec![],
            })
            .collect();
        assert!(pack(&files).is_err());
    }

    #[test]
    fn rejects_name_too_long() {
        let files = vec![ExeFsFile {
            name: "toolongname".to_string(),
            data: vec![],
        }];
        assert!(pack(&files).is_err());
    }
}
