//! Wraps a RomFS image in a 3-level IVFC Merkle hash tree: level 2 is the
//! RomFS image itself, level 1 hashes each 0x1000-byte block of level 2,
//! level 0 hashes each 0x1000-byte block of level 1, and a master hash
//! hashes each 0x1000-byte block of level 0.

use crate::crypto::sha256;

const BLOCK_SIZE: u64 = 0x1000;
const BLOCK_SIZE_LOG2: u32 = 12;

/// Packed size of the IVFC header struct proper (magic, type, master hash
/// size, three level descriptors, optional_size) before the master hash
/// table is appended.
const STRUCT_SIZE: u32 = 0x58;

pub struct IvfcTree {
    pub header: Vec<u8>,
    pub level0: Vec<u8>,
    pub level1: Vec<u8>,
    /// SHA-256 digests of every 0x1000-byte block of `level0`, concatenated.
    /// Embedded into `header` at `align(STRUCT_SIZE, 0x10)`; more than one
    /// digest once `level0` exceeds a single block.
    pub master_hash: Vec<u8>,
    level1_offset: u64,
    level2_offset: u64,
}

fn hash_level(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(align_blocks(input.len() as u64) as usize / BLOCK_SIZE as usize * 0x20);
    for chunk in input.chunks(BLOCK_SIZE as usize) {
        let mut block = [0u8; BLOCK_SIZE as usize];
        block[..chunk.len()].copy_from_slice(chunk);
        out.extend_from_slice(&sha256(&block));
    }
    out
}

fn align_blocks(len: u64) -> u64 {
    crate::align_up64(len, BLOCK_SIZE)
}

/// Builds the IVFC hash tree over a RomFS level-3 (data) image.
#[must_use]
pub fn build(level3: &[u8]) -> IvfcTree {
    let level1 = hash_level(level3);
    let level0 = hash_level(&level1);
    // One digest per 0x1000-byte block of level0; more than 0x20 bytes once
    // level0 spans more than one block.
    let master_hash = hash_level(&level0);

    let level3_size = level3.len() as u64;
    let level1_size = level1.len() as u64;
    let level0_size = level0.len() as u64;

    let mut header = vec![0u8; STRUCT_SIZE as usize];
    header[0..4].copy_from_slice(b"IVFC");
    header[4..8].copy_from_slice(&0x10000u32.to_le_bytes()); // magic number / version
    header[8..12].copy_from_slice(&(master_hash.len() as u32).to_le_bytes());

    // Level 0 logical offset / size / block size log2
    header[12..20].copy_from_slice(&0u64.to_le_bytes());
    header[20..28].copy_from_slice(&level0_size.to_le_bytes());
    header[28..32].copy_from_slice(&BLOCK_SIZE_LOG2.to_le_bytes());
    header[32..36].copy_from_slice(&0u32.to_le_bytes()); // reserved

    // Level 1 logical offset / size / block size log2
    let level1_offset = align_blocks(level0_size);
    header[36..44].copy_from_slice(&level1_offset.to_le_bytes());
    header[44..52].copy_from_slice(&level1_size.to_le_bytes());
    header[52..56].copy_from_slice(&BLOCK_SIZE_LOG2.to_le_bytes());
    header[56..60].copy_from_slice(&0u32.to_le_bytes());

    // Level 2 (data/level3 in our naming) logical offset / size / block size log2
    let level2_offset = align_blocks(level1_offset + level1_size);
    header[60..68].copy_from_slice(&level2_offset.to_le_bytes());
    header[68..76].copy_from_slice(&level3_size.to_le_bytes());
    header[76..80].copy_from_slice(&BLOCK_SIZE_LOG2.to_le_bytes());
    header[80..84].copy_from_slice(&0u32.to_le_bytes());
    header[84..88].copy_from_slice(&STRUCT_SIZE.to_le_bytes()); // optional_size

    // Pad up to the 0x10-aligned offset where the master hash table is
    // embedded into the header buffer.
    header.resize(crate::align_up(STRUCT_SIZE, 0x10) as usize, 0);
    header.extend_from_slice(&master_hash);

    IvfcTree {
        header,
        level0,
        level1,
        master_hash,
        level1_offset,
        level2_offset,
    }
}

/// Lays out the IVFC header together with its three levels into a single
/// contiguous region, following the level offsets recorded in the header:
/// level 0 right after the header, level 1 and level 2 (the raw RomFS image)
/// each padded up to their block-aligned offset.
#[must_use]
pub fn assemble(tree: &IvfcTree, level3: &[u8]) -> Vec<u8> {
    let mut out = tree.header.clone();
    out.extend_from_slice(&tree.level0);
    out.resize(out.len().max(tree.header.len() + tree.level1_offset as usize), 0);
    let level1_start = tree.header.len() + tree.level1_offset as usize;
    out[level1_start..level1_start + tree.level1.len()].copy_from_slice(&tree.level1);
    out.resize(out.len().max(tree.header.len() + tree.level2_offset as usize), 0);
    let level2_start = tree.header.len() + tree.level2_offset as usize;
    out.resize(level2_start + level3.len(), 0);
    out[level2_start..level2_start + level3.len()].copy_from_slice(level3);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_tree_hashes_down_to_one_digest() {
        let level3 = vec![0x42u8; 0x1000];
        let tree = build(&level3);
        assert_eq!(tree.level1.len(), 0x20);
        assert_eq!(tree.level0.len(), 0x20);
        let mut block0 = [0u8; 0x1000];
        block0[..0x20].copy_from_slice(&tree.level0);
        assert_eq!(tree.master_hash, sha256(&block0));
    }

    #[test]
    fn header_starts_with_ivfc_magic() {
        let tree = build(&[0u8; 0x10]);
        assert_eq!(&tree.header[0..4], b"IVFC");
    }

    #[test]
    fn master_hash_is_embedded_at_aligned_struct_offset() {
        let tree = build(&[0u8; 0x10]);
        assert_eq!(tree.header.len(), 0x60 + tree.master_hash.len());
        assert_eq!(&tree.header[0x60..], &tree.master_hash[..]);
        let master_hash_size = u32::from_le_bytes(tree.header[8..12].try_into().unwrap());
        assert_eq!(master_hash_size as usize, tree.master_hash.len());
    }

    #[test]
    fn multi_block_level0_keeps_full_master_hash() {
        // Enough level3 data that level1, then level0, each span more than
        // one 0x1000 block, so the master hash table must hold more than
        // one digest instead of being truncated to the first.
        let level3 = vec![0x7eu8; 0x4001 * 0x1000];
        let tree = build(&level3);
        assert!(tree.level0.len() > 0x1000);
        assert!(tree.master_hash.len() > 0x20);
        assert_eq!(tree.master_hash.len() % 0x20, 0);
    }
}
