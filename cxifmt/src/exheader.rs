//! Assembles the 0x400-byte Extended Header and its paired Access
//! Descriptor: process info, Arm11 local/kernel capabilities, and Arm9
//! access control, bit-packed by hand rather than via a bitfield macro.

use crate::crypto::Signer;
use crate::elf::CodeSegments;
use crate::error::{BuildResult, LayoutError};
use crate::spec::{CpuSpeed, ProcessSpec, SnakeAppMemory, SystemMode};
use crate::string::SizedCString;
use crate::titleid::TitleId;

pub const EXHEADER_SIZE: usize = 0x400;
const MAX_KERNEL_DESCS: usize = 28;
const MAX_INTERRUPTS: usize = 32;
const MAX_SVC: u8 = 0x7D;

const PREFIX_INTERRUPT: u32 = 0xE000_0000;
const PREFIX_SVC: u32 = 0xF000_0000;
const PREFIX_KERNEL_VERSION: u32 = 0xFC00_0000;
const PREFIX_HANDLE_TABLE: u32 = 0xFE00_0000;
const PREFIX_KERNEL_FLAGS: u32 = 0xFF00_0000;
const PREFIX_MAPPING_STATIC: u32 = 0xFF80_0000;
const PREFIX_MAPPING_IO: u32 = 0xFFC0_0000;

pub struct StaticMapping {
    pub start: u32,
    pub end: u32,
    pub read_only: bool,
}

pub struct IoMapping {
    pub start: u32,
}

/// Everything the kernel-capability packer needs beyond what's already in
/// [`crate::spec::RightsConfig`].
pub struct KernelCapInput<'a> {
    pub svc_numbers: &'a [u8],
    pub interrupts: &'a [u16],
    pub kernel_version: (u8, u8),
    pub handle_table_size: u32,
    pub kernel_flags: u32,
    pub memory_type: u8,
    pub static_mappings: &'a [StaticMapping],
    pub io_mappings: &'a [IoMapping],
}

/// Packs up to 28 kernel-capability descriptors in the fixed commit order:
/// SVC masks, interrupts, I/O mappings, static mappings, kernel flags,
/// handle table size, kernel version.
pub fn pack_kernel_descriptors(input: &KernelCapInput) -> BuildResult<[u32; MAX_KERNEL_DESCS]> {
    let mut out = Vec::with_capacity(MAX_KERNEL_DESCS);

    // SVC masks: 24 bits per descriptor, bucket index in bits 24-26.
    let mut svc_buckets = [0u32; 4];
    for &svc in input.svc_numbers {
        if svc > MAX_SVC {
            return Err(LayoutError::SvcOutOfRange(svc).into());
        }
        let bucket = (svc / 24) as usize;
        let bit = svc % 24;
        svc_buckets[bucket] |= 1 << bit;
    }
    for (bucket, mask) in svc_buckets.iter().enumerate() {
        if *mask != 0 {
            out.push(PREFIX_SVC | ((bucket as u32) << 24) | mask);
        }
    }

    // Interrupts: 4 packed 7-bit numbers per descriptor.
    if input.interrupts.len() > MAX_INTERRUPTS {
        return Err(LayoutError::TooManyInterrupts(input.interrupts.len()).into());
    }
    for chunk in input.interrupts.chunks(4) {
        let mut desc = 0xFFFF_FFFFu32;
        for (i, &num) in chunk.iter().enumerate() {
            if num > 0x7F {
                return Err(LayoutError::InterruptOutOfRange(num).into());
            }
            let shift = i * 7;
            desc &= !(0x7F << shift);
            desc |= (num as u32) << shift;
        }
        desc = (desc & 0x0FFF_FFFF) | PREFIX_INTERRUPT;
        out.push(desc);
    }

    // I/O mappings: single descriptor per mapping, page number only.
    for m in input.io_mappings {
        out.push(PREFIX_MAPPING_IO | (m.start >> 12));
    }

    // Static mappings: one or two descriptors per entry.
    for m in input.static_mappings {
        let valid_end = (m.end & 0xFFF) != 0xFFF && m.end != 0;
        let start_desc = PREFIX_MAPPING_STATIC | (m.start >> 12) | if m.read_only { 1 << 20 } else { 0 };
        out.push(start_desc);
        if !valid_end {
            let end_page = (m.start + 0x1000) >> 12;
            out.push(PREFIX_MAPPING_STATIC | end_page | (1 << 20));
        } else {
            let aligned_end = crate::align_up(m.end + 1, 0x1000);
            if aligned_end > m.start {
                out.push(PREFIX_MAPPING_STATIC | (aligned_end >> 12) | (1 << 20));
            }
        }
    }

    // Kernel flags + memory type nibble.
    out.push(PREFIX_KERNEL_FLAGS | (input.kernel_flags & 0xFF) | ((input.memory_type as u32 & 0xF) << 8));

    // Handle table size: 19-bit value.
    out.push(PREFIX_HANDLE_TABLE | (input.handle_table_size & 0x7_FFFF));

    // Kernel release version: major<<8 | minor.
    let version = ((input.kernel_version.0 as u32) << 8) | input.kernel_version.1 as u32;
    out.push(PREFIX_KERNEL_VERSION | version);

    if out.len() > MAX_KERNEL_DESCS {
        return Err(LayoutError::TooManyKernelDescriptors(out.len()).into());
    }

    let mut descs = [0xFFFF_FFFFu32; MAX_KERNEL_DESCS];
    descs[..out.len()].copy_from_slice(&out);
    Ok(descs)
}

pub struct SaveIdPacking {
    pub other_user_save_ids: u64,
    pub extdata_id: u64,
    pub fs_rights_extra_flags: u64,
}

const USE_EXTENDED_SAVEDATA_ACCESS_CONTROL: u64 = 1 << 57;

/// Packs save-data IDs into `other_user_save_ids`/`extdata_id` under one of
/// three mutually exclusive modes (default, with-extdata, extended ACL).
pub fn pack_save_ids(
    program_id: u64,
    save: &crate::spec::SaveDataConfig,
) -> SaveIdPacking {
    fn pack3(ids: &[u32]) -> u64 {
        let mut v = 0u64;
        for (i, id) in ids.iter().take(3).enumerate() {
            v |= ((*id as u64) & 0xF_FFFF) << (20 * (2 - i));
        }
        v
    }

    if !save.accessible_save_ids.is_empty() {
        let first3 = &save.accessible_save_ids[..save.accessible_save_ids.len().min(3)];
        let last3 = &save.accessible_save_ids[save.accessible_save_ids.len().min(3)..];
        return SaveIdPacking {
            other_user_save_ids: pack3(first3),
            extdata_id: pack3(last3),
            fs_rights_extra_flags: USE_EXTENDED_SAVEDATA_ACCESS_CONTROL,
        };
    }

    let extdata_id = save
        .extdata_id
        .unwrap_or_else(|| (program_id >> 8) & 0xFF_FFFF);

    let mut other = pack3(&save.other_user_save_ids);
    if save.use_other_variation_save_data {
        other |= 1 << 60;
    }

    SaveIdPacking {
        other_user_save_ids: other,
        extdata_id,
        fs_rights_extra_flags: 0,
    }
}

/// Inputs beyond [`ProcessSpec`] that the assembler needs: ELF-derived code
/// layout, resolved title ids, and the process name/stack size overrides.
pub struct ExHeaderInput<'a> {
    pub spec: &'a ProcessSpec,
    pub code: &'a CodeSegments,
    pub process_name: &'a str,
    pub program_id: TitleId,
    pub kernel_title_id: TitleId,
    pub save_data_size: u64,
    pub resource_limits: &'a [u16; 16],
    pub resource_limit_category: u8,
    pub desc_version: u8,
}

fn system_mode_bits(mode: SystemMode) -> u8 {
    match mode {
        SystemMode::Prod64Mb => 0,
        SystemMode::Dev396Mb => 2,
        SystemMode::Dev280Mb => 3,
        SystemMode::Dev196Mb => 4,
    }
}

fn system_mode_ext_bits(mode: SnakeAppMemory) -> u8 {
    match mode {
        SnakeAppMemory::Legacy => 0,
        SnakeAppMemory::Mb124 => 1,
        SnakeAppMemory::Mb178 => 2,
    }
}

/// Builds the 0x400-byte Extended Header: a 0x200-byte System Control Info
/// (process name, code-segment layout, dependency list, save data size)
/// followed by a 0x200-byte Access Control Info (local/kernel/arm9
/// capabilities).
pub fn build_exheader(input: &ExHeaderInput) -> BuildResult<[u8; EXHEADER_SIZE]> {
    let mut buf = [0u8; EXHEADER_SIZE];

    // --- System Control Info (0x200 bytes at offset 0) ---
    let name: SizedCString<8> = input.process_name.try_into()?;
    buf[0..8].copy_from_slice(name.data());
    // flags byte at 0xD: is_code_compressed:1 | is_sdmc_title:1, both unset.
    buf[0xD] = 0;
    // remaster version at 0xE (u16 LE), left at 0.

    write_code_segment(&mut buf, 0x10, input.code.text.len() as u32, input.code.text_vaddr);
    buf[0x1C..0x20].copy_from_slice(&input.code.stack_size.to_le_bytes());
    write_code_segment(&mut buf, 0x20, input.code.rodata.len() as u32, input.code.rodata_vaddr);
    write_code_segment(&mut buf, 0x30, input.code.data.len() as u32, input.code.data_vaddr);
    buf[0x3C..0x40].copy_from_slice(&input.code.bss_size.to_le_bytes());

    for (i, dep) in input.spec.process.dependencies.iter().take(48).enumerate() {
        let off = 0x40 + i * 8;
        buf[off..off + 8].copy_from_slice(&dep.to_u64().to_le_bytes());
    }

    buf[0x1C0..0x1C8].copy_from_slice(&input.save_data_size.to_le_bytes());
    // jump id at 0x1C8..0x1D0 left at 0; reserved 0x1D0..0x200.

    // --- Arm11LocalCapabilities (0x170 bytes at offset 0x200) ---
    const LOCAL_BASE: usize = 0x200;
    buf[LOCAL_BASE..LOCAL_BASE + 8].copy_from_slice(&input.program_id.to_u64().to_le_bytes());
    let kernel_low28 = (input.kernel_title_id.to_u64() & 0x0FFF_FFFF) as u32;
    buf[LOCAL_BASE + 8..LOCAL_BASE + 12].copy_from_slice(&kernel_low28.to_le_bytes());

    let cache_byte = if input.spec.process.enable_l2_cache { 1 } else { 0 }
        | (match input.spec.process.snake_cpu_speed {
            CpuSpeed::Mhz268 => 0,
            CpuSpeed::Mhz804 => 1,
        } << 1);
    buf[LOCAL_BASE + 12] = cache_byte;

    buf[LOCAL_BASE + 13] = system_mode_ext_bits(input.spec.process.snake_app_memory) & 0xF;

    let proc_byte = (input.spec.process.ideal_processor & 0x3)
        | ((input.spec.process.affinity_mask & 0x3) << 2)
        | ((system_mode_bits(input.spec.process.app_memory) & 0xF) << 4);
    buf[LOCAL_BASE + 14] = proc_byte;

    buf[LOCAL_BASE + 15] = input.spec.process.priority as u8;

    for (i, limit) in input.resource_limits.iter().enumerate() {
        let off = LOCAL_BASE + 0x10 + i * 2;
        buf[off..off + 2].copy_from_slice(&limit.to_le_bytes());
    }

    let save_ids = pack_save_ids(input.program_id.to_u64(), &input.spec.save_data);
    buf[LOCAL_BASE + 0x30..LOCAL_BASE + 0x38].copy_from_slice(&save_ids.extdata_id.to_le_bytes());

    for (i, id) in input.spec.save_data.system_save_ids.iter().take(2).enumerate() {
        let off = LOCAL_BASE + 0x38 + i * 4;
        buf[off..off + 4].copy_from_slice(&id.to_le_bytes());
    }

    buf[LOCAL_BASE + 0x40..LOCAL_BASE + 0x48]
        .copy_from_slice(&save_ids.other_user_save_ids.to_le_bytes());

    let mut fs_rights = input.spec.rights.fs_access.bits() as u64;
    fs_rights |= save_ids.fs_rights_extra_flags;
    buf[LOCAL_BASE + 0x48..LOCAL_BASE + 0x50].copy_from_slice(&fs_rights.to_le_bytes());

    for (i, svc) in input.spec.rights.services.iter().take(34).enumerate() {
        let off = LOCAL_BASE + 0x50 + i * 8;
        let bytes = svc.as_bytes();
        let n = bytes.len().min(8);
        buf[off..off + n].copy_from_slice(&bytes[..n]);
    }

    buf[LOCAL_BASE + 0x16F] = input.resource_limit_category;

    // --- Arm11KernelCapabilities (0x80 bytes at offset 0x370) ---
    const KERNEL_BASE: usize = 0x370;
    let svc_numbers: Vec<u8> = (0..=0x7Du8).collect();
    let kernel_input = KernelCapInput {
        svc_numbers: &svc_numbers,
        interrupts: &[],
        kernel_version: (2, 29),
        handle_table_size: 0x200,
        kernel_flags: 0,
        memory_type: 2,
        static_mappings: &[],
        io_mappings: &input
            .spec
            .rights
            .io_register_mapping
            .iter()
            .map(|m| IoMapping { start: m.start })
            .collect::<Vec<_>>(),
    };
    let descs = pack_kernel_descriptors(&kernel_input)?;
    for (i, d) in descs.iter().enumerate() {
        let off = KERNEL_BASE + i * 4;
        buf[off..off + 4].copy_from_slice(&d.to_le_bytes());
    }

    // --- Arm9AccessControl (0x10 bytes at offset 0x3F0) ---
    const ARM9_BASE: usize = 0x3F0;
    buf[ARM9_BASE..ARM9_BASE + 4]
        .copy_from_slice(&input.spec.rights.arm9_access.bits().to_le_bytes());
    buf[ARM9_BASE + 0xF] = input.desc_version;

    Ok(buf)
}

fn write_code_segment(buf: &mut [u8], offset: usize, size: u32, address: u32) {
    buf[offset..offset + 4].copy_from_slice(&address.to_le_bytes());
    let page_num = crate::align_up(size, 0x1000) / 0x1000;
    buf[offset + 4..offset + 8].copy_from_slice(&page_num.to_le_bytes());
    buf[offset + 8..offset + 12].copy_from_slice(&size.to_le_bytes());
}

/// Derives the 0x400-byte Access Descriptor from an already-built Extended
/// Header: a signed copy of the capability blocks with `ideal_processor`
/// rewritten to a bitmap and `thread_priority` forced to 0.
pub fn build_access_descriptor(
    exheader: &[u8; EXHEADER_SIZE],
    ncch_modulus: &[u8; 0x100],
    signer: &Signer,
) -> BuildResult<[u8; EXHEADER_SIZE]> {
    let mut buf = [0u8; EXHEADER_SIZE];
    buf[0x100..0x200].copy_from_slice(ncch_modulus);
    buf[0x200..0x400].copy_from_slice(&exheader[0x200..0x400]);

    // ideal_processor/affinity_mask/system_mode byte lives at ExHeader+0x7E,
    // i.e. buf offset 0x200 + 0x0E = 0x20E.
    let proc_byte = buf[0x20E];
    let ideal_processor = proc_byte & 0x3;
    let rest = proc_byte & !0x3;
    buf[0x20E] = rest | (1u8 << ideal_processor);

    // thread_priority (signed byte) lives right after, at 0x20F.
    buf[0x20F] = 0;

    let signature = signer.sign(&buf[0x100..0x400])?;
    buf[0x0..0x100].copy_from_slice(&signature);

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_slots_are_all_ones() {
        let input = KernelCapInput {
            svc_numbers: &[],
            interrupts: &[],
            kernel_version: (2, 29),
            handle_table_size: 0x200,
            kernel_flags: 0,
            memory_type: 0,
            static_mappings: &[],
            io_mappings: &[],
        };
        let descs = pack_kernel_descriptors(&input).unwrap();
        assert_eq!(descs[MAX_KERNEL_DESCS - 1], PREFIX_KERNEL_VERSION | (2 << 8 | 29));
        assert_eq!(descs[0], 0xFFFF_FFFF);
    }

    #[test]
    fn rejects_svc_above_max() {
        let input = KernelCapInput {
            svc_numbers: &[0x7E],
            interrupts: &[],
            kernel_version: (2, 29),
            handle_table_size: 0x200,
            kernel_flags: 0,
            memory_type: 0,
            static_mappings: &[],
            io_mappings: &[],
        };
        assert!(pack_kernel_descriptors(&input).is_err());
    }

    #[test]
    fn rewrites_ideal_processor_as_bitmap() {
        let exheader = [0u8; EXHEADER_SIZE];
        let modulus = [0u8; 0x100];
        let signer = Signer::none();
        let desc = build_access_descriptor(&exheader, &modulus, &signer).unwrap();
        // ideal_processor=0 in source -> bit 0 set in the copy.
        assert_eq!(desc[0x20E] & 0x1, 0x1);
    }
}
