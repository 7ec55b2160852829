//! Extracts `.text`/`.rodata`/`.data` segments from an ARM32 ELF executable
//! into the three blobs the ExeFS `.code` file is built from.

use goblin::elf::{header, program_header, Elf};

use crate::error::{BuildResult, ElfError};

/// Segment flag bits the reference toolchain ORs onto `p_flags` to mark a
/// segment as containing the module-id instead of plain rodata. Must be
/// masked off before classifying a segment by its R/W/X bits.
const PF_CTRSDK: u32 = 0x0800_0000;

#[derive(Debug, Clone)]
pub struct CodeSegments {
    pub text: Vec<u8>,
    pub rodata: Vec<u8>,
    pub data: Vec<u8>,
    /// `p_memsz - p_filesz` of the data segment; the zero-initialized tail
    /// the loader has to reserve but that isn't present in the ExeFS blob.
    pub bss_size: u32,
    pub entry_point: u32,
    pub stack_size: u32,
    /// Payload of the trailing R-only segment, if the ELF has one. Ends up
    /// in the NCCH's plain region, not in the ExeFS code blob.
    pub module_id: Vec<u8>,
    /// `p_vaddr` of each segment, as loaded by the ELF, for the Extended
    /// Header's code-segment address fields.
    pub text_vaddr: u32,
    pub rodata_vaddr: u32,
    pub data_vaddr: u32,
}

/// Parses an ARM32 ET_EXEC ELF and classifies its `PT_LOAD` segments into
/// text/rodata/data, following the same `p_flags` convention the reference
/// linker scripts use.
pub fn extract(elf_bytes: &[u8], stack_size: u32) -> BuildResult<CodeSegments> {
    let elf = Elf::parse(elf_bytes).map_err(ElfError::Goblin)?;

    if elf.is_64 {
        return Err(ElfError::Not32Bit.into());
    }
    if elf.little_endian != true {
        return Err(ElfError::NotLittleEndian.into());
    }
    if elf.header.e_type != header::ET_EXEC {
        return Err(ElfError::NotExecutable(elf.header.e_type).into());
    }
    if elf.header.e_machine != header::EM_ARM {
        return Err(ElfError::NotArm(elf.header.e_machine).into());
    }

    let mut text: Option<Vec<u8>> = None;
    let mut rodata: Option<Vec<u8>> = None;
    let mut data: Option<Vec<u8>> = None;
    let mut module_id: Option<Vec<u8>> = None;
    let mut bss_size: u32 = 0;
    let mut text_vaddr: u32 = 0;
    let mut rodata_vaddr: u32 = 0;
    let mut data_vaddr: u32 = 0;

    let loads: Vec<_> = elf
        .program_headers
        .iter()
        .filter(|h| h.p_type == program_header::PT_LOAD)
        .filter(|h| h.p_memsz > 0)
        .collect();

    if loads.is_empty() {
        return Err(ElfError::NoLoadSegments.into());
    }
    let last_idx = loads.len() - 1;

    for (i, hdr) in loads.iter().enumerate() {
        let flags = hdr.p_flags & !PF_CTRSDK;
        let start = hdr.p_offset as usize;
        let end = start + hdr.p_filesz as usize;
        let slice = elf_bytes
            .get(start..end)
            .ok_or(ElfError::Goblin(goblin::error::Error::Malformed(
                "PT_LOAD segment out of file bounds".to_string(),
            )))?
            .to_vec();

        const PF_R: u32 = 4;
        const PF_W: u32 = 2;
        const PF_X: u32 = 1;

        if flags & PF_X != 0 {
            if text.is_some() {
                return Err(ElfError::DuplicateSegment("text").into());
            }
            text_vaddr = hdr.p_vaddr as u32;
            text = Some(slice);
        } else if flags & PF_W != 0 {
            if data.is_some() {
                return Err(ElfError::DuplicateSegment("data").into());
            }
            bss_size = (hdr.p_memsz - hdr.p_filesz) as u32;
            data_vaddr = hdr.p_vaddr as u32;
            data = Some(slice);
        } else if flags & PF_R != 0 {
            // A read-only segment is rodata, unless it's the last PT_LOAD
            // in the file, in which case it holds the appended module-id
            // and lands in the NCCH's plain region instead of ExeFS.
            if i == last_idx {
                if module_id.is_some() {
                    return Err(ElfError::DuplicateSegment("module-id").into());
                }
                module_id = Some(slice);
            } else {
                if rodata.is_some() {
                    return Err(ElfError::DuplicateSegment("rodata").into());
                }
                rodata_vaddr = hdr.p_vaddr as u32;
                rodata = Some(slice);
            }
        }
    }

    let text = text.ok_or(ElfError::MissingText)?;

    Ok(CodeSegments {
        text,
        rodata: rodata.unwrap_or_default(),
        data: data.unwrap_or_default(),
        bss_size,
        entry_point: elf.header.e_entry as u32,
        stack_size,
        module_id: module_id.unwrap_or_default(),
        text_vaddr,
        rodata_vaddr,
        data_vaddr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_arm_machine() {
        // Minimal 64-byte ELF header claiming x86_64; goblin will parse the
        // header fine but extract() must reject it before touching segments.
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        bytes[4] = 1; // ELFCLASS32
        bytes[5] = 1; // ELFDATA2LSB
        bytes[6] = 1; // EV_CURRENT
        bytes[16] = header::ET_EXEC as u8;
        bytes[18] = 0x3e; // EM_X86_64, not EM_ARM
        let result = extract(&bytes, 0x4000);
        assert!(result.is_err());
    }
}
