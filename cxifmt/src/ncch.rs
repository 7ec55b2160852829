//! NCCH header layout and the top-level build orchestrator that ties every
//! other component together into a single `.cxi` file.

use std::path::{Path, PathBuf};

use crate::align_up;
use crate::crypto::{sha256, Signer};
use crate::error::BuildError;
use crate::error::BuildResult;
use crate::exefs::{self, ExeFsFile};
use crate::exheader::{self, ExHeaderInput, EXHEADER_SIZE};
use crate::romfs::{self, ivfc};
use crate::spec;
use crate::string::SizedCString;
use crate::titleid::TitleId;
use crate::{elf, logo};

pub const NCCH_HEADER_SIZE: usize = 0x200;
pub const MEDIA_UNIT: u32 = 0x200;

/// Overrides the CLI accepts on top of the YAML spec and compiled-in
/// defaults.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub unique_id: Option<u32>,
    pub product_code: Option<String>,
    pub title: Option<String>,
}

/// Fully resolved build configuration: defaults folded with CLI overrides.
pub struct BuildConfig {
    pub title_id: u64,
    pub product_code: String,
    pub maker_code: String,
    pub app_title: String,
    pub stack_size: u32,
    pub kernel_title_id: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            title_id: 0x0004_0000_0ff3_ff00,
            product_code: "CTR-P-CTAP".to_string(),
            maker_code: "01".to_string(),
            app_title: "CtrApp".to_string(),
            stack_size: 0x4000,
            kernel_title_id: 0x0004_0138_0000_0002,
        }
    }
}

impl BuildConfig {
    fn apply_overrides(&mut self, overrides: &CliOverrides) -> BuildResult<()> {
        if let Some(unique_id) = overrides.unique_id {
            self.title_id = (self.title_id & 0xFFFF_FF00_0000_0000) | ((unique_id as u64) << 8);
        }
        if let Some(product_code) = &overrides.product_code {
            if product_code.len() > 16 {
                return Err(BuildError::StringTooBig);
            }
            self.product_code = product_code.clone();
        }
        if let Some(title) = &overrides.title {
            if title.len() > 8 {
                return Err(BuildError::StringTooBig);
            }
            self.app_title = title.clone();
        }
        Ok(())
    }
}

/// Every input the orchestrator needs to produce a `.cxi` file.
pub struct BuildInputs<'a> {
    pub elf_bytes: &'a [u8],
    pub spec_yaml: &'a str,
    pub icon: Option<&'a [u8]>,
    pub banner: Option<&'a [u8]>,
    pub romfs_dir: Option<&'a Path>,
    pub overrides: CliOverrides,
    pub signer: Signer,
}

struct Layout {
    logo_offset: u32,
    logo_size_mu: u32,
    plain_offset: u32,
    plain_size_mu: u32,
    exefs_offset: u32,
    exefs_size_mu: u32,
    romfs_offset: u32,
    romfs_size_mu: u32,
    total_size: u32,
}

impl Layout {
    fn compute(logo_len: u32, plain_len: u32, exefs_len: u32, romfs_len: u32) -> Layout {
        // Header + ExHeader + Access Descriptor, fixed and contiguous from
        // offset 0: no explicit offset field covers them.
        let mut cursor = (NCCH_HEADER_SIZE as u32 + 2 * EXHEADER_SIZE as u32) / MEDIA_UNIT;

        let logo_size_mu = align_up(logo_len, MEDIA_UNIT) / MEDIA_UNIT;
        let logo_offset = if logo_len > 0 { cursor } else { 0 };
        cursor += logo_size_mu;

        let plain_size_mu = align_up(plain_len, MEDIA_UNIT) / MEDIA_UNIT;
        let plain_offset = if plain_len > 0 { cursor } else { 0 };
        cursor += plain_size_mu;

        let exefs_size_mu = align_up(exefs_len, MEDIA_UNIT) / MEDIA_UNIT;
        let exefs_offset = cursor;
        cursor += exefs_size_mu;

        let (romfs_offset, romfs_size_mu) = if romfs_len > 0 {
            let byte_cursor = align_up(cursor * MEDIA_UNIT, 0x1000);
            let offset = byte_cursor / MEDIA_UNIT;
            let size_mu = align_up(romfs_len, MEDIA_UNIT) / MEDIA_UNIT;
            cursor = offset + size_mu;
            (offset, size_mu)
        } else {
            (0, 0)
        };

        Layout {
            logo_offset,
            logo_size_mu,
            plain_offset,
            plain_size_mu,
            exefs_offset,
            exefs_size_mu,
            romfs_offset,
            romfs_size_mu,
            total_size: cursor,
        }
    }
}

/// Runs the full build pipeline and returns the finished `.cxi` bytes.
pub fn build_cxi(inputs: &BuildInputs) -> BuildResult<Vec<u8>> {
    log::info!("resolving build configuration");
    let mut config = BuildConfig::default();
    let process_spec = spec::parse(inputs.spec_yaml)?;
    config.apply_overrides(&inputs.overrides)?;

    log::info!("extracting ELF code segments");
    let code = elf::extract(inputs.elf_bytes, config.stack_size)?;
    log::debug!(
        "text={} rodata={} data={} bss={}",
        code.text.len(),
        code.rodata.len(),
        code.data.len(),
        code.bss_size
    );

    log::info!("packing ExeFS");
    let mut files = vec![ExeFsFile {
        name: ".code".to_string(),
        data: page_aligned_code_blob(&code),
    }];
    if let Some(icon) = inputs.icon {
        files.push(ExeFsFile {
            name: "icon".to_string(),
            data: icon.to_vec(),
        });
    }
    if let Some(banner) = inputs.banner {
        files.push(ExeFsFile {
            name: "banner".to_string(),
            data: banner.to_vec(),
        });
    }
    let exefs_bytes = exefs::pack(&files)?;
    let exefs_header_hash = sha256(&exefs_bytes[..0x200]);

    log::info!("building RomFS");
    let romfs_region = match inputs.romfs_dir {
        Some(dir) => {
            let tree = romfs::scan_dir(dir)?;
            let image = romfs::build(&tree)?;
            let ivfc_tree = ivfc::build(&image);
            Some(ivfc::assemble(&ivfc_tree, &image))
        }
        None => None,
    };

    log::info!("assembling extended header");
    let program_id = TitleId::from_u64(config.title_id)?;
    let kernel_title_id = TitleId::from_u64(config.kernel_title_id)?;
    let resource_limits = [0u16; 16];
    let exheader_input = ExHeaderInput {
        spec: &process_spec,
        code: &code,
        process_name: &config.app_title,
        program_id,
        kernel_title_id,
        save_data_size: process_spec.save_data.save_data_size,
        resource_limits: &resource_limits,
        resource_limit_category: 0,
        desc_version: 2,
    };
    let exheader_bytes = exheader::build_exheader(&exheader_input)?;
    let exheader_hash = sha256(&exheader_bytes);

    // The NCCH's own RSA-2048 public modulus lives in the Access Descriptor;
    // without a configured keypair there's nothing to embed, same as the
    // 0xFF-filled signature fallback.
    let ncch_modulus = [0u8; 0x100];
    let access_desc =
        exheader::build_access_descriptor(&exheader_bytes, &ncch_modulus, &inputs.signer)?;

    log::info!("finalizing NCCH layout");
    let layout = Layout::compute(
        logo::CXI_LOGO.len() as u32,
        code.module_id.len() as u32,
        exefs_bytes.len() as u32,
        romfs_region.as_ref().map(|r| r.len() as u32).unwrap_or(0),
    );

    let mut header = [0u8; NCCH_HEADER_SIZE];
    header[0x100..0x104].copy_from_slice(b"NCCH");
    header[0x104..0x108].copy_from_slice(&layout.total_size.to_le_bytes());
    header[0x108..0x110].copy_from_slice(&config.title_id.to_le_bytes());
    let maker_code: SizedCString<2> = config.maker_code.as_str().try_into()?;
    header[0x110..0x112].copy_from_slice(maker_code.data());
    header[0x112..0x114].copy_from_slice(&2u16.to_le_bytes());
    header[0x114..0x118].copy_from_slice(&0u32.to_le_bytes());
    header[0x118..0x120].copy_from_slice(&config.title_id.to_le_bytes());
    header[0x130..0x150].copy_from_slice(&sha256(&logo::CXI_LOGO));

    let product_code: SizedCString<16> = config.product_code.as_str().try_into()?;
    header[0x150..0x160].copy_from_slice(product_code.data());

    header[0x160..0x180].copy_from_slice(&exheader_hash);
    header[0x180..0x184].copy_from_slice(&(EXHEADER_SIZE as u32).to_le_bytes());

    // Flags (0x188..0x190): reserved, reserved, crypto method, content
    // platform (CTR), content type (executable), content unit size log2,
    // bit masks, reserved.
    header[0x18B] = 1;
    header[0x18C] = 2;
    header[0x18D] = 0;
    header[0x18E] = 0x04 | if romfs_region.is_none() { 0x02 } else { 0x00 };

    if layout.plain_size_mu > 0 {
        header[0x190..0x194].copy_from_slice(&layout.plain_offset.to_le_bytes());
        header[0x194..0x198].copy_from_slice(&layout.plain_size_mu.to_le_bytes());
    }

    if layout.logo_size_mu > 0 {
        header[0x198..0x19C].copy_from_slice(&layout.logo_offset.to_le_bytes());
        header[0x19C..0x1A0].copy_from_slice(&layout.logo_size_mu.to_le_bytes());
    }

    header[0x1A0..0x1A4].copy_from_slice(&layout.exefs_offset.to_le_bytes());
    header[0x1A4..0x1A8].copy_from_slice(&layout.exefs_size_mu.to_le_bytes());
    header[0x1A8..0x1AC].copy_from_slice(&1u32.to_le_bytes());
    header[0x1C0..0x1E0].copy_from_slice(&exefs_header_hash);

    if let Some(region) = &romfs_region {
        header[0x1B0..0x1B4].copy_from_slice(&layout.romfs_offset.to_le_bytes());
        header[0x1B4..0x1B8].copy_from_slice(&layout.romfs_size_mu.to_le_bytes());
        let hashed_len = align_up(0x60, MEDIA_UNIT) as usize;
        header[0x1B8..0x1BC]
            .copy_from_slice(&(align_up(0x60, MEDIA_UNIT) / MEDIA_UNIT).to_le_bytes());
        let romfs_hash = sha256(&region[..hashed_len.min(region.len())]);
        header[0x1E0..0x200].copy_from_slice(&romfs_hash);
    }

    let signature = inputs.signer.sign(&header[0x100..0x200])?;
    header[0x0..0x100].copy_from_slice(&signature);

    let total_bytes = layout.total_size as usize * MEDIA_UNIT as usize;
    log::info!("writing output, total size {total_bytes} bytes");
    let mut out = vec![0u8; total_bytes];
    out[..NCCH_HEADER_SIZE].copy_from_slice(&header);
    out[NCCH_HEADER_SIZE..NCCH_HEADER_SIZE + EXHEADER_SIZE].copy_from_slice(&exheader_bytes);
    out[NCCH_HEADER_SIZE + EXHEADER_SIZE..NCCH_HEADER_SIZE + 2 * EXHEADER_SIZE]
        .copy_from_slice(&access_desc);

    if layout.logo_size_mu > 0 {
        let logo_off = layout.logo_offset as usize * MEDIA_UNIT as usize;
        out[logo_off..logo_off + logo::CXI_LOGO.len()].copy_from_slice(&logo::CXI_LOGO);
    }

    if layout.plain_size_mu > 0 {
        let plain_off = layout.plain_offset as usize * MEDIA_UNIT as usize;
        out[plain_off..plain_off + code.module_id.len()].copy_from_slice(&code.module_id);
    }

    let exefs_off = layout.exefs_offset as usize * MEDIA_UNIT as usize;
    out[exefs_off..exefs_off + exefs_bytes.len()].copy_from_slice(&exefs_bytes);

    if let Some(region) = &romfs_region {
        let romfs_off = layout.romfs_offset as usize * MEDIA_UNIT as usize;
        out[romfs_off..romfs_off + region.len()].copy_from_slice(region);
    }

    Ok(out)
}

fn page_aligned_code_blob(code: &elf::CodeSegments) -> Vec<u8> {
    fn padded(data: &[u8]) -> Vec<u8> {
        let page_size = align_up(data.len() as u32, 0x1000) as usize;
        let mut out = vec![0u8; page_size];
        out[..data.len()].copy_from_slice(data);
        out
    }
    let mut out = padded(&code.text);
    out.extend(padded(&code.rodata));
    out.extend(padded(&code.data));
    out
}

/// Reads inputs from disk and runs [`build_cxi`], writing the result to
/// `output_path`.
pub fn build_to_file(
    elf_path: &Path,
    spec_path: &Path,
    output_path: &Path,
    icon_path: Option<&Path>,
    banner_path: Option<&Path>,
    romfs_dir: Option<&Path>,
    overrides: CliOverrides,
    signer: Signer,
) -> BuildResult<()> {
    let elf_bytes = read_file(elf_path)?;
    let spec_yaml = String::from_utf8_lossy(&read_file(spec_path)?).into_owned();
    let icon = icon_path.map(read_file).transpose()?;
    let banner = banner_path.map(read_file).transpose()?;

    let inputs = BuildInputs {
        elf_bytes: &elf_bytes,
        spec_yaml: &spec_yaml,
        icon: icon.as_deref(),
        banner: banner.as_deref(),
        romfs_dir,
        overrides,
        signer,
    };

    let bytes = build_cxi(&inputs)?;
    std::fs::write(output_path, bytes).map_err(|source| BuildError::Io {
        path: output_path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> BuildResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| BuildError::Io {
        path: PathBuf::from(path),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_skips_romfs_when_absent() {
        let layout = Layout::compute(0, 0, 0x200, 0);
        assert_eq!(layout.romfs_offset, 0);
        assert_eq!(layout.romfs_size_mu, 0);
    }

    #[test]
    fn layout_aligns_romfs_to_0x1000() {
        let layout = Layout::compute(0, 0, 0x200, 0x1000);
        let romfs_byte_offset = layout.romfs_offset as u64 * MEDIA_UNIT as u64;
        assert_eq!(romfs_byte_offset % 0x1000, 0);
    }

    #[test]
    fn layout_reserves_header_and_exheader_region() {
        let layout = Layout::compute(0, 0, 0x200, 0);
        assert_eq!(
            layout.exefs_offset,
            (0x200 + 2 * EXHEADER_SIZE as u32) / MEDIA_UNIT
        );
    }

    #[test]
    fn layout_skips_plain_when_no_module_id() {
        let layout = Layout::compute(0, 0, 0x200, 0);
        assert_eq!(layout.plain_offset, 0);
        assert_eq!(layout.plain_size_mu, 0);
    }

    #[test]
    fn minimal_elf_scenario_layout() {
        // text=0x2000 (already page-aligned), rodata=0x400 -> one 0x1000
        // page, data=0x100 -> one 0x1000 page, module-id=0x20; no
        // icon/banner/romfs.
        let code_blob_len = 0x2000 + 0x1000 + 0x1000;
        let exefs_len = 0x200 + code_blob_len; // exefs header + code blob
        let layout = Layout::compute(0, 0x20, exefs_len, 0);
        assert_eq!(layout.plain_size_mu, 1);
        assert_eq!(layout.exefs_offset, layout.plain_offset + layout.plain_size_mu);
        assert_eq!(layout.total_size, 1 + 4 + 1 + exefs_len / MEDIA_UNIT);
    }
}
