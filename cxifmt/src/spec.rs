//! Interprets the YAML process-capability spec into a [`ProcessSpec`],
//! resolving dependency names to title IDs and permission names to bitflags.

use bitflags::bitflags;
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::error::{BuildResult, SpecError};
use crate::titleid::TitleId;

const SYSMODULE_TID_HIGH: u64 = 0x0004_0130_0000_0000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsAccess: u32 {
        const CATEGORY_SYSTEM_APPLICATION = 1 << 0;
        const CATEGORY_HARDWARE_CHECK     = 1 << 1;
        const CATEGORY_FILESYSTEM_TOOL    = 1 << 2;
        const DEBUG                       = 1 << 3;
        const TWL_CARD_BACKUP             = 1 << 4;
        const TWL_NAND_DATA               = 1 << 5;
        const BOSS                        = 1 << 6;
        const DIRECT_SDMC                 = 1 << 7;
        const CORE                        = 1 << 8;
        const CTR_NAND_RO                 = 1 << 9;
        const CTR_NAND_RW                 = 1 << 10;
        const CTR_NAND_RO_WRITE           = 1 << 11;
        const CATEGORY_SYSTEM_SETTINGS    = 1 << 12;
        const CARDBOARD                   = 1 << 13;
        const EXPORT_IMPORT_IVS           = 1 << 14;
        const DIRECT_SDMC_WRITE           = 1 << 15;
        const SWITCH_CLEANUP              = 1 << 16;
        const SAVE_DATA_MOVE              = 1 << 17;
        const SHOP                        = 1 << 18;
        const SHELL                       = 1 << 19;
        const CATEGORY_HOME_MENU          = 1 << 20;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KernelFlags: u32 {
        const PERMIT_DEBUG                 = 1 << 0;
        const FORCE_DEBUG                  = 1 << 1;
        const CAN_USE_NON_ALPHANUM         = 1 << 2;
        const CAN_WRITE_SHARED_PAGE        = 1 << 3;
        const CAN_USE_PRIVILEGED_PRIORITY  = 1 << 4;
        const PERMIT_MAIN_FUNCTION_ARGUMENT = 1 << 5;
        const CAN_SHARE_DEVICE_MEMORY      = 1 << 6;
        const RUNNABLE_ON_SLEEP            = 1 << 7;
        // bits 8-11 are the memory-type nibble, not flag bits
        const SPECIAL_MEMORY_LAYOUT        = 1 << 12;
        const CAN_ACCESS_CORE2             = 1 << 13;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Arm9Rights: u32 {
        const MOUNT_NAND            = 1 << 0;
        const MOUNT_NAND_RO_WRITE   = 1 << 1;
        const MOUNT_TWLN            = 1 << 2;
        const MOUNT_WNAND           = 1 << 3;
        const MOUNT_CARD_SPI        = 1 << 4;
        const USE_SDIF3             = 1 << 5;
        const CREATE_SEED           = 1 << 6;
        const USE_CARD_SPI          = 1 << 7;
        const USE_DIRECT_SDMC       = 1 << 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    Prod64Mb,
    Dev396Mb,
    Dev280Mb,
    Dev196Mb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnakeAppMemory {
    Legacy,
    Mb124,
    Mb178,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuSpeed {
    Mhz268,
    Mhz804,
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub ideal_processor: u8,
    pub affinity_mask: u8,
    pub app_memory: SystemMode,
    pub snake_app_memory: SnakeAppMemory,
    pub enable_l2_cache: bool,
    pub priority: i8,
    pub snake_cpu_speed: CpuSpeed,
    pub dependencies: Vec<TitleId>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            ideal_processor: 0,
            affinity_mask: 0,
            app_memory: SystemMode::Prod64Mb,
            snake_app_memory: SnakeAppMemory::Legacy,
            enable_l2_cache: false,
            priority: 0x30,
            snake_cpu_speed: CpuSpeed::Mhz268,
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaveDataConfig {
    pub save_data_size: u64,
    pub system_save_ids: Vec<u32>,
    pub use_extdata: bool,
    pub extdata_id: Option<u64>,
    pub use_other_variation_save_data: bool,
    pub other_user_save_ids: Vec<u32>,
    pub accessible_save_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct MemRange {
    pub start: u32,
    pub end: u32,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RightsConfig {
    pub services: Vec<String>,
    pub io_register_mapping: Vec<MemRange>,
    pub memory_mapping: Vec<MemRange>,
    pub fs_access: FsAccess,
    pub kernel_flags: KernelFlags,
    pub arm9_access: Arm9Rights,
}

impl Default for FsAccess {
    fn default() -> Self {
        FsAccess::empty()
    }
}
impl Default for KernelFlags {
    fn default() -> Self {
        KernelFlags::empty()
    }
}
impl Default for Arm9Rights {
    fn default() -> Self {
        Arm9Rights::empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub process: ProcessConfig,
    pub save_data: SaveDataConfig,
    pub rights: RightsConfig,
}

/// Parses a full YAML spec document, folding it on top of compiled-in
/// defaults (mirroring `setDefaults -> parseSpecFile` in the reference
/// tool).
pub fn parse(yaml: &str) -> BuildResult<ProcessSpec> {
    let root: Value = serde_yaml::from_str(yaml).map_err(SpecError::Yaml)?;
    let mut spec = ProcessSpec::default();

    let Value::Mapping(map) = root else {
        return Ok(spec);
    };

    for (k, v) in &map {
        let key = k.as_str().unwrap_or_default();
        match key {
            "ProcessConfig" => parse_process_config(v, &mut spec.process)?,
            "SaveData" => parse_save_data(v, &mut spec.save_data)?,
            "Rights" => parse_rights(v, &mut spec.rights)?,
            other => return Err(SpecError::UnknownKey(other.to_string()).into()),
        }
    }

    Ok(spec)
}

fn as_mapping(v: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    if let Value::Mapping(m) = v {
        for (k, v) in m {
            if let Some(s) = k.as_str() {
                out.insert(s.to_string(), v.clone());
            }
        }
    }
    out
}

fn parse_bool(v: &Value) -> BuildResult<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(SpecError::InvalidBoolean(s.clone()).into()),
        },
        _ => Err(SpecError::InvalidBoolean(format!("{v:?}")).into()),
    }
}

fn parse_process_config(v: &Value, cfg: &mut ProcessConfig) -> BuildResult<()> {
    let map = as_mapping(v);
    for (key, val) in &map {
        match key.as_str() {
            "IdealProcessor" => cfg.ideal_processor = val.as_u64().unwrap_or(0) as u8,
            "AffinityMask" => cfg.affinity_mask = val.as_u64().unwrap_or(0) as u8,
            "AppMemory" => {
                let s = val.as_str().unwrap_or_default();
                cfg.app_memory = match s {
                    "64MB" => SystemMode::Prod64Mb,
                    "72MB" => SystemMode::Dev396Mb,
                    "80MB" => SystemMode::Dev280Mb,
                    "96MB" => SystemMode::Dev196Mb,
                    other => return Err(SpecError::InvalidAppMemory(other.to_string()).into()),
                };
            }
            "SnakeAppMemory" => {
                let s = val.as_str().unwrap_or_default();
                cfg.snake_app_memory = match s {
                    "Legacy" => SnakeAppMemory::Legacy,
                    "124MB" => SnakeAppMemory::Mb124,
                    "178MB" => SnakeAppMemory::Mb178,
                    other => return Err(SpecError::InvalidAppMemory(other.to_string()).into()),
                };
            }
            "EnableL2Cache" => cfg.enable_l2_cache = parse_bool(val)?,
            "Priority" => cfg.priority = val.as_i64().unwrap_or(0) as i8,
            "SnakeCpuSpeed" => {
                let s = val.as_str().unwrap_or_default();
                cfg.snake_cpu_speed = match s {
                    "268MHz" => CpuSpeed::Mhz268,
                    "804MHz" => CpuSpeed::Mhz804,
                    other => return Err(SpecError::InvalidAppMemory(other.to_string()).into()),
                };
            }
            "Dependency" => {
                if let Value::Sequence(seq) = val {
                    for item in seq {
                        let name = item.as_str().unwrap_or_default();
                        cfg.dependencies.push(resolve_dependency(name)?);
                    }
                }
                if cfg.dependencies.len() > 0x30 {
                    return Err(SpecError::TooManyDependencies(cfg.dependencies.len()).into());
                }
            }
            other => return Err(SpecError::UnknownKey(other.to_string()).into()),
        }
    }
    Ok(())
}

fn resolve_dependency(name: &str) -> BuildResult<TitleId> {
    const NAMES: &[(&str, u64)] = &[
        ("sm", 0x10),
        ("fs", 0x11),
        ("pm", 0x12),
        ("loader", 0x13),
        ("pxi", 0x14),
        ("am", 0x15),
        ("camera", 0x16),
        ("cfg", 0x17),
        ("codec", 0x18),
        ("dmnt", 0x19),
        ("dsp", 0x1a),
        ("gpio", 0x1b),
        ("gsp", 0x1c),
        ("hid", 0x1d),
        ("i2c", 0x1e),
        ("mcu", 0x1f),
        ("mic", 0x20),
        ("pdn", 0x21),
        ("ptm", 0x22),
        ("spi", 0x23),
        ("ac", 0x24),
        ("cecd", 0x26),
        ("csnd", 0x27),
        ("dlp", 0x28),
        ("http", 0x29),
        ("mp", 0x2a),
        ("ndm", 0x2b),
        ("nim", 0x2c),
        ("nwm", 0x2d),
        ("socket", 0x2e),
        ("ssl", 0x2f),
        ("ps", 0x30),
        ("friends", 0x31),
        ("ir", 0x32),
        ("boss", 0x33),
        ("news", 0x34),
        ("debugger", 0x35),
        ("ro", 0x37),
        ("act", 0x38),
        ("nfc", 0x40),
        ("mvd", 0x41),
        ("qtm", 0x42),
    ];

    if let Some(hex) = name.strip_prefix("0x") {
        let id = u64::from_str_radix(hex, 16)
            .map_err(|_| SpecError::BadDependencyLiteral(name.to_string()))?;
        return Ok(resolve_hex_dependency(id));
    }

    for (n, module_id) in NAMES {
        if *n == name {
            let mut id = SYSMODULE_TID_HIGH | 0x02 | (module_id << 8);
            if *n == "mvd" || *n == "qtm" {
                id |= 0x2000_0000;
            }
            return Ok(TitleId::new(id));
        }
    }
    Err(SpecError::UnknownDependency(name.to_string()).into())
}

fn resolve_hex_dependency(id: u64) -> TitleId {
    if (id & 0xffff_ffff_0000_0000) == SYSMODULE_TID_HIGH {
        TitleId::new(id)
    } else if (id & 0xffff_ffff_ff0f_ffff) != 0 {
        TitleId::new(SYSMODULE_TID_HIGH | (id & 0xffff_ffff))
    } else {
        TitleId::new(SYSMODULE_TID_HIGH | 0x02 | ((id & 0xff_ffff) << 8))
    }
}

fn parse_save_data(v: &Value, cfg: &mut SaveDataConfig) -> BuildResult<()> {
    let map = as_mapping(v);
    for (key, val) in &map {
        match key.as_str() {
            "SaveDataSize" => {
                let size = parse_size_suffix(val)?;
                if size % 0x10000 != 0 {
                    return Err(SpecError::UnalignedSaveDataSize(size).into());
                }
                cfg.save_data_size = size;
            }
            "SystemSaveIds" => cfg.system_save_ids = parse_u32_seq(val, 2)?,
            "UseExtdata" => cfg.use_extdata = parse_bool(val)?,
            "ExtDataId" => {
                let s = val.as_str().unwrap_or_default();
                let hex = s.strip_prefix("0x").unwrap_or(s);
                cfg.extdata_id = Some(
                    u64::from_str_radix(hex, 16)
                        .map_err(|_| SpecError::BadDependencyLiteral(s.to_string()))?,
                );
            }
            "UseOtherVariationSaveData" => cfg.use_other_variation_save_data = parse_bool(val)?,
            "OtherUserSaveIds" => cfg.other_user_save_ids = parse_u32_seq(val, 3)?,
            "AccessibleSaveIds" => cfg.accessible_save_ids = parse_u32_seq(val, 6)?,
            other => return Err(SpecError::UnknownKey(other.to_string()).into()),
        }
    }
    if !cfg.accessible_save_ids.is_empty() {
        if cfg.use_extdata || cfg.extdata_id.is_some() {
            return Err(SpecError::AccessibleSaveIdsConflict("Extdata").into());
        }
        if !cfg.other_user_save_ids.is_empty() {
            return Err(SpecError::AccessibleSaveIdsConflict("OtherUserSaveIds").into());
        }
    }
    Ok(())
}

fn parse_u32_seq(val: &Value, max: usize) -> BuildResult<Vec<u32>> {
    let mut out = Vec::new();
    if let Value::Sequence(seq) = val {
        for item in seq {
            let n = match item {
                Value::Number(n) => n.as_u64().unwrap_or(0) as u32,
                Value::String(s) => {
                    let hex = s.strip_prefix("0x").unwrap_or(s);
                    u32::from_str_radix(hex, 16)
                        .map_err(|_| SpecError::BadDependencyLiteral(s.clone()))?
                }
                _ => 0,
            };
            out.push(n);
        }
    }
    if out.len() > max {
        return Err(SpecError::TooManyDependencies(out.len()).into());
    }
    Ok(out)
}

fn parse_size_suffix(val: &Value) -> BuildResult<u64> {
    let s = match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => return Ok(n.as_u64().unwrap_or(0)),
        _ => return Err(SpecError::BadSizeSuffix(format!("{val:?}")).into()),
    };
    let lower = s.to_lowercase();
    let (num_part, mult) = if let Some(p) = lower.strip_suffix("kb").or(lower.strip_suffix('k')) {
        (p, 1024u64)
    } else if let Some(p) = lower.strip_suffix("mb").or(lower.strip_suffix('m')) {
        (p, 1024 * 1024)
    } else {
        (lower.as_str(), 1u64)
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|_| SpecError::BadSizeSuffix(s.clone()))?;
    Ok(num * mult)
}

fn parse_rights(v: &Value, cfg: &mut RightsConfig) -> BuildResult<()> {
    let map = as_mapping(v);
    for (key, val) in &map {
        match key.as_str() {
            "Services" => {
                if let Value::Sequence(seq) = val {
                    for item in seq {
                        if let Some(s) = item.as_str() {
                            cfg.services.push(s.to_string());
                        }
                    }
                    if cfg.services.len() > 32 {
                        log::warn!(
                            "{} services registered, only the first 32 slots get real services",
                            cfg.services.len()
                        );
                    }
                }
            }
            "IORegisterMapping" => cfg.io_register_mapping = parse_ranges(val)?,
            "MemoryMapping" => cfg.memory_mapping = parse_ranges(val)?,
            "FSAccess" => cfg.fs_access = parse_fs_access(val)?,
            "KernelFlags" => cfg.kernel_flags = parse_kernel_flags(val)?,
            "Arm9Access" => cfg.arm9_access = parse_arm9_access(val)?,
            other => return Err(SpecError::UnknownKey(other.to_string()).into()),
        }
    }
    if cfg.fs_access.intersects(FsAccess::DIRECT_SDMC) {
        cfg.arm9_access |= Arm9Rights::USE_DIRECT_SDMC;
    }
    Ok(())
}

fn parse_ranges(val: &Value) -> BuildResult<Vec<MemRange>> {
    let mut out = Vec::new();
    if let Value::Sequence(seq) = val {
        for item in seq {
            let s = item.as_str().unwrap_or_default();
            let read_only = s.ends_with(":r");
            let body = s.trim_end_matches(":r");
            let (start_s, end_s) = body.split_once('-').unwrap_or((body, "0"));
            let start = u32::from_str_radix(start_s.trim_start_matches("0x"), 16)
                .map_err(|_| SpecError::BadDependencyLiteral(s.to_string()))?;
            let end = u32::from_str_radix(end_s.trim_start_matches("0x"), 16)
                .map_err(|_| SpecError::BadDependencyLiteral(s.to_string()))?;
            out.push(MemRange {
                start,
                end,
                read_only,
            });
        }
    }
    Ok(out)
}

fn parse_fs_access(val: &Value) -> BuildResult<FsAccess> {
    let mut out = FsAccess::empty();
    if let Value::Sequence(seq) = val {
        for item in seq {
            let name = item.as_str().unwrap_or_default();
            out |= match name {
                "CategorySystemApplication" => FsAccess::CATEGORY_SYSTEM_APPLICATION,
                "CategoryHardwareCheck" => FsAccess::CATEGORY_HARDWARE_CHECK,
                "CategoryFileSystemTool" => FsAccess::CATEGORY_FILESYSTEM_TOOL,
                "Debug" => FsAccess::DEBUG,
                "TwlCard" | "TwlCardBackup" => FsAccess::TWL_CARD_BACKUP,
                "TwlNand" | "TwlNandData" => FsAccess::TWL_NAND_DATA,
                "Boss" => FsAccess::BOSS,
                "DirectSdmc" | "Sdmc" => FsAccess::DIRECT_SDMC,
                "Core" => FsAccess::CORE,
                "CtrNandRo" | "NandRo" => FsAccess::CTR_NAND_RO,
                "CtrNandRw" | "NandRw" => FsAccess::CTR_NAND_RW,
                "CtrNandRoWrite" | "NandRoWrite" => FsAccess::CTR_NAND_RO_WRITE,
                "CategorySystemSettings" => FsAccess::CATEGORY_SYSTEM_SETTINGS,
                "Cardboard" | "SystemTransfer" => FsAccess::CARDBOARD,
                "ExportInportIvs" => FsAccess::EXPORT_IMPORT_IVS,
                "DirectSdmcWrite" | "SdmcWriteOnly" => FsAccess::DIRECT_SDMC_WRITE,
                "SwitchCleanup" => FsAccess::SWITCH_CLEANUP,
                "SaveDataMove" => FsAccess::SAVE_DATA_MOVE,
                "Shop" => FsAccess::SHOP,
                "Shell" => FsAccess::SHELL,
                "CategoryHomeMenu" => FsAccess::CATEGORY_HOME_MENU,
                other => return Err(SpecError::UnknownFsRight(other.to_string()).into()),
            };
        }
    }
    Ok(out)
}

fn parse_kernel_flags(val: &Value) -> BuildResult<KernelFlags> {
    let mut out = KernelFlags::empty();
    if let Value::Sequence(seq) = val {
        for item in seq {
            let name = item.as_str().unwrap_or_default();
            out |= match name {
                "PermitDebug" => KernelFlags::PERMIT_DEBUG,
                "ForceDebug" => KernelFlags::FORCE_DEBUG,
                "CanUseNonAlphaNum" => KernelFlags::CAN_USE_NON_ALPHANUM,
                "CanWriteSharedPage" => KernelFlags::CAN_WRITE_SHARED_PAGE,
                "CanUsePriviligedPriority" => KernelFlags::CAN_USE_PRIVILEGED_PRIORITY,
                "PermitMainFunctionArgument" => KernelFlags::PERMIT_MAIN_FUNCTION_ARGUMENT,
                "CanShareDeviceMemory" => KernelFlags::CAN_SHARE_DEVICE_MEMORY,
                "RunnableOnSleep" => KernelFlags::RUNNABLE_ON_SLEEP,
                "SpecialMemoryLayout" => KernelFlags::SPECIAL_MEMORY_LAYOUT,
                "CanAccessCore2" => KernelFlags::CAN_ACCESS_CORE2,
                other => return Err(SpecError::UnknownKernelFlag(other.to_string()).into()),
            };
        }
    }
    Ok(out)
}

fn parse_arm9_access(val: &Value) -> BuildResult<Arm9Rights> {
    let mut out = Arm9Rights::empty();
    if let Value::Sequence(seq) = val {
        for item in seq {
            let name = item.as_str().unwrap_or_default();
            out |= match name {
                "MountNand" => Arm9Rights::MOUNT_NAND,
                "MountNandROWrite" => Arm9Rights::MOUNT_NAND_RO_WRITE,
                "MountTwlN" => Arm9Rights::MOUNT_TWLN,
                "MountWNand" => Arm9Rights::MOUNT_WNAND,
                "MountCardSpi" => Arm9Rights::MOUNT_CARD_SPI,
                "UseSDIF3" => Arm9Rights::USE_SDIF3,
                "CreateSeed" => Arm9Rights::CREATE_SEED,
                "UseCardSpi" => Arm9Rights::USE_CARD_SPI,
                other => return Err(SpecError::UnknownArm9Right(other.to_string()).into()),
            };
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_named_dependency() {
        let tid = resolve_dependency("fs").unwrap();
        assert_eq!(tid.to_u64(), 0x0004_0130_0000_1102);
    }

    #[test]
    fn mvd_sets_extra_bit() {
        let tid = resolve_dependency("mvd").unwrap();
        assert_eq!(tid.to_u64() & 0x2000_0000, 0x2000_0000);
    }

    #[test]
    fn rejects_unaligned_savedata_size() {
        let yaml = "SaveData:\n  SaveDataSize: 100\n";
        let result = parse(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn parses_size_suffix() {
        let yaml = "SaveData:\n  SaveDataSize: 128k\n";
        let spec = parse(yaml).unwrap();
        assert_eq!(spec.save_data.save_data_size, 128 * 1024);
    }

    #[test]
    fn direct_sdmc_grants_arm9_right() {
        let yaml = "Rights:\n  FSAccess:\n    - DirectSdmc\n";
        let spec = parse(yaml).unwrap();
        assert!(spec.rights.arm9_access.contains(Arm9Rights::USE_DIRECT_SDMC));
    }

    #[test]
    fn bare_module_id_keeps_all_24_bits() {
        // 0x200000 has bit 21 set (inside the "free" nibble the disambiguator
        // reserves for bare module ids) and nothing else, so it reaches the
        // bare-id branch; the fix must not truncate it to its low byte (0).
        let tid = resolve_hex_dependency(0x200000);
        assert_eq!(tid.to_u64(), SYSMODULE_TID_HIGH | 0x02 | (0x200000 << 8));
    }

    #[test]
    fn accessible_save_ids_conflicts_with_extdata() {
        let yaml = "SaveData:\n  UseExtdata: true\n  AccessibleSaveIds: [1, 2]\n";
        assert!(parse(yaml).is_err());
    }

    #[test]
    fn accessible_save_ids_conflicts_with_other_user_save_ids() {
        let yaml = "SaveData:\n  OtherUserSaveIds: [1]\n  AccessibleSaveIds: [1, 2]\n";
        assert!(parse(yaml).is_err());
    }
}
