use crate::error::{BuildError, BuildResult};
use bitflags::bitflags;

/// A 64-bit title ID, split into a unique id, category bits and a platform.
///
/// Used for the CXI's own title id, its dependency list, and the kernel
/// title id embedded in the Arm11KernelCapabilities block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TitleId(u64);

impl TitleId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
    pub fn to_u64(self) -> u64 {
        self.0
    }
    pub fn from_u64(what: u64) -> BuildResult<TitleId> {
        let platform = (what >> 48) & 0xffff;
        if platform >= 0x20 {
            return Err(BuildError::EnumValueOutOfRange("titleid::Platform"));
        }
        Ok(TitleId(what))
    }
    pub fn id(&self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }
    pub fn category(&self) -> Category {
        Category::from_bits_truncate(((self.0 >> 32) & 0xffff) as u16)
    }
    pub fn plat(&self) -> Platform {
        let raw = ((self.0 >> 48) & 0xffff) as u16;
        match raw {
            1 => Platform::Wii,
            3 => Platform::Dsi,
            4 => Platform::Ctr,
            5 => Platform::Wiiu,
            _ => Platform::Ctr,
        }
    }
}

impl From<u64> for TitleId {
    fn from(raw: u64) -> Self {
        TitleId(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u16)]
pub enum Platform {
    Wii = 1,
    Dsi = 3,
    Ctr = 4,
    Wiiu = 5,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Category: u16 {
        const NORMAL = 0x0;
        const DLP_CHILD = 0x1;
        const DEMO = 0x2;
        const CONTENTS = 0x3;
        const ADDON_CONTENTS = 0x4;
        const PATCH = 0x6;
        const CANNOT_EXECUTION = 0x8;
        const SYSTEM = 0x10;
        const REQUIRE_BATCH_UPDATE = 0x20;
        const NOT_REQUIRE_USER_APPROVAL = 0x40;
        const NOT_REQUIRE_RIGHT_FOR_MOUNT = 0x80;
        const CAN_SKIP_CONVERT_JUMP_ID = 0x100;
        const TWL = 0x8000;

        // https://www.3dbrew.org/wiki/Title_list#CTR_System_Titles
        const SYSTEM_APPLICATION = Self::NORMAL.bits() | Self::SYSTEM.bits();
        const SYSTEM_CONTENT = Self::CONTENTS.bits() | Self::CANNOT_EXECUTION.bits() | Self::SYSTEM.bits();
        const SHARED_CONTENT = Self::CONTENTS.bits() | Self::CANNOT_EXECUTION.bits() | Self::NOT_REQUIRE_RIGHT_FOR_MOUNT.bits() | Self::SYSTEM.bits();
        const AUTO_UPDATE_CONTENT = Self::CONTENTS.bits() | Self::CANNOT_EXECUTION.bits() | Self::NOT_REQUIRE_USER_APPROVAL.bits() | Self::NOT_REQUIRE_RIGHT_FOR_MOUNT.bits() | Self::SYSTEM.bits();
        const APPLET = Self::NORMAL.bits() | Self::SYSTEM.bits() | Self::REQUIRE_BATCH_UPDATE.bits();
        const BASE = Self::NORMAL.bits() | Self::SYSTEM.bits() | Self::REQUIRE_BATCH_UPDATE.bits() | Self::CAN_SKIP_CONVERT_JUMP_ID.bits();
        const FIRMWARE = Self::NORMAL.bits() | Self::CANNOT_EXECUTION.bits() | Self::SYSTEM.bits() | Self::REQUIRE_BATCH_UPDATE.bits() | Self::CAN_SKIP_CONVERT_JUMP_ID.bits();

        const _ = !0;
    }
}
