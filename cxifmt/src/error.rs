use thiserror::Error;

/// Errors from parsing the input ARM32 ELF into code/rodata/data segments.
#[derive(Error, Debug)]
pub enum ElfError {
    #[error("not a valid ELF file: {0}")]
    Goblin(#[from] goblin::error::Error),
    #[error("expected a 32-bit ELF, got 64-bit")]
    Not32Bit,
    #[error("expected a little-endian ELF")]
    NotLittleEndian,
    #[error("expected an ET_EXEC ELF, got e_type {0}")]
    NotExecutable(u16),
    #[error("expected an ARM ELF, got e_machine {0}")]
    NotArm(u16),
    #[error("ELF has no PT_LOAD segments")]
    NoLoadSegments,
    #[error("more than one PT_LOAD segment maps the same region ({0})")]
    DuplicateSegment(&'static str),
    #[error("ELF has no text (R|X) segment")]
    MissingText,
}

/// Errors from parsing the YAML process-capability spec.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("failed to parse spec YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown top-level key \"{0}\"")]
    UnknownKey(String),
    #[error("unknown dependency module name \"{0}\"")]
    UnknownDependency(String),
    #[error("unknown FSAccess right \"{0}\"")]
    UnknownFsRight(String),
    #[error("unknown KernelFlag \"{0}\"")]
    UnknownKernelFlag(String),
    #[error("unknown Arm9AccessRight \"{0}\"")]
    UnknownArm9Right(String),
    #[error("invalid AppMemory value \"{0}\"")]
    InvalidAppMemory(String),
    #[error("SaveDataSize must be aligned to 64K, got {0:#x}")]
    UnalignedSaveDataSize(u64),
    #[error("failed to parse size suffix in \"{0}\"")]
    BadSizeSuffix(String),
    #[error("too many dependencies: {0} (max 0x30)")]
    TooManyDependencies(usize),
    #[error("invalid hex dependency literal \"{0}\"")]
    BadDependencyLiteral(String),
    #[error("invalid boolean string \"{0}\"")]
    InvalidBoolean(String),
    #[error("AccessibleSaveIds & {0} cannot both be used")]
    AccessibleSaveIdsConflict(&'static str),
}

/// Errors from assembling ExeFS/RomFS/Extended Header layouts.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("too many kernel descriptors ({0}, max 28)")]
    TooManyKernelDescriptors(usize),
    #[error("too many SVC numbers registered, max svc value is 0x7D")]
    SvcOutOfRange(u8),
    #[error("interrupt number {0} out of range (max 0x7F)")]
    InterruptOutOfRange(u16),
    #[error("too many interrupts registered (max {0})")]
    TooManyInterrupts(usize),
    #[error("ExeFS can hold at most 8 files, got {0}")]
    TooManyExefsFiles(usize),
    #[error("file name \"{0}\" too long for ExeFS (max 8 bytes)")]
    ExefsNameTooLong(String),
    #[error("RomFS directory/file name \"{0}\" is empty")]
    EmptyName(String),
    #[error("value {value} does not fit field \"{field}\"")]
    Overflow { field: &'static str, value: u64 },
}

/// Errors from RSA-2048 signing of NCCH-embedded structures.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("failed to parse PKCS#8 PEM key: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),
    #[error("RSA key is not 2048 bits wide")]
    WrongKeySize,
    #[error("RSA signing failed: {0}")]
    Sign(#[from] rsa::Error),
}

/// Top level error returned by every public entry point of this crate.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ELF parsing failed: {0}")]
    Elf(#[from] ElfError),
    #[error("spec parsing failed: {0}")]
    Spec(#[from] SpecError),
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),
    #[error("value out of range for {0} enum")]
    EnumValueOutOfRange(&'static str),
    #[error("string too big to fit into storage")]
    StringTooBig,
}

impl From<std::string::FromUtf16Error> for BuildError {
    fn from(_: std::string::FromUtf16Error) -> Self {
        BuildError::EnumValueOutOfRange("utf16 string")
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// Retained for compatibility with code ported from the reference library;
/// equivalent to [`BuildError`]/[`BuildResult`].
pub type CytrynaError = BuildError;
pub type CytrynaResult<T> = BuildResult<T>;
