//! ELF Error Types and Result Definitions
//!
//! Every parsing, loading and invocation failure surfaces as one of these
//! variants; nothing is downgraded or silently skipped.

use thiserror::Error;

use crate::mmap::MapError;

/// ELF parsing, loading and invocation errors
#[derive(Debug, Error)]
pub enum ElfError {
    // Format errors: the image violates a structural invariant.
    #[error("invalid ELF magic number")]
    InvalidMagic,
    #[error("unsupported ELF class")]
    UnsupportedClass,
    #[error("unsupported endianness")]
    UnsupportedEndian,
    #[error("unsupported machine type {0:#x}")]
    UnsupportedMachine(u16),
    #[error("unsupported ELF file type {0:#x}")]
    UnsupportedFileType(u16),
    #[error("{0} does not fit in the image")]
    Truncated(&'static str),
    #[error("unexpected {0} entry size")]
    BadEntrySize(&'static str),
    #[error("file has no section name string table")]
    NoSectionNameTable,
    #[error("no section matches the {0}")]
    MissingSection(&'static str),
    #[error("multiple sections match the {0}")]
    AmbiguousSection(&'static str),
    #[error("section size is not a multiple of the element size")]
    MisalignedSectionSize,
    #[error("section entry size does not match the element size")]
    EntrySizeMismatch,
    #[error("malformed string table entry at offset {0}")]
    BadString(usize),
    #[error("too many loadable segments")]
    TooManySegments,
    #[error("segment at {vaddr:#x} does not fit in the image")]
    SegmentOutOfImage { vaddr: u64 },
    #[error("relocation target {offset:#x} is outside the mapped region")]
    RelocationOutOfRange { offset: u64 },
    #[error("virtual address {0:#x} precedes the load base")]
    AddressBelowBase(u64),

    // Lookup errors: the caller named something the image cannot supply.
    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),
    #[error("symbol '{0}' matches multiple entries")]
    AmbiguousSymbol(String),
    #[error("relocation references symbol index {0} out of range")]
    BadSymbolIndex(usize),

    // Unsupported constructs: recognized but deliberately unimplemented.
    #[error("REL relocation sections without addends are not supported")]
    RelNotSupported,
    #[error("unsupported relocation type {0}")]
    UnsupportedRelocation(u32),
    #[error("segment at {vaddr:#x} declares zero-fill padding (memsz {memsz:#x}, filesz {filesz:#x})")]
    SegmentPadding { vaddr: u64, memsz: u64, filesz: u64 },
    #[error("image has no loadable segments")]
    NoLoadableSegments,

    // Resource and state errors
    #[error("memory mapping failed: {0}")]
    Mapping(#[from] MapError),
    #[error("no image is currently loaded")]
    NotLoaded,
    #[error("an image is already loaded")]
    AlreadyLoaded,
}

/// Result type for ELF operations
pub type ElfResult<T> = Result<T, ElfError>;
