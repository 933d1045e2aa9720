//! elfcall
//!
//! Minimal userspace ELF64 loader: interprets a raw shared-object or
//! relocatable image, maps its loadable segments into fresh executable
//! memory, applies a small set of relocation types and resolves exported
//! symbols for invocation as native functions.

pub mod elf;
pub mod mmap;

pub use elf::{ElfError, ElfLoader, ElfResult, ElfView};
pub use mmap::{MapError, MappedRegion, MmapMapper, RegionMapper};
