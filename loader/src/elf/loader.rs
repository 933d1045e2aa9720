//! ELF Loader
//!
//! Plans the virtual-address footprint of the loadable segments, copies
//! them into a freshly acquired executable region, applies relocation
//! fixups against the relocated base and resolves symbols for typed
//! invocation.

use core::mem;

use elfcall_common::{
    Elf64Rela, R_X86_64_GLOB_DAT, R_X86_64_JUMP_SLOT, R_X86_64_RELATIVE, SHT_REL, SHT_RELA,
};
use log::{debug, trace};

use super::error::{ElfError, ElfResult};
use super::view::ElfView;
use crate::mmap::{page_size, MappedRegion, RegionMapper};

/// Upper bound on planned loadable segments per image
const MAX_LOAD_SEGMENTS: usize = 64;

/// One loadable segment scheduled for copying
#[derive(Debug, Clone, Copy)]
struct SegmentPlan {
    vaddr: u64,
    offset: u64,
    size: u64,
}

/// Page-aligned union of the loadable segments' address ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    /// Lowest loadable virtual address, floored to a page boundary
    pub base: u64,
    /// Mapping length, a whole number of pages
    pub len: usize,
}

/// Loads an ELF image into executable memory and invokes its symbols.
///
/// One load/unload cycle per instance; the mapped region is exclusively
/// owned between the two calls.
pub struct ElfLoader<'a, M: RegionMapper> {
    image: ElfView<'a>,
    mapper: M,
    region: Option<MappedRegion>,
    base_vaddr: u64,
}

impl<'a, M: RegionMapper> ElfLoader<'a, M> {
    pub fn new(image: ElfView<'a>, mapper: M) -> Self {
        ElfLoader {
            image,
            mapper,
            region: None,
            base_vaddr: 0,
        }
    }

    pub fn image(&self) -> &ElfView<'a> {
        &self.image
    }

    pub fn is_loaded(&self) -> bool {
        self.region.is_some()
    }

    /// The mapped region, while loaded
    pub fn region(&self) -> Option<&MappedRegion> {
        self.region.as_ref()
    }

    /// Compute the mapping footprint without acquiring memory.
    pub fn footprint(&self) -> ElfResult<Footprint> {
        let plan = self.plan_segments()?;
        footprint_for_page(&plan, page_size() as u64)
    }

    /// Map the image: plan the footprint, acquire memory, copy the
    /// loadable segments and apply relocation fixups.
    pub fn load(&mut self) -> ElfResult<()> {
        if self.region.is_some() {
            return Err(ElfError::AlreadyLoaded);
        }

        let plan = self.plan_segments()?;
        let footprint = footprint_for_page(&plan, page_size() as u64)?;
        debug!(
            "mapping {} bytes for {} loadable segments (image base {:#x})",
            footprint.len,
            plan.len(),
            footprint.base
        );

        let mut region = self.mapper.acquire(footprint.len)?;
        match populate(&self.image, &plan, footprint.base, &mut region) {
            Ok(()) => {
                self.base_vaddr = footprint.base;
                self.region = Some(region);
                Ok(())
            }
            Err(err) => {
                // Best effort: the fresh region must not outlive the failed
                // load; the original error wins over a release failure.
                let _ = self.mapper.release(region);
                Err(err)
            }
        }
    }

    /// Runtime address of a named symbol in the mapped region.
    pub fn symbol_address(&self, name: &str) -> ElfResult<usize> {
        let region = self.region.as_ref().ok_or(ElfError::NotLoaded)?;
        let sym = self.image.resolve_symbol(name)?;
        let value = sym.st_value;
        let offset = value
            .checked_sub(self.base_vaddr)
            .ok_or(ElfError::AddressBelowBase(value))?;
        Ok(region.base() + offset as usize)
    }

    /// Reinterpret a resolved symbol as a function pointer of type `F`.
    ///
    /// This is the loader's one unchecked boundary: ELF64 symbols carry no
    /// signature metadata, so `F` is entirely the caller's claim.
    ///
    /// # Safety
    /// `F` must be a bare `extern "C"` function-pointer type matching the
    /// symbol's actual signature; calling the result with a mismatched
    /// signature is undefined behavior. The returned pointer is only valid
    /// until `unload`.
    pub unsafe fn symbol<F: Copy>(&self, name: &str) -> ElfResult<F> {
        assert_eq!(
            mem::size_of::<F>(),
            mem::size_of::<usize>(),
            "symbol type must be a bare function pointer"
        );
        let addr = self.symbol_address(name)?;
        trace!("resolved '{}' at {:#x}", name, addr);
        Ok(unsafe { mem::transmute_copy(&addr) })
    }

    /// Release the mapped region. All previously resolved addresses become
    /// invalid.
    pub fn unload(&mut self) -> ElfResult<()> {
        let region = self.region.take().ok_or(ElfError::NotLoaded)?;
        self.mapper.release(region)?;
        Ok(())
    }

    fn plan_segments(&self) -> ElfResult<heapless::Vec<SegmentPlan, MAX_LOAD_SEGMENTS>> {
        let mut plan = heapless::Vec::new();
        for phdr in self.image.program_headers() {
            if !phdr.is_loadable() {
                continue;
            }
            let (vaddr, offset, filesz, memsz) =
                (phdr.p_vaddr, phdr.p_offset, phdr.p_filesz, phdr.p_memsz);
            // Zero-fill padding is unsupported: a segment must be backed
            // byte-for-byte by file content.
            if memsz != filesz {
                return Err(ElfError::SegmentPadding {
                    vaddr,
                    memsz,
                    filesz,
                });
            }
            plan.push(SegmentPlan {
                vaddr,
                offset,
                size: memsz,
            })
            .map_err(|_| ElfError::TooManySegments)?;
        }
        Ok(plan)
    }
}

/// Copy segments and apply relocations into a fresh region.
fn populate(
    image: &ElfView<'_>,
    plan: &[SegmentPlan],
    base: u64,
    region: &mut MappedRegion,
) -> ElfResult<()> {
    copy_segments(image, plan, base, region)?;
    apply_relocations(image, base, region)
}

fn copy_segments(
    image: &ElfView<'_>,
    plan: &[SegmentPlan],
    base: u64,
    region: &mut MappedRegion,
) -> ElfResult<()> {
    for seg in plan {
        let size = seg.size as usize;
        let src = image
            .data()
            .slice(seg.offset as usize, size)
            .ok_or(ElfError::SegmentOutOfImage { vaddr: seg.vaddr })?;
        // In range by construction: the footprint covers every planned
        // segment's full address range.
        let dst_offset = (seg.vaddr - base) as usize;
        trace!(
            "copying {} bytes from image offset {:#x} to region offset {:#x}",
            size,
            seg.offset,
            dst_offset
        );
        region.as_mut_slice()[dst_offset..dst_offset + size].copy_from_slice(src.bytes());
    }
    Ok(())
}

fn apply_relocations(image: &ElfView<'_>, base: u64, region: &mut MappedRegion) -> ElfResult<()> {
    for shdr in image.section_headers() {
        match shdr.sh_type {
            // Addend-less relocations are unsupported and must never be
            // skipped over.
            SHT_REL => return Err(ElfError::RelNotSupported),
            SHT_RELA => {
                let entries: &[Elf64Rela] = image.section_data_as(shdr)?;
                trace!("applying {} relocation entries", entries.len());
                for rela in entries {
                    apply_rela(image, rela, base, region)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn apply_rela(
    image: &ElfView<'_>,
    rela: &Elf64Rela,
    base: u64,
    region: &mut MappedRegion,
) -> ElfResult<()> {
    let value = match rela.kind() {
        // Bind the absolute runtime address of the referenced symbol.
        R_X86_64_GLOB_DAT | R_X86_64_JUMP_SLOT => {
            let index = rela.symbol_index();
            let sym = image
                .symbols()
                .get(index)
                .ok_or(ElfError::BadSymbolIndex(index))?;
            rebase(region.base(), base, sym.st_value)?
        }
        // Base-relative with explicit addend.
        R_X86_64_RELATIVE => rebase(region.base(), base, rela.r_addend as u64)?,
        other => return Err(ElfError::UnsupportedRelocation(other)),
    };

    let offset = rela.r_offset;
    let target = offset
        .checked_sub(base)
        .ok_or(ElfError::RelocationOutOfRange { offset })? as usize;
    let end = target
        .checked_add(mem::size_of::<u64>())
        .ok_or(ElfError::RelocationOutOfRange { offset })?;
    let slot = region
        .as_mut_slice()
        .get_mut(target..end)
        .ok_or(ElfError::RelocationOutOfRange { offset })?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Translate a link-time virtual address into the relocated region.
fn rebase(region_base: usize, base: u64, vaddr: u64) -> ElfResult<u64> {
    let offset = vaddr
        .checked_sub(base)
        .ok_or(ElfError::AddressBelowBase(vaddr))?;
    (region_base as u64)
        .checked_add(offset)
        .ok_or(ElfError::AddressBelowBase(vaddr))
}

/// Compute the page-aligned mapping footprint for a segment plan.
///
/// The base is the lowest virtual address floored to a page boundary; the
/// length always advances to the next boundary past `vaddr_max`, so it
/// strictly exceeds the raw span and undershoots it by less than two pages.
fn footprint_for_page(plan: &[SegmentPlan], page: u64) -> ElfResult<Footprint> {
    if plan.is_empty() {
        return Err(ElfError::NoLoadableSegments);
    }

    let mut vaddr_min = u64::MAX;
    let mut vaddr_max = u64::MIN;
    for seg in plan {
        let end = seg
            .vaddr
            .checked_add(seg.size)
            .ok_or(ElfError::SegmentOutOfImage { vaddr: seg.vaddr })?;
        vaddr_min = vaddr_min.min(seg.vaddr);
        vaddr_max = vaddr_max.max(end);
    }

    let base = vaddr_min - vaddr_min % page;
    let raw = vaddr_max - base;
    let len = raw
        .checked_add(page - raw % page)
        .ok_or(ElfError::SegmentOutOfImage { vaddr: vaddr_max })?;

    let span = vaddr_max - vaddr_min;
    debug_assert!(len > span, "mapping length does not cover the segment span");
    debug_assert!(
        len - span < 2 * page,
        "mapping length exceeds the segment span by two pages or more"
    );
    debug_assert_eq!(base % page, 0, "base is not on a page boundary");
    debug_assert_eq!(len % page, 0, "length is not a multiple of the page size");

    Ok(Footprint {
        base,
        len: len as usize,
    })
}
