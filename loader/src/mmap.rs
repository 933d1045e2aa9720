//! Memory Mapping Capability
//!
//! The loader acquires and releases its executable region through the
//! `RegionMapper` trait. `MmapMapper` is the production implementation over
//! anonymous `mmap`; tests inject heap-backed fakes so the loading logic
//! runs without OS mappings or executable pages.

use std::io;
use std::ptr::NonNull;

use thiserror::Error;

/// OS-resource failures while acquiring or releasing a region
#[derive(Debug, Error)]
pub enum MapError {
    #[error("mmap failed: {0}")]
    Acquire(#[source] io::Error),
    #[error("munmap failed: {0}")]
    Release(#[source] io::Error),
}

/// An owned, exclusively held byte range of mapped memory.
///
/// The region is handed out by a `RegionMapper` and must be returned to the
/// same mapper; it performs no cleanup of its own.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion {
    /// Assume exclusive ownership of `len` bytes at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to `len` readable and writable bytes that stay valid
    /// until the region is passed back to its mapper, and nothing else may
    /// access them while this value exists.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        MappedRegion { ptr, len }
    }

    /// Start address of the region
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // Sound per the `from_raw` ownership contract.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Give up ownership without releasing.
    pub fn into_raw(self) -> (NonNull<u8>, usize) {
        (self.ptr, self.len)
    }
}

/// Capability to acquire and release executable memory regions
pub trait RegionMapper {
    /// Obtain a readable, writable and executable region of exactly `len`
    /// bytes. `len` is expected to be page-aligned.
    fn acquire(&self, len: usize) -> Result<MappedRegion, MapError>;

    /// Return a previously acquired region.
    fn release(&self, region: MappedRegion) -> Result<(), MapError>;
}

impl<M: RegionMapper + ?Sized> RegionMapper for &M {
    fn acquire(&self, len: usize) -> Result<MappedRegion, MapError> {
        (**self).acquire(len)
    }

    fn release(&self, region: MappedRegion) -> Result<(), MapError> {
        (**self).release(region)
    }
}

/// Anonymous-mmap implementation of [`RegionMapper`]
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapMapper;

impl RegionMapper for MmapMapper {
    fn acquire(&self, len: usize) -> Result<MappedRegion, MapError> {
        let prot = libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC;
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

        let ptr = unsafe { libc::mmap(std::ptr::null_mut(), len, prot, flags, -1, 0) };
        if ptr == libc::MAP_FAILED {
            return Err(MapError::Acquire(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| MapError::Acquire(io::Error::other("mmap returned a null mapping")))?;
        Ok(unsafe { MappedRegion::from_raw(ptr, len) })
    }

    fn release(&self, region: MappedRegion) -> Result<(), MapError> {
        let (ptr, len) = region.into_raw();
        let ret = unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, len) };
        if ret != 0 {
            return Err(MapError::Release(io::Error::last_os_error()));
        }
        Ok(())
    }
}

lazy_static::lazy_static! {
    static ref PAGE_SIZE: usize = {
        let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if ret > 0 { ret as usize } else { 4096 }
    };
}

/// The platform memory-page size
pub fn page_size() -> usize {
    *PAGE_SIZE
}
