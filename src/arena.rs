//! Page-locked DMA memory and its virtual to bus address translation.
//!
//! The DMA engine only understands bus addresses. Each channel owns one
//! anonymous, locked mapping and a [`PageMap`] recording the bus address of
//! every page, resolved once through `/proc/self/pagemap`.

use crate::PwmError;
use crate::registers::{RegisterWindow, sealed};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ptr::{self, NonNull};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

const PAGEMAP: &str = "/proc/self/pagemap";
const PAGEMAP_ENTRY_LEN: usize = 8;

const PAGEMAP_PRESENT: u64 = 1 << 63;
const PAGEMAP_SWAPPED: u64 = 1 << 62;
const PAGEMAP_PFN_MASK: u64 = (1 << 55) - 1;

/// Highest RAM address that still leaves room for the bus alias bits.
const MAX_FRAME_ADDRESS: u64 = 0x3FFF_FFFF;

/// Why a page of the arena could not be handed to the DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PageFault {
    #[error("page is not resident")]
    NotPresent,
    #[error("page has been swapped out")]
    Swapped,
    #[error("frame number is hidden by the kernel (missing privileges)")]
    FrameHidden,
    #[error("frame lies outside the DMA addressable range")]
    OutOfRange,
    #[error("/proc/self/pagemap could not be read: {0}")]
    Unreadable(std::io::ErrorKind),
}

/// Bus address of every page of an arena, indexed by page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMap {
    pages: Vec<u32>,
}

impl PageMap {
    #[must_use]
    pub fn new(pages: Vec<u32>) -> Self {
        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Bus address of the byte at `offset` from the start of the arena.
    pub fn bus_address(&self, offset: usize) -> u32 {
        let page = self.pages[offset >> PAGE_SHIFT];
        // the in-page remainder is always < PAGE_SIZE
        page + (offset & (PAGE_SIZE - 1)) as u32
    }
}

/// Decode one pagemap entry into the bus address of its frame.
pub(crate) fn decode_pagemap_entry(entry: u64, alias: u32) -> Result<u32, PageFault> {
    if entry & PAGEMAP_PRESENT == 0 {
        return Err(PageFault::NotPresent);
    }
    if entry & PAGEMAP_SWAPPED != 0 {
        return Err(PageFault::Swapped);
    }

    let frame = entry & PAGEMAP_PFN_MASK;
    if frame == 0 {
        return Err(PageFault::FrameHidden);
    }

    let address = frame << PAGE_SHIFT;
    if address > MAX_FRAME_ADDRESS {
        return Err(PageFault::OutOfRange);
    }

    Ok(address as u32 | alias)
}

/// Anonymous, zero-filled, page-locked memory the DMA engine reads from.
///
/// There is no `Drop`: once a channel starts, the DMA engine keeps reading
/// this memory for the rest of the process lifetime, so it is never unmapped.
#[derive(Debug)]
pub struct LockedArena {
    base: NonNull<u32>,
    words: usize,
}

// SAFETY: the arena is owned by exactly one channel and the mapping is valid
// from any thread.
unsafe impl Send for LockedArena {}

impl sealed::Sealed for LockedArena {}

impl RegisterWindow for LockedArena {
    fn len(&self) -> usize {
        self.words
    }

    fn read(&self, index: usize) -> u32 {
        assert!(index < self.words, "arena index {index} out of range");
        // SAFETY: index is inside the mapping, which is never released.
        unsafe { ptr::read_volatile(self.base.as_ptr().add(index)) }
    }

    fn write(&mut self, index: usize, value: u32) {
        assert!(index < self.words, "arena index {index} out of range");
        // SAFETY: as for `read`.
        unsafe { ptr::write_volatile(self.base.as_ptr().add(index), value) }
    }
}

/// Reserve `pages` locked pages and resolve each one to its bus address.
pub fn allocate(pages: usize, alias: u32) -> Result<(LockedArena, PageMap), PwmError> {
    let len = pages * PAGE_SIZE;
    let map_error = |source| PwmError::Map {
        what: "dma arena",
        base: 0,
        source,
    };

    // SAFETY: anonymous mapping; no existing memory is aliased.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_LOCKED,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(map_error(std::io::Error::last_os_error()));
    }

    let release = || {
        // SAFETY: no DMA engine has seen this mapping yet.
        unsafe {
            libc::munmap(addr, len);
        }
    };

    let Some(base) = NonNull::new(addr.cast::<u32>()) else {
        return Err(map_error(std::io::Error::other("mmap returned a null mapping")));
    };
    if (addr as usize) % PAGE_SIZE != 0 {
        release();
        return Err(map_error(std::io::Error::other(
            "dma arena is not page aligned",
        )));
    }

    match resolve_pages(base, pages, alias) {
        Ok(page_map) => {
            tracing::debug!(pages, "allocated locked dma arena");
            Ok((
                LockedArena {
                    base,
                    words: len / 4,
                },
                page_map,
            ))
        }
        Err(err) => {
            release();
            Err(err)
        }
    }
}

fn resolve_pages(base: NonNull<u32>, pages: usize, alias: u32) -> Result<PageMap, PwmError> {
    let unreadable = |page, err: std::io::Error| PwmError::PageResolution {
        page,
        reason: PageFault::Unreadable(err.kind()),
    };

    let mut pagemap = File::open(PAGEMAP).map_err(|err| unreadable(0, err))?;
    let first_page = base.as_ptr() as usize / PAGE_SIZE;
    let mut bus_pages = Vec::with_capacity(pages);

    for page in 0..pages {
        // SAFETY: the page lies inside the fresh mapping. Writing its first
        // word forces the kernel to back it with a frame.
        unsafe {
            ptr::write_volatile(base.as_ptr().add(page * PAGE_SIZE / 4), 0);
        }

        let offset = ((first_page + page) * PAGEMAP_ENTRY_LEN) as u64;
        let mut entry = [0u8; PAGEMAP_ENTRY_LEN];
        pagemap
            .seek(SeekFrom::Start(offset))
            .and_then(|_| pagemap.read_exact(&mut entry))
            .map_err(|err| unreadable(page, err))?;

        let bus = decode_pagemap_entry(u64::from_le_bytes(entry), alias)
            .map_err(|reason| PwmError::PageResolution { page, reason })?;
        bus_pages.push(bus);
    }

    Ok(PageMap::new(bus_pages))
}
