use crate::PwmError;
use crate::registers::{RegisterWindow, sealed};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};

const DEV_MEM: &str = "/dev/mem";

/// A peripheral register block mapped from `/dev/mem`.
#[derive(Debug)]
pub struct MappedWindow {
    base: NonNull<u32>,
    words: usize,
    bytes: usize,
}

// SAFETY: the mapping is process-wide and owned exclusively by this value;
// register access through it does not depend on the accessing thread.
unsafe impl Send for MappedWindow {}

/// Map `len` bytes of physical memory at `base` into the process.
///
/// `base` must be page aligned. The descriptor for `/dev/mem` is closed before
/// returning; the mapping outlives it.
pub fn map(base: u32, len: usize, what: &'static str) -> Result<MappedWindow, PwmError> {
    let map_error = |source| PwmError::Map { what, base, source };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(DEV_MEM)
        .map_err(map_error)?;

    // SAFETY: a fresh shared mapping of a device file; the kernel validates
    // the offset and length and reports failure through MAP_FAILED.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            base as libc::off_t,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(map_error(std::io::Error::last_os_error()));
    }
    drop(file);

    let base_ptr = NonNull::new(addr.cast::<u32>())
        .ok_or_else(|| map_error(std::io::Error::other("mmap returned a null mapping")))?;

    tracing::debug!(base, len, what, "mapped peripheral");

    Ok(MappedWindow {
        base: base_ptr,
        words: len / 4,
        bytes: len,
    })
}

impl sealed::Sealed for MappedWindow {}

impl RegisterWindow for MappedWindow {
    fn len(&self) -> usize {
        self.words
    }

    fn read(&self, index: usize) -> u32 {
        assert!(index < self.words, "register index {index} out of range");
        // SAFETY: index is inside the mapping, which stays valid until drop.
        unsafe { ptr::read_volatile(self.base.as_ptr().add(index)) }
    }

    fn write(&mut self, index: usize, value: u32) {
        assert!(index < self.words, "register index {index} out of range");
        // SAFETY: as for `read`.
        unsafe { ptr::write_volatile(self.base.as_ptr().add(index), value) }
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        // SAFETY: base/bytes describe the mapping created in `map`.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.bytes);
        }
    }
}
