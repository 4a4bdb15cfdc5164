pub(crate) mod sealed {
    pub trait Sealed {}
}

/// A fixed-size array of 32-bit cells accessed by word index.
///
/// Every raw memory access the engine performs, peripheral registers and DMA
/// memory alike, goes through this trait. It is sealed: the only
/// implementations are the mapped hardware windows and [`FakeWindow`].
///
/// Indices are word offsets, not byte offsets. An index past [`len`](Self::len)
/// is a programming error and panics just like slice indexing does.
pub trait RegisterWindow: sealed::Sealed {
    /// Number of 32-bit cells in the window.
    fn len(&self) -> usize;

    fn read(&self, index: usize) -> u32;

    fn write(&mut self, index: usize, value: u32);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-modify-write of a single cell. Not atomic with respect to other
    /// writers of the same cell, hardware included.
    fn modify(&mut self, index: usize, f: impl FnOnce(u32) -> u32) {
        let value = self.read(index);
        self.write(index, f(value));
    }
}

/// Plain in-memory window used where there is no real hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeWindow {
    cells: Vec<u32>,
}

impl FakeWindow {
    #[must_use]
    pub fn new(words: usize) -> Self {
        Self {
            cells: vec![0; words],
        }
    }

    /// Window covering `bytes` bytes, rounded up to whole words.
    #[must_use]
    pub fn with_byte_len(bytes: usize) -> Self {
        Self::new(bytes.div_ceil(4))
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.cells
    }
}

impl sealed::Sealed for FakeWindow {}

impl RegisterWindow for FakeWindow {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn read(&self, index: usize) -> u32 {
        self.cells[index]
    }

    fn write(&mut self, index: usize, value: u32) {
        self.cells[index] = value;
    }
}
