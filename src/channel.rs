use crate::arena::{PAGE_SIZE, PageMap};
use crate::control_block::{CONTROL_BLOCK_BYTES, CONTROL_BLOCK_WORDS, ControlBlockChain, DST_WORD};
use crate::layout::DmaTargets;
use crate::registers::RegisterWindow;
use crate::{ChannelStateError, PwmError, SUBCYCLE_TIME_US_MAX, SUBCYCLE_TIME_US_MIN};

/// Sizes and arena offsets of one channel, derived from its subcycle and the
/// engine-wide increment.
///
/// The arena holds the control blocks first and the sample table after them,
/// which keeps every control block on a 32-byte boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelGeometry {
    subcycle_us: u32,
    increment_us: u32,
    sample_count: usize,
}

impl ChannelGeometry {
    pub fn new(subcycle_us: u32, increment_us: u32) -> Result<Self, ChannelStateError> {
        if subcycle_us < SUBCYCLE_TIME_US_MIN {
            return Err(ChannelStateError::SubcycleTooShort { subcycle_us });
        }
        if subcycle_us > SUBCYCLE_TIME_US_MAX {
            return Err(ChannelStateError::SubcycleTooLong { subcycle_us });
        }

        if increment_us == 0 || increment_us > subcycle_us {
            return Err(ChannelStateError::InvalidIncrement { increment_us });
        }

        Ok(Self {
            subcycle_us,
            increment_us,
            sample_count: (subcycle_us / increment_us) as usize,
        })
    }

    pub fn subcycle_us(&self) -> u32 {
        self.subcycle_us
    }

    pub fn increment_us(&self) -> u32 {
        self.increment_us
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Longest pulse, in increments. Equal to the sample count.
    pub fn max_width(&self) -> u32 {
        self.sample_count as u32
    }

    /// Pulse width covering `percent` of the subcycle, rounded to the nearest
    /// increment and clamped to `0..=max_width`.
    pub fn width_for_percent(&self, percent: f64) -> u32 {
        let max = f64::from(self.max_width());
        (percent / 100.0 * max).round().clamp(0.0, max) as u32
    }

    pub fn control_block_count(&self) -> usize {
        self.sample_count * 2
    }

    pub fn byte_len(&self) -> usize {
        self.control_block_count() * CONTROL_BLOCK_BYTES + self.sample_count * 4
    }

    pub fn page_count(&self) -> usize {
        self.byte_len().div_ceil(PAGE_SIZE)
    }

    pub fn control_block_offset(&self, block: usize) -> usize {
        block * CONTROL_BLOCK_BYTES
    }

    pub fn control_block_word(&self, block: usize) -> usize {
        block * CONTROL_BLOCK_WORDS
    }

    pub fn sample_offset(&self, sample: usize) -> usize {
        self.control_block_count() * CONTROL_BLOCK_BYTES + sample * 4
    }

    pub fn sample_word(&self, sample: usize) -> usize {
        self.sample_offset(sample) / 4
    }
}

/// A running DMA channel: its arena, page map and geometry.
///
/// Once created the DMA engine replays the channel forever. There is no way to
/// stop it short of process exit.
#[derive(Debug)]
pub struct Channel<M: RegisterWindow> {
    geometry: ChannelGeometry,
    memory: M,
    page_map: PageMap,
    targets: DmaTargets,
    head: u32,
}

impl<M: RegisterWindow> Channel<M> {
    /// Zero the sample table and write the compiled control-block chain into
    /// `memory`. The DMA engine is started separately.
    pub(crate) fn new(
        geometry: ChannelGeometry,
        mut memory: M,
        page_map: PageMap,
        targets: DmaTargets,
    ) -> Self {
        for sample in 0..geometry.sample_count() {
            memory.write(geometry.sample_word(sample), 0);
        }

        let chain = ControlBlockChain::compile(&geometry, &page_map, &targets);
        chain.write_to(&mut memory, &geometry, &page_map);
        let head = chain.head_bus_address(&geometry, &page_map);

        Self {
            geometry,
            memory,
            page_map,
            targets,
            head,
        }
    }

    pub fn geometry(&self) -> &ChannelGeometry {
        &self.geometry
    }

    pub fn subcycle_us(&self) -> u32 {
        self.geometry.subcycle_us()
    }

    pub fn sample_count(&self) -> usize {
        self.geometry.sample_count()
    }

    pub fn max_width(&self) -> u32 {
        self.geometry.max_width()
    }

    pub fn page_map(&self) -> &PageMap {
        &self.page_map
    }

    /// Bus address of the first control block.
    pub fn head_bus_address(&self) -> u32 {
        self.head
    }

    pub fn sample(&self, sample: usize) -> Option<u32> {
        (sample < self.sample_count()).then(|| self.memory.read(self.geometry.sample_word(sample)))
    }

    /// Snapshot of the whole sample table.
    pub fn samples(&self) -> Vec<u32> {
        (0..self.sample_count())
            .map(|sample| self.memory.read(self.geometry.sample_word(sample)))
            .collect()
    }

    /// Control block `block` as the DMA engine sees it.
    pub fn control_block(&self, block: usize) -> Option<[u32; CONTROL_BLOCK_WORDS]> {
        if block >= self.geometry.control_block_count() {
            return None;
        }
        let first = self.geometry.control_block_word(block);
        Some(core::array::from_fn(|word| self.memory.read(first + word)))
    }

    pub(crate) fn check_pulse(&self, start: u32, width: u32) -> Result<(), PwmError> {
        let max_width = self.max_width();
        match start.checked_add(width) {
            Some(end) if end <= max_width => Ok(()),
            _ => Err(PwmError::PulseRange {
                start,
                width,
                max_width,
            }),
        }
    }

    /// Write a pulse already accepted by [`check_pulse`](Self::check_pulse).
    pub(crate) fn apply_pulse(&mut self, gpio: u8, start: u32, width: u32) {
        let bit = 1u32 << gpio;
        let start = start as usize;
        let end = start + width as usize;

        if width == 0 {
            if start < self.sample_count() {
                self.clear_bit(start, bit);
            }
            return;
        }

        self.memory
            .modify(self.geometry.sample_word(start), |word| word | bit);
        self.set_destination(start, self.targets.gpio_set);

        for sample in start + 1..end {
            self.clear_bit(sample, bit);
        }

        if end < self.sample_count() {
            self.clear_bit(end, bit);
            self.set_destination(end, self.targets.gpio_clear);
        }
    }

    pub(crate) fn clear_gpio(&mut self, gpio: u8) {
        let bit = 1u32 << gpio;
        for sample in 0..self.sample_count() {
            self.clear_bit(sample, bit);
        }
    }

    fn clear_bit(&mut self, sample: usize, bit: u32) {
        self.memory
            .modify(self.geometry.sample_word(sample), |word| word & !bit);
    }

    /// Retarget the register the sample's GPIO block writes to.
    fn set_destination(&mut self, sample: usize, register: u32) {
        let block = self.geometry.control_block_word(2 * sample);
        self.memory.write(block + DST_WORD, register);
    }
}
