use crate::layout::DMA_CHANNEL_STRIDE;
use crate::registers::RegisterWindow;
use std::time::Duration;

pub const DMA_CS: usize = 0x00 / 4;
pub const DMA_CONBLK_AD: usize = 0x04 / 4;
pub const DMA_DEBUG: usize = 0x20 / 4;

pub const DMA_RESET: u32 = 1 << 31;
pub const DMA_INT: u32 = 1 << 2;
pub const DMA_END: u32 = 1 << 1;
pub const DMA_ACTIVE: u32 = 1 << 0;
pub const DMA_WAIT_FOR_OUTSTANDING_WRITES: u32 = 1 << 28;

/// Read lookup, FIFO and read-last-not-set errors.
pub const DMA_DEBUG_CLEAR_ERRORS: u32 = 7;

const DMA_PRIORITY_MID: u32 = 8;

const fn dma_priority(level: u32) -> u32 {
    level << 16
}

const fn dma_panic_priority(level: u32) -> u32 {
    level << 20
}

/// CS value that starts a channel.
pub const DMA_GO: u32 = DMA_WAIT_FOR_OUTSTANDING_WRITES
    | dma_panic_priority(DMA_PRIORITY_MID)
    | dma_priority(DMA_PRIORITY_MID)
    | DMA_ACTIVE;

pub const RESET_SETTLE: Duration = Duration::from_micros(10);

/// Word index of register `reg` of DMA channel `channel` inside the mapped
/// controller block.
pub fn register_index(channel: usize, reg: usize) -> usize {
    channel * DMA_CHANNEL_STRIDE as usize / 4 + reg
}

/// Reset `channel`, point it at `head` and set it running.
pub fn start_channel(
    dma: &mut impl RegisterWindow,
    channel: usize,
    head: u32,
    mut settle: impl FnMut(Duration),
) {
    dma.write(register_index(channel, DMA_CS), DMA_RESET);
    settle(RESET_SETTLE);
    dma.write(register_index(channel, DMA_CS), DMA_INT | DMA_END);
    dma.write(register_index(channel, DMA_CONBLK_AD), head);
    dma.write(register_index(channel, DMA_DEBUG), DMA_DEBUG_CLEAR_ERRORS);
    dma.write(register_index(channel, DMA_CS), DMA_GO);
}
