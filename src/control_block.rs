use crate::arena::PageMap;
use crate::channel::ChannelGeometry;
use crate::layout::DmaTargets;
use crate::registers::RegisterWindow;

/// Words in one DMA control block. The engine requires 32-byte alignment.
pub const CONTROL_BLOCK_WORDS: usize = 8;
pub const CONTROL_BLOCK_BYTES: usize = CONTROL_BLOCK_WORDS * 4;

/// Word index of the destination address inside a control block.
pub const DST_WORD: usize = 2;

pub const DMA_NO_WIDE_BURSTS: u32 = 1 << 26;
pub const DMA_WAIT_RESP: u32 = 1 << 3;
pub const DMA_D_DREQ: u32 = 1 << 6;
/// Peripheral number of the PWM DREQ line.
pub const DMA_PERMAP_PWM: u32 = 5;

const fn dma_per_map(peripheral: u32) -> u32 {
    peripheral << 16
}

/// One transfer descriptor. `next` is the index of the following block in the
/// chain, turned into a bus address only when the block is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    pub info: u32,
    pub src: u32,
    pub dst: u32,
    pub length: u32,
    pub stride: u32,
    pub next: usize,
}

impl ControlBlock {
    /// Hardware layout: TI, SOURCE_AD, DEST_AD, TXFR_LEN, STRIDE, NEXTCONBK
    /// and two reserved words.
    pub fn encode(&self, next_bus: u32) -> [u32; CONTROL_BLOCK_WORDS] {
        [
            self.info,
            self.src,
            self.dst,
            self.length,
            self.stride,
            next_bus,
            0,
            0,
        ]
    }
}

/// The circular descriptor chain of one channel, two blocks per sample.
///
/// Block `2 * i` copies `sample[i]` into the GPIO clear (or set) register
/// without pacing. Block `2 * i + 1` writes a dummy word to the PWM FIFO and
/// waits on the PWM DREQ, which is what spaces the samples in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlockChain {
    blocks: Vec<ControlBlock>,
}

impl ControlBlockChain {
    pub fn compile(geometry: &ChannelGeometry, page_map: &PageMap, targets: &DmaTargets) -> Self {
        let count = geometry.control_block_count();
        let any_sample = page_map.bus_address(geometry.sample_offset(0));
        let mut blocks = Vec::with_capacity(count);

        for sample in 0..geometry.sample_count() {
            let block = 2 * sample;
            blocks.push(ControlBlock {
                info: DMA_NO_WIDE_BURSTS | DMA_WAIT_RESP,
                src: page_map.bus_address(geometry.sample_offset(sample)),
                dst: targets.gpio_clear,
                length: 4,
                stride: 0,
                next: (block + 1) % count,
            });
            blocks.push(ControlBlock {
                info: DMA_NO_WIDE_BURSTS | DMA_WAIT_RESP | DMA_D_DREQ | dma_per_map(DMA_PERMAP_PWM),
                src: any_sample,
                dst: targets.pwm_fifo,
                length: 4,
                stride: 0,
                next: (block + 2) % count,
            });
        }

        Self { blocks }
    }

    pub fn blocks(&self) -> &[ControlBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Bus address of the first block, loaded into the engine to start it.
    pub fn head_bus_address(&self, geometry: &ChannelGeometry, page_map: &PageMap) -> u32 {
        page_map.bus_address(geometry.control_block_offset(0))
    }

    /// Encode every block into DMA memory at its place in the arena.
    pub fn write_to(
        &self,
        memory: &mut impl RegisterWindow,
        geometry: &ChannelGeometry,
        page_map: &PageMap,
    ) {
        for (index, block) in self.blocks.iter().enumerate() {
            let next_bus = page_map.bus_address(geometry.control_block_offset(block.next));
            let first = geometry.control_block_word(index);
            for (word, value) in block.encode(next_bus).into_iter().enumerate() {
                memory.write(first + word, value);
            }
        }
    }
}
