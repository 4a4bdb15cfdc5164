/// Physical and bus address layout of the SoC peripheral block.
///
/// The engine never probes the board. Pick the preset matching the target, or
/// fill in the fields by hand for anything else with the same register model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocLayout {
    /// ARM physical address of the peripheral block, as seen through `/dev/mem`.
    pub peripheral_base: u32,
    /// The same block as seen by the DMA engine on the VideoCore bus.
    pub bus_base: u32,
    /// Bus alias OR-ed into RAM frame addresses handed to the DMA engine.
    pub dma_memory_alias: u32,
}

pub const DMA_OFFSET: u32 = 0x0000_7000;
/// Register bank stride of one DMA channel.
pub const DMA_CHANNEL_STRIDE: u32 = 0x100;
/// Length mapped for the DMA controller: one page holds channels 0..14.
pub const DMA_LEN: usize = 0x1000;

pub const PWM_OFFSET: u32 = 0x0020_C000;
pub const PWM_LEN: usize = 0x28;

pub const CLK_OFFSET: u32 = 0x0010_1000;
pub const CLK_LEN: usize = 0xA8;

pub const GPIO_OFFSET: u32 = 0x0020_0000;
pub const GPIO_LEN: usize = 0x100;

pub const PCM_OFFSET: u32 = 0x0020_3000;
pub const PCM_LEN: usize = 0x24;

const GPIO_SET0_OFFSET: u32 = 0x1C;
const GPIO_CLR0_OFFSET: u32 = 0x28;
const PWM_FIFO_OFFSET: u32 = 0x18;

impl SocLayout {
    /// Raspberry Pi 1 and Zero.
    pub const BCM2835: SocLayout = SocLayout {
        peripheral_base: 0x2000_0000,
        bus_base: 0x7E00_0000,
        dma_memory_alias: 0x4000_0000,
    };

    /// Raspberry Pi 2 and 3.
    pub const BCM2836: SocLayout = SocLayout {
        peripheral_base: 0x3F00_0000,
        bus_base: 0x7E00_0000,
        dma_memory_alias: 0xC000_0000,
    };

    pub fn dma_base(&self) -> u32 {
        self.peripheral_base + DMA_OFFSET
    }

    pub fn pwm_base(&self) -> u32 {
        self.peripheral_base + PWM_OFFSET
    }

    pub fn clk_base(&self) -> u32 {
        self.peripheral_base + CLK_OFFSET
    }

    pub fn gpio_base(&self) -> u32 {
        self.peripheral_base + GPIO_OFFSET
    }

    pub fn pcm_base(&self) -> u32 {
        self.peripheral_base + PCM_OFFSET
    }

    /// Bus addresses of the registers the control blocks write to.
    pub fn dma_targets(&self) -> DmaTargets {
        DmaTargets {
            gpio_set: self.bus_base + GPIO_OFFSET + GPIO_SET0_OFFSET,
            gpio_clear: self.bus_base + GPIO_OFFSET + GPIO_CLR0_OFFSET,
            pwm_fifo: self.bus_base + PWM_OFFSET + PWM_FIFO_OFFSET,
        }
    }
}

impl Default for SocLayout {
    fn default() -> Self {
        Self::BCM2835
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTargets {
    pub gpio_set: u32,
    pub gpio_clear: u32,
    pub pwm_fifo: u32,
}
