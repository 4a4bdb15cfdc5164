//! DMA-paced software PWM for the Raspberry Pi.
//!
//! Each DMA channel replays a circular chain of control blocks that copy
//! per-sample GPIO masks into the GPIO set/clear registers, paced by the PWM
//! peripheral's DMA request line. Once a channel runs, the CPU is not
//! involved in producing the waveform.
//!
//! ```no_run
//! use dma_spwm::DmaPwm;
//!
//! # fn main() -> Result<(), dma_spwm::PwmError> {
//! let mut pwm = DmaPwm::initialize(10)?;
//! pwm.init_channel(0, 20_000)?;
//! pwm.set_channel_percent(0, 18, 50.0)?;
//! # Ok(())
//! # }
//! ```
pub mod arena;
pub mod backend;
mod channel;
pub mod clock;
pub mod control_block;
pub mod delay;
pub mod dma;
pub mod gpio;
pub mod layout;
pub mod peripheral;
pub mod registers;

use core::marker::PhantomData;

pub use arena::{PageFault, PageMap};
pub use backend::{Backend, DevMem, Simulated};
pub use channel::{Channel, ChannelGeometry};
pub use layout::SocLayout;
pub use registers::{FakeWindow, RegisterWindow};

use gpio::Gpio;
use tracing::{debug, info, warn};

/// Usable DMA channels (0..14).
pub const DMA_CHANNELS: usize = 15;
/// GPIO pins addressable through bank 0 set/clear registers.
pub const GPIO_COUNT: u8 = 32;

pub const PULSE_WIDTH_INCREMENT_US_DEFAULT: u32 = 10;
/// 50 Hz, the usual servo frame.
pub const SUBCYCLE_TIME_US_DEFAULT: u32 = 20_000;
/// Shorter subcycles produce no signal and upset the system.
pub const SUBCYCLE_TIME_US_MIN: u32 = 3_000;
pub const SUBCYCLE_TIME_US_MAX: u32 = 1_000_000;

/// Errors that can occur while setting up or driving the engine.
#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    /// A peripheral window or DMA arena could not be mapped
    #[error("failed to map {what} at {base:#010x}")]
    Map {
        what: &'static str,
        base: u32,
        #[source]
        source: std::io::Error,
    },
    /// A DMA arena page could not be resolved to a resident frame
    #[error("dma arena page {page} cannot be used: {reason}")]
    PageResolution {
        page: usize,
        #[source]
        reason: PageFault,
    },
    /// The channel is in the wrong state or the request names a bad channel or pin
    #[error("channel {channel}: {kind}")]
    ChannelState {
        channel: usize,
        kind: ChannelStateError,
    },
    /// The pulse does not fit inside the subcycle
    #[error("pulse at {start} with width {width} exceeds the max width of {max_width}")]
    PulseRange { start: u32, width: u32, max_width: u32 },
    /// The duty cycle percent is not a number
    #[error("pulse percent is not a number")]
    InvalidPercent,
    /// The pulse width increment is zero or longer than the shortest subcycle
    #[error("pulse width increment of {0}us is out of range")]
    InvalidIncrement(u32),
    /// Another hardware engine already owns the peripherals
    #[error("a hardware engine is already active in this process")]
    EngineActive,
}

impl PwmError {
    /// The channel state kind, if this is a channel state error.
    pub fn channel_state(&self) -> Option<ChannelStateError> {
        match self {
            PwmError::ChannelState { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelStateError {
    #[error("channel index out of range")]
    InvalidChannel,
    #[error("channel already initialized")]
    AlreadyInitialized,
    #[error("channel has not been initialized")]
    NotInitialized,
    #[error("subcycle of {subcycle_us}us is below the minimum")]
    SubcycleTooShort { subcycle_us: u32 },
    #[error("subcycle of {subcycle_us}us is above the maximum")]
    SubcycleTooLong { subcycle_us: u32 },
    #[error("increment of {increment_us}us leaves no samples in the subcycle")]
    InvalidIncrement { increment_us: u32 },
    #[error("gpio {gpio} out of range")]
    InvalidGpio { gpio: u8 },
    #[error("gpio {gpio} has not been set up")]
    GpioNotClaimed { gpio: u8 },
}

/// The mapped peripheral register windows shared by every channel.
#[derive(Debug)]
pub struct Peripherals<W> {
    pwm: W,
    pcm: W,
    clk: W,
    gpio: W,
    dma: W,
}

impl<W> Peripherals<W> {
    pub fn pwm(&self) -> &W {
        &self.pwm
    }

    /// Mapped alongside the others; PWM is the only pacing source in use.
    pub fn pcm(&self) -> &W {
        &self.pcm
    }

    pub fn clk(&self) -> &W {
        &self.clk
    }

    pub fn gpio(&self) -> &W {
        &self.gpio
    }

    pub fn dma(&self) -> &W {
        &self.dma
    }
}

pub struct IncrementBuildState {}
pub struct ReadyBuildState {}

pub struct DmaPwmBuilder<T> {
    increment_us: u32,
    layout: SocLayout,
    _phantom: PhantomData<T>,
}

impl<T> DmaPwmBuilder<T> {
    pub fn layout(mut self, layout: SocLayout) -> Self {
        self.layout = layout;
        self
    }
}

impl DmaPwmBuilder<IncrementBuildState> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            increment_us: PULSE_WIDTH_INCREMENT_US_DEFAULT,
            layout: SocLayout::default(),
            _phantom: PhantomData,
        }
    }

    /// Pulse width granularity shared by all channels. Smaller increments mean
    /// more samples per subcycle and more DMA memory.
    pub fn increment_us(
        self,
        increment_us: u32,
    ) -> Result<DmaPwmBuilder<ReadyBuildState>, PwmError> {
        if increment_us == 0 || increment_us > SUBCYCLE_TIME_US_MIN {
            return Err(PwmError::InvalidIncrement(increment_us));
        }

        Ok(DmaPwmBuilder {
            increment_us,
            layout: self.layout,
            _phantom: PhantomData,
        })
    }

    pub fn default_increment(self) -> DmaPwmBuilder<ReadyBuildState> {
        DmaPwmBuilder {
            increment_us: PULSE_WIDTH_INCREMENT_US_DEFAULT,
            layout: self.layout,
            _phantom: PhantomData,
        }
    }
}

impl Default for DmaPwmBuilder<IncrementBuildState> {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaPwmBuilder<ReadyBuildState> {
    /// Map the peripherals and program the PWM clock.
    pub fn build<B: Backend>(self, mut backend: B) -> Result<DmaPwm<B>, PwmError> {
        let layout = self.layout;

        let mut pwm = backend.map_peripheral(layout.pwm_base(), layout::PWM_LEN, "pwm")?;
        let pcm = backend.map_peripheral(layout.pcm_base(), layout::PCM_LEN, "pcm")?;
        let mut clk = backend.map_peripheral(layout.clk_base(), layout::CLK_LEN, "clock")?;
        let gpio = backend.map_peripheral(layout.gpio_base(), layout::GPIO_LEN, "gpio")?;
        let dma = backend.map_peripheral(layout.dma_base(), layout::DMA_LEN, "dma")?;

        backend.commit();
        clock::configure_global_clock(&mut pwm, &mut clk, self.increment_us, |delay| {
            backend.settle(delay)
        });

        info!(
            increment_us = self.increment_us,
            peripheral_base = layout.peripheral_base,
            "pwm clock configured"
        );

        Ok(DmaPwm {
            backend,
            layout,
            increment_us: self.increment_us,
            peripherals: Peripherals {
                pwm,
                pcm,
                clk,
                gpio,
                dma,
            },
            channels: core::array::from_fn(|_| None),
            gpio_setup: 0,
        })
    }
}

/// The PWM engine: peripheral windows, the channel pool and the set of GPIO
/// pins claimed for output.
///
/// Every mutating call takes `&mut self`. Share an engine between threads by
/// wrapping it in a `Mutex`.
pub struct DmaPwm<B: Backend = DevMem> {
    backend: B,
    layout: SocLayout,
    increment_us: u32,
    peripherals: Peripherals<B::Window>,
    channels: [Option<Channel<B::Memory>>; DMA_CHANNELS],
    gpio_setup: u32,
}

impl DmaPwm<DevMem> {
    #[must_use]
    pub fn builder() -> DmaPwmBuilder<IncrementBuildState> {
        DmaPwmBuilder::new()
    }

    /// Open the real hardware and configure it for `increment_us`.
    pub fn initialize(increment_us: u32) -> Result<Self, PwmError> {
        let builder = DmaPwmBuilder::new().increment_us(increment_us)?;
        builder.build(DevMem::open()?)
    }
}

impl<B: Backend> DmaPwm<B> {
    pub fn increment_us(&self) -> u32 {
        self.increment_us
    }

    pub fn layout(&self) -> &SocLayout {
        &self.layout
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn peripherals(&self) -> &Peripherals<B::Window> {
        &self.peripherals
    }

    pub fn channel(&self, channel: usize) -> Option<&Channel<B::Memory>> {
        self.channels.get(channel)?.as_ref()
    }

    pub fn is_gpio_claimed(&self, gpio: u8) -> bool {
        gpio < GPIO_COUNT && self.gpio_setup & (1 << gpio) != 0
    }

    /// Bitmask of every GPIO claimed for output so far.
    pub fn gpio_setup(&self) -> u32 {
        self.gpio_setup
    }

    /// Direct register access to the GPIO bank, bypassing the DMA channels.
    ///
    /// Switching a pin a channel drives back to input stops its waveform from
    /// reaching the pin, but it stays claimed.
    pub fn gpio(&mut self) -> Gpio<'_, B::Window> {
        Gpio::new(&mut self.peripherals.gpio)
    }

    /// Allocate the channel's DMA memory, build its control-block chain and
    /// start the DMA engine on it.
    pub fn init_channel(&mut self, channel: usize, subcycle_us: u32) -> Result<(), PwmError> {
        let state_error = |kind| PwmError::ChannelState { channel, kind };

        match self.channels.get(channel) {
            None => return Err(rejected(state_error(ChannelStateError::InvalidChannel))),
            Some(Some(_)) => {
                return Err(rejected(state_error(ChannelStateError::AlreadyInitialized)));
            }
            Some(None) => {}
        }

        let geometry = ChannelGeometry::new(subcycle_us, self.increment_us)
            .map_err(|kind| rejected(state_error(kind)))?;
        debug!(
            channel,
            samples = geometry.sample_count(),
            control_blocks = geometry.control_block_count(),
            pages = geometry.page_count(),
            "channel geometry"
        );

        let (memory, page_map) = self
            .backend
            .allocate_arena(geometry.page_count(), self.layout.dma_memory_alias)?;
        let slot = Channel::new(geometry, memory, page_map, self.layout.dma_targets());

        dma::start_channel(
            &mut self.peripherals.dma,
            channel,
            slot.head_bus_address(),
            |delay| self.backend.settle(delay),
        );

        info!(channel, subcycle_us, "dma channel started");
        self.channels[channel] = Some(slot);

        Ok(())
    }

    /// Add a pulse of `width` increments starting `start` increments into the
    /// subcycle.
    ///
    /// Several pins may share a start slot. A pin going high and another going
    /// low in the same slot is not supported: the slot's control block writes
    /// to one register only, so the last pulse written decides for both.
    pub fn add_channel_pulse(
        &mut self,
        channel: usize,
        gpio: u8,
        start: u32,
        width: u32,
    ) -> Result<(), PwmError> {
        check_gpio(channel, gpio)?;
        let slot = initialized(&mut self.channels, channel)?;
        slot.check_pulse(start, width).map_err(rejected)?;

        let bit = 1 << gpio;
        if self.gpio_setup & bit == 0 {
            debug!(gpio, "claiming gpio for output");
            Gpio::new(&mut self.peripherals.gpio).claim_output(gpio);
            self.gpio_setup |= bit;
        }

        slot.apply_pulse(gpio, start, width);
        Ok(())
    }

    /// Replace the pin's pulses with a single pulse from the start of the
    /// subcycle covering `percent` of it.
    pub fn set_channel_percent(
        &mut self,
        channel: usize,
        gpio: u8,
        percent: f64,
    ) -> Result<(), PwmError> {
        if percent.is_nan() {
            return Err(rejected(PwmError::InvalidPercent));
        }

        let width = match self.channel(channel) {
            Some(slot) => slot.geometry().width_for_percent(percent),
            None => 0,
        };

        self.add_channel_pulse(channel, gpio, 0, width)
    }

    /// Remove every pulse of `gpio` from the channel and drive the pin low.
    pub fn clear_channel_gpio(&mut self, channel: usize, gpio: u8) -> Result<(), PwmError> {
        check_gpio(channel, gpio)?;
        let slot = initialized(&mut self.channels, channel)?;

        if self.gpio_setup & (1 << gpio) == 0 {
            return Err(rejected(PwmError::ChannelState {
                channel,
                kind: ChannelStateError::GpioNotClaimed { gpio },
            }));
        }

        debug!(channel, gpio, "clearing gpio");
        slot.clear_gpio(gpio);
        Gpio::new(&mut self.peripherals.gpio).set_low(gpio);

        Ok(())
    }
}

fn rejected(err: PwmError) -> PwmError {
    warn!(error = %err, "request rejected");
    err
}

fn check_gpio(channel: usize, gpio: u8) -> Result<(), PwmError> {
    if gpio >= GPIO_COUNT {
        return Err(rejected(PwmError::ChannelState {
            channel,
            kind: ChannelStateError::InvalidGpio { gpio },
        }));
    }

    Ok(())
}

fn initialized<M: RegisterWindow>(
    channels: &mut [Option<Channel<M>>],
    channel: usize,
) -> Result<&mut Channel<M>, PwmError> {
    let kind = match channels.get_mut(channel) {
        Some(Some(slot)) => return Ok(slot),
        Some(None) => ChannelStateError::NotInitialized,
        None => ChannelStateError::InvalidChannel,
    };

    Err(rejected(PwmError::ChannelState { channel, kind }))
}
