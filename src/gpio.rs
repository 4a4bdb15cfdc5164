use crate::registers::RegisterWindow;

pub const GPIO_FSEL0: usize = 0x00 / 4;
pub const GPIO_SET0: usize = 0x1C / 4;
pub const GPIO_CLR0: usize = 0x28 / 4;
pub const GPIO_LEV0: usize = 0x34 / 4;

const FSEL_PINS_PER_REG: usize = 10;
const FSEL_BITS: usize = 3;
const FSEL_MASK: u32 = 0b111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input = 0,
    Output = 1,
}

/// Direct register access to bank 0 of the GPIO block.
///
/// This is the non-DMA path: claiming pins for output and forcing levels.
/// Pins are not range checked here; `set_high`, `set_low` and `is_high`
/// cover pins 0..31 only.
pub struct Gpio<'a, W: RegisterWindow> {
    regs: &'a mut W,
}

impl<'a, W: RegisterWindow> Gpio<'a, W> {
    pub fn new(regs: &'a mut W) -> Self {
        Self { regs }
    }

    pub fn set_mode(&mut self, pin: u8, mode: PinMode) {
        let pin = usize::from(pin);
        let reg = GPIO_FSEL0 + pin / FSEL_PINS_PER_REG;
        let shift = (pin % FSEL_PINS_PER_REG) * FSEL_BITS;

        self.regs
            .modify(reg, |fsel| (fsel & !(FSEL_MASK << shift)) | ((mode as u32) << shift));
    }

    pub fn set_high(&mut self, pin: u8) {
        self.regs.write(GPIO_SET0, 1 << pin);
    }

    pub fn set_low(&mut self, pin: u8) {
        self.regs.write(GPIO_CLR0, 1 << pin);
    }

    pub fn is_high(&self, pin: u8) -> bool {
        self.regs.read(GPIO_LEV0) & (1 << pin) != 0
    }

    /// Drive the pin low and switch it to output.
    pub fn claim_output(&mut self, pin: u8) {
        self.set_low(pin);
        self.set_mode(pin, PinMode::Output);
    }
}
