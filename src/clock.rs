use crate::registers::RegisterWindow;
use std::time::Duration;

pub const PWM_CTL: usize = 0x00 / 4;
pub const PWM_DMAC: usize = 0x08 / 4;
pub const PWM_RNG1: usize = 0x10 / 4;

pub const PWMCLK_CNTL: usize = 40;
pub const PWMCLK_DIV: usize = 41;

pub const PWMCTL_PWEN1: u32 = 1 << 0;
pub const PWMCTL_USEF1: u32 = 1 << 5;
pub const PWMCTL_CLRF: u32 = 1 << 6;

pub const PWMDMAC_ENAB: u32 = 1 << 31;
pub const PWMDMAC_THRSHLD: u32 = (15 << 8) | 15;

/// Clock manager password, required in the top byte of every write.
const CM_PASSWD: u32 = 0x5A << 24;
const CM_SRC_PLLD: u32 = 6;
const CM_ENAB: u32 = 1 << 4;

/// PLLD runs at 500 MHz; dividing by 50 clocks the PWM at 10 MHz.
pub const PWM_CLOCK_DIVISOR: u32 = 50;
/// PWM clock ticks per microsecond at that divisor.
pub const PWM_TICKS_PER_US: u32 = 10;

pub const CLOCK_SETTLE: Duration = Duration::from_micros(100);
pub const PWM_SETTLE: Duration = Duration::from_micros(10);

/// Program the PWM clock so that the PWM raises one DMA request every
/// `increment_us` microseconds.
///
/// Runs once per engine. `settle` is called after each write with the delay
/// the hardware needs before the next one.
pub fn configure_global_clock(
    pwm: &mut impl RegisterWindow,
    clk: &mut impl RegisterWindow,
    increment_us: u32,
    mut settle: impl FnMut(Duration),
) {
    pwm.write(PWM_CTL, 0);
    settle(PWM_SETTLE);
    clk.write(PWMCLK_CNTL, CM_PASSWD | CM_SRC_PLLD);
    settle(CLOCK_SETTLE);
    clk.write(PWMCLK_DIV, CM_PASSWD | (PWM_CLOCK_DIVISOR << 12));
    settle(CLOCK_SETTLE);
    clk.write(PWMCLK_CNTL, CM_PASSWD | CM_ENAB | CM_SRC_PLLD);
    settle(CLOCK_SETTLE);
    pwm.write(PWM_RNG1, increment_us * PWM_TICKS_PER_US);
    settle(PWM_SETTLE);
    pwm.write(PWM_DMAC, PWMDMAC_ENAB | PWMDMAC_THRSHLD);
    settle(PWM_SETTLE);
    pwm.write(PWM_CTL, PWMCTL_CLRF);
    settle(PWM_SETTLE);
    pwm.write(PWM_CTL, PWMCTL_USEF1 | PWMCTL_PWEN1);
    settle(PWM_SETTLE);
}
