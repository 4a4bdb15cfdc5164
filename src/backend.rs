use crate::PwmError;
use crate::arena::{self, LockedArena, PAGE_SHIFT, PAGE_SIZE, PageFault, PageMap};
use crate::delay::PreciseSleep;
use crate::peripheral::{self, MappedWindow};
use crate::registers::{FakeWindow, RegisterWindow};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Where the engine gets its register windows, DMA memory and settle delays.
pub trait Backend {
    type Window: RegisterWindow;
    type Memory: RegisterWindow;

    fn map_peripheral(
        &mut self,
        base: u32,
        len: usize,
        what: &'static str,
    ) -> Result<Self::Window, PwmError>;

    fn allocate_arena(
        &mut self,
        pages: usize,
        alias: u32,
    ) -> Result<(Self::Memory, PageMap), PwmError>;

    fn settle(&mut self, delay: Duration);

    /// Called once every window is mapped, right before the clock is
    /// programmed. From here on the hardware belongs to this engine.
    fn commit(&mut self) {}
}

static ENGINE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Rounds of 1 ms sleeps used to measure the sleep overhead.
pub const CALIBRATION_ROUNDS: u32 = 100;

/// Real hardware through `/dev/mem` and `/proc/self/pagemap`. Needs root.
///
/// Only one can be open at a time. Dropping it before the engine commits
/// (for example after a failed mapping) frees the slot for a retry. Once
/// committed the slot is held until process exit: the clock setup and the
/// running DMA channels cannot be handed over to a second engine.
#[derive(Debug)]
pub struct DevMem {
    sleeper: PreciseSleep,
    committed: bool,
}

impl DevMem {
    pub fn open() -> Result<Self, PwmError> {
        if ENGINE_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(PwmError::EngineActive);
        }

        Ok(Self {
            sleeper: PreciseSleep::calibrate(CALIBRATION_ROUNDS),
            committed: false,
        })
    }
}

impl Drop for DevMem {
    fn drop(&mut self) {
        if !self.committed {
            ENGINE_ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}

impl Backend for DevMem {
    type Window = MappedWindow;
    type Memory = LockedArena;

    fn map_peripheral(
        &mut self,
        base: u32,
        len: usize,
        what: &'static str,
    ) -> Result<MappedWindow, PwmError> {
        peripheral::map(base, len, what)
    }

    fn allocate_arena(
        &mut self,
        pages: usize,
        alias: u32,
    ) -> Result<(LockedArena, PageMap), PwmError> {
        arena::allocate(pages, alias)
    }

    fn settle(&mut self, delay: Duration) {
        self.sleeper.sleep(delay);
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

/// First frame number handed out by [`Simulated`].
const SIMULATED_FIRST_FRAME: u32 = 0x1000;

/// In-memory stand-in for the hardware.
///
/// Register windows are [`FakeWindow`]s. Arena pages get synthetic frame
/// numbers in descending order, so no two neighbouring pages are physically
/// contiguous. Settle delays are only accumulated, never slept.
#[derive(Debug, Default)]
pub struct Simulated {
    allocations: usize,
    next_frame: u32,
    settled: Duration,
    deny_device: bool,
    page_fault: Option<PageFault>,
    committed: bool,
}

impl Simulated {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every peripheral mapping fails as if run without root.
    #[must_use]
    pub fn denying_device_access() -> Self {
        Self {
            deny_device: true,
            ..Self::default()
        }
    }

    /// Arena allocation fails resolving its last page with `fault`.
    #[must_use]
    pub fn with_page_fault(fault: PageFault) -> Self {
        Self {
            page_fault: Some(fault),
            ..Self::default()
        }
    }

    /// Number of arenas handed out successfully.
    pub fn arena_allocations(&self) -> usize {
        self.allocations
    }

    /// Sum of every settle delay requested so far.
    pub fn settled(&self) -> Duration {
        self.settled
    }

    /// Whether an engine has taken over this backend.
    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

impl Backend for Simulated {
    type Window = FakeWindow;
    type Memory = FakeWindow;

    fn map_peripheral(
        &mut self,
        base: u32,
        len: usize,
        what: &'static str,
    ) -> Result<FakeWindow, PwmError> {
        if self.deny_device {
            return Err(PwmError::Map {
                what,
                base,
                source: std::io::ErrorKind::PermissionDenied.into(),
            });
        }

        Ok(FakeWindow::with_byte_len(len))
    }

    fn allocate_arena(
        &mut self,
        pages: usize,
        alias: u32,
    ) -> Result<(FakeWindow, PageMap), PwmError> {
        if let Some(reason) = self.page_fault {
            return Err(PwmError::PageResolution {
                page: pages.saturating_sub(1),
                reason,
            });
        }

        let first = SIMULATED_FIRST_FRAME + self.next_frame;
        let bus_pages = (0..pages as u32)
            .rev()
            .map(|page| ((first + page) << PAGE_SHIFT) | alias)
            .collect();

        self.next_frame += pages as u32;
        self.allocations += 1;

        Ok((
            FakeWindow::with_byte_len(pages * PAGE_SIZE),
            PageMap::new(bus_pages),
        ))
    }

    fn settle(&mut self, delay: Duration) {
        self.settled += delay;
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}
