use std::thread;
use std::time::{Duration, Instant};

/// Above this a plain thread sleep is accurate enough.
pub const COARSE_SLEEP_THRESHOLD: Duration = Duration::from_millis(100);
/// Below this the scheduler wake-up latency dominates, so spin instead.
pub const BUSY_WAIT_THRESHOLD: Duration = Duration::from_micros(450);

const CALIBRATION_REFERENCE: Duration = Duration::from_millis(1);

/// Best-effort sub-millisecond sleep.
///
/// The average overshoot of a 1 ms `nanosleep` is measured once and
/// subtracted from every medium-length request afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreciseSleep {
    overhead: Duration,
}

impl PreciseSleep {
    #[must_use]
    pub fn calibrate(rounds: u32) -> Self {
        if rounds == 0 {
            return Self::default();
        }

        let mut excess = Duration::ZERO;
        for _ in 0..rounds {
            let start = Instant::now();
            thread::sleep(CALIBRATION_REFERENCE);
            excess += start.elapsed().saturating_sub(CALIBRATION_REFERENCE);
        }

        let overhead = excess / rounds;
        tracing::debug!(overhead_ns = overhead.as_nanos() as u64, "calibrated sleep");

        Self { overhead }
    }

    pub const fn with_overhead(overhead: Duration) -> Self {
        Self { overhead }
    }

    pub fn overhead(&self) -> Duration {
        self.overhead
    }

    pub fn sleep(&self, delay: Duration) {
        if delay >= COARSE_SLEEP_THRESHOLD {
            thread::sleep(delay);
        } else if delay > BUSY_WAIT_THRESHOLD {
            thread::sleep(delay.saturating_sub(self.overhead));
        } else {
            let start = Instant::now();
            while start.elapsed() < delay {
                std::hint::spin_loop();
            }
        }
    }
}
