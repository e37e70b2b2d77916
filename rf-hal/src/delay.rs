//! Cooperative polling helpers.
//!
//! Grounded on `hs-probe-bsp/src/delay.rs`'s `Delay` (elapsed-ticks helpers
//! built around a free-running counter), generalized from a SysTick counter
//! to the host's monotonic clock, and extended with the stop-flag
//! cancellation the Design Notes call for in place of condition variables:
//! "Do not substitute condition variables here — hardware register polling
//! is the correct primitive."

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval for watching the DMA engine's current-CB register
/// (spec §4.4 step 4: "MUST yield at <=100 us granularity").
pub const DMA_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Poll interval for the WSPR-window wall-clock wait (spec §4.5).
pub const WINDOW_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Sleeps in `interval` increments, calling `ready` each wake, until either
/// `ready` returns true or `stop` is set. Returns `true` if `ready` was
/// satisfied, `false` if cancelled.
pub fn cooperative_wait<F: FnMut() -> bool>(stop: &AtomicBool, interval: Duration, mut ready: F) -> bool {
    loop {
        if ready() {
            return true;
        }
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        thread::sleep(interval);
    }
}

/// Elapsed wall-clock seconds since `anchor`, as an `f64` (used by the
/// symbol scheduler's jitter-compensation feedback, spec §4.5).
pub fn elapsed_secs(anchor: Instant) -> f64 {
    anchor.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooperative_wait_returns_true_when_ready() {
        let stop = AtomicBool::new(false);
        let mut calls = 0;
        let ok = cooperative_wait(&stop, Duration::from_micros(1), || {
            calls += 1;
            calls >= 3
        });
        assert!(ok);
        assert_eq!(calls, 3);
    }

    #[test]
    fn cooperative_wait_returns_false_when_stopped() {
        let stop = AtomicBool::new(true);
        let ok = cooperative_wait(&stop, Duration::from_micros(1), || false);
        assert!(!ok);
    }
}
