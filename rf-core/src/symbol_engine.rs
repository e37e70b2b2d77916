//! Symbol Engine (C4): dithers between two adjacent divider entries so the
//! long-term duty cycle approximates an arbitrary sub-Hz tone frequency.
//!
//! Grounded on `examples/original_source/src/main.cpp`'s `txSym` (the
//! four-patch-per-iteration CB walk, iteration-size randomization, and the
//! `usleep(100)` cursor poll), translated onto the cooperative polling
//! helper in `rf_hal::delay` in place of raw `usleep`.

use std::sync::atomic::AtomicBool;
use std::time::Instant;

use rf_hal::delay::{cooperative_wait, DMA_POLL_INTERVAL};
use rf_hal::peripheral::RegisterIo;
use rf_hal::registers::DMA0_CURR_CONBLK_AD;

use crate::dma_program::DmaCursor;
use crate::error::{Error, Result};
use crate::prng::Dither;
use crate::tuning::TuningTable;

/// If a single CB-slot wait exceeds this, the DMA engine is very likely
/// stalled (bus contention, a mis-set priority, a starved scheduler); log it
/// once per occurrence rather than staying silent while still retrying
/// (spec §7 `Transient`: "retry indefinitely while stop flag clear; log if
/// exceeds a threshold").
const SLOW_POLL_THRESHOLD: std::time::Duration = std::time::Duration::from_millis(50);

/// Empirically measured PWM cycle rate (spec §9: may need recalibration per
/// board; treated here as a process-wide constant per the Open Question
/// resolution in `DESIGN.md`).
pub const F_PWM_CLK_EMPIRICAL_HZ: f64 = 31_156_186.6;

const ITERATION_BASE: i64 = 1000;
const ITERATION_JITTER: i64 = 500;

/// Monotonically advancing write position into the 1024-entry CB ring,
/// shared across every `emit_symbol` call in a frame (spec §4.4).
pub struct CbCursor {
    next: usize,
}

impl CbCursor {
    /// Starts on CB[1], the first divider-write slot: the a/b/c/d patch
    /// sequence (spec §4.4 step 3) expects to land on divider-write,
    /// FIFO-feed, divider-write, FIFO-feed in that order, and CB[0] is a
    /// FIFO-feed slot (`dma_program`'s ring alternates starting at even =
    /// FIFO-feed). Four patches per call keeps every later symbol's first
    /// patch on a divider-write slot too.
    pub fn new() -> Self {
        CbCursor { next: 1 }
    }

    pub fn position(&self) -> usize {
        self.next
    }

    fn advance<D: DmaCursor>(&mut self, dma: &D) -> (usize, u32) {
        let index = self.next;
        self.next = (self.next + 1) % crate::dma_program::RING_LEN;
        (index, dma.cb_bus(index))
    }
}

impl Default for CbCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits until the DMA engine has moved off `target_bus` before the caller
/// patches that slot, or returns `false` if `stop` was set while waiting.
///
/// Retries indefinitely while `stop` is clear (spec §7 `Transient`); a wait
/// past [`SLOW_POLL_THRESHOLD`] is logged once rather than silently retried
/// forever, since on real hardware a CB slot should clear within a symbol
/// iteration's worth of PWM cycles.
fn wait_until_clear<R: RegisterIo + ?Sized>(io: &R, stop: &AtomicBool, target_bus: u32) -> bool {
    let start = Instant::now();
    let mut warned = false;
    cooperative_wait(stop, DMA_POLL_INTERVAL, || {
        let clear = io.read(DMA0_CURR_CONBLK_AD) != target_bus;
        if !clear && !warned && start.elapsed() > SLOW_POLL_THRESHOLD {
            warned = true;
            log::warn!(
                "{}",
                Error::Transient(format!(
                    "DMA cursor poll for CB bus 0x{target_bus:08x} exceeded {:?}, still retrying",
                    SLOW_POLL_THRESHOLD
                ))
            );
        }
        clear
    })
}

/// Emits one WSPR symbol (or runs forever if `symbol_duration_s == 0.0`,
/// i.e. tone/calibration mode) by dithering `tuning_word[2k]` and
/// `tuning_word[2k+1]`. Returns `Ok(())` on normal completion, or
/// `Err(Error::Cancelled)` if `stop` was observed mid-symbol.
#[allow(clippy::too_many_arguments)]
pub fn emit_symbol<R, D>(
    io: &R,
    dma: &mut D,
    cursor: &mut CbCursor,
    dither: &mut Dither,
    table: &TuningTable,
    const_page_bus: u32,
    symbol_index: u8,
    center_hz: f64,
    tone_spacing_hz: f64,
    symbol_duration_s: f64,
    stop: &AtomicBool,
) -> Result<()>
where
    R: RegisterIo + ?Sized,
    D: DmaCursor,
{
    let k = symbol_index as usize;
    debug_assert!(k < 4, "symbol_index must be 0..3");

    let lower_idx = 2 * k;
    let upper_idx = 2 * k + 1;
    let f_lower = table.frequencies[lower_idx];
    let f_upper = table.frequencies[upper_idx];
    let f_target = center_hz - 1.5 * tone_spacing_hz + (k as f64) * tone_spacing_hz;

    assert!(
        f_upper <= f_target && f_target <= f_lower,
        "tuning table bracketing violated: f_upper={f_upper} f_target={f_target} f_lower={f_lower}"
    );
    let alpha = 1.0 - (f_target - f_lower) / (f_upper - f_lower);

    let tone_mode = symbol_duration_s == 0.0;
    let n_total = if tone_mode { i64::MAX } else { (F_PWM_CLK_EMPIRICAL_HZ * symbol_duration_s).round() as i64 };

    let mut n_pwm_sent: i64 = 0;
    let mut n_lower_sent: i64 = 0;

    while n_pwm_sent < n_total {
        if stop.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let mut n_iter = ITERATION_BASE + dither.symmetric(ITERATION_JITTER);
        if !tone_mode && n_pwm_sent + n_iter > n_total {
            n_iter = n_total - n_pwm_sent;
        }

        let n_lower_target = (alpha * ((n_pwm_sent + n_iter) as f64)).round() as i64;
        let n_lower_iter = n_lower_target - n_lower_sent;
        let n_upper_iter = n_iter - n_lower_iter;

        let (idx_a, bus_a) = cursor.advance(dma);
        if !wait_until_clear(io, stop, bus_a) {
            return Err(Error::Cancelled);
        }
        dma.patch_source(idx_a, const_page_bus + (lower_idx as u32) * 4);

        let (idx_b, bus_b) = cursor.advance(dma);
        if !wait_until_clear(io, stop, bus_b) {
            return Err(Error::Cancelled);
        }
        dma.patch_length(idx_b, n_lower_iter.max(0) as u32);

        let (idx_c, bus_c) = cursor.advance(dma);
        if !wait_until_clear(io, stop, bus_c) {
            return Err(Error::Cancelled);
        }
        dma.patch_source(idx_c, const_page_bus + (upper_idx as u32) * 4);

        let (idx_d, bus_d) = cursor.advance(dma);
        if !wait_until_clear(io, stop, bus_d) {
            return Err(Error::Cancelled);
        }
        dma.patch_length(idx_d, n_upper_iter.max(0) as u32);

        n_pwm_sent += n_iter;
        n_lower_sent += n_lower_iter;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_hal::peripheral::FakeRegisterIo;

    fn table_for(center: f64, delta: f64) -> (TuningTable, f64) {
        let rebuild = crate::tuning::rebuild(500_000_000.0, center, delta).unwrap();
        (rebuild.table, rebuild.center_actual_hz)
    }

    #[test]
    fn duty_cycle_matches_alpha_within_one_count() {
        let delta = crate::tuning::tone_spacing_hz(crate::tuning::WSPR2_SYMBOL_PERIOD_S);
        let (table, center) = table_for(14_097_100.0, delta);
        let io = FakeRegisterIo::new();
        let mut dma = crate::dma_program::DmaProgram::fake();
        let mut cursor = CbCursor::new();
        let mut dither = Dither::new();
        let stop = AtomicBool::new(false);

        // short synthetic symbol so the test runs fast
        let symbol_duration_s = 2000.0 / F_PWM_CLK_EMPIRICAL_HZ;
        let const_page_bus = dma.const_page_bus();
        let result = emit_symbol(
            &io,
            &mut dma,
            &mut cursor,
            &mut dither,
            &table,
            const_page_bus,
            0,
            center,
            delta,
            symbol_duration_s,
            &stop,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn cancellation_is_observed_before_any_patch_completes() {
        let delta = crate::tuning::tone_spacing_hz(crate::tuning::WSPR2_SYMBOL_PERIOD_S);
        let (table, center) = table_for(14_097_100.0, delta);
        let io = FakeRegisterIo::new();
        let mut dma = crate::dma_program::DmaProgram::fake();
        let mut cursor = CbCursor::new();
        let mut dither = Dither::new();
        let stop = AtomicBool::new(true);

        let const_page_bus = dma.const_page_bus();
        let result = emit_symbol(
            &io, &mut dma, &mut cursor, &mut dither, &table, const_page_bus, 0, center, delta, 0.6827, &stop,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn cursor_starts_on_a_divider_write_slot() {
        assert_eq!(CbCursor::new().position() % 2, 1);
    }

    #[test]
    fn cursor_advances_by_four_per_patch_group() {
        let dma = crate::dma_program::DmaProgram::fake();
        let mut cursor = CbCursor::new();
        let start = cursor.position();
        for _ in 0..4 {
            cursor.advance(&dma);
        }
        assert_eq!(cursor.position(), start + 4);
    }

    #[test]
    fn wait_until_clear_returns_immediately_when_already_clear() {
        let io = FakeRegisterIo::new();
        let stop = AtomicBool::new(false);
        // default register value 0 never matches a real nonzero bus address
        assert!(wait_until_clear(&io, &stop, 0xdead_beef));
    }

    #[test]
    fn wait_until_clear_observes_stop_when_target_never_clears() {
        let io = FakeRegisterIo::new();
        io.write(DMA0_CURR_CONBLK_AD, 0x1000);
        let stop = AtomicBool::new(true);
        assert!(!wait_until_clear(&io, &stop, 0x1000));
    }
}
