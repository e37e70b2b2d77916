//! Tuning-word table construction: the mathematical half of C3 (spec §4.3).
//!
//! Grounded on `examples/original_source/src/main.cpp`'s `setupDMATab`,
//! translated from its `bit_trunc`/`floor` f64 arithmetic one-to-one so the
//! fixed-point results stay bit-identical across runs (spec §9
//! "Floating-point reproducibility").

use rf_hal::registers::PASSWORD;

use crate::error::{Error, Result};

/// WSPR-2 symbol period: 8192/12000 s.
pub const WSPR2_SYMBOL_PERIOD_S: f64 = 8192.0 / 12000.0;
/// WSPR-15 symbol period: 8x WSPR-2.
pub const WSPR15_SYMBOL_PERIOD_S: f64 = WSPR2_SYMBOL_PERIOD_S * 8.0;

pub const TABLE_LEN: usize = 1024;
const FILLER_START: usize = 8;

/// Tone spacing is the reciprocal of the symbol period.
pub fn tone_spacing_hz(symbol_period_s: f64) -> f64 {
    1.0 / symbol_period_s
}

/// Truncates `ratio` to a 12-bit fractional fixed-point divider, returned as
/// a raw 24-bit integer (12 bits integer part, 12 bits fraction).
fn to_fixed_12_12(ratio: f64) -> u32 {
    (ratio * 4096.0).floor() as u32
}

#[derive(Clone)]
pub struct TuningTable {
    /// Upper byte `0x5A`, lower 24 bits the 12.12 divider; ready to write
    /// verbatim into the tuning-word page.
    pub words: [u32; TABLE_LEN],
    /// Exact output frequency each entry in `words` yields.
    pub frequencies: [f64; TABLE_LEN],
}

pub struct Rebuild {
    pub table: TuningTable,
    /// The center frequency actually used, which may differ from the
    /// requested one if step 2's integer-divider correction fired.
    pub center_actual_hz: f64,
}

/// Rebuilds the tuning-word table for a target center frequency and tone
/// spacing under a (possibly PPM-corrected) PLLD reference frequency.
pub fn rebuild(plld_hz: f64, center_hz: f64, tone_spacing_hz: f64) -> Result<Rebuild> {
    let div_lo_raw = to_fixed_12_12(plld_hz / (center_hz - 1.5 * tone_spacing_hz)) + 1;
    let div_hi_raw = to_fixed_12_12(plld_hz / (center_hz + 1.5 * tone_spacing_hz));

    let mut center_actual_hz = center_hz;
    if (div_lo_raw >> 12) != (div_hi_raw >> 12) {
        let floor_lo = (div_lo_raw >> 12) as f64;
        center_actual_hz = plld_hz / floor_lo - 1.6 * tone_spacing_hz;
        log::warn!(
            "center frequency changed to {:.6} MHz because of hardware limitations",
            center_actual_hz / 1e6
        );
    }

    let mut raw = [0u32; TABLE_LEN];
    for k in 0..4u32 {
        let f_k = center_actual_hz - 1.5 * tone_spacing_hz + f64::from(k) * tone_spacing_hz;
        let lower = to_fixed_12_12(plld_hz / f_k);
        raw[(2 * k) as usize] = lower;
        raw[(2 * k + 1) as usize] = lower + 1;
    }
    // Filler entries hold a literal safe divider value, not a frequency
    // conversion: divider = 500 + i, so these land far outside the WSPR band
    // regardless of PLLD or center frequency (spec §4.3 step 4).
    for (i, slot) in raw.iter_mut().enumerate().skip(FILLER_START) {
        *slot = ((500 + i) as u32) << 12;
    }

    for k in 0..4usize {
        let i = 2 * k;
        if (raw[i] >> 12) != (raw[i + 1] >> 12) {
            return Err(Error::FrequencyOutOfBand { center_hz, tone_spacing_hz, plld_hz });
        }
    }

    let mut words = [0u32; TABLE_LEN];
    let mut frequencies = [0f64; TABLE_LEN];
    for i in 0..TABLE_LEN {
        words[i] = (PASSWORD << 24) | (raw[i] & 0x00FF_FFFF);
        frequencies[i] = plld_hz / (raw[i] as f64 / 4096.0);
    }

    Ok(Rebuild { table: TuningTable { words, frequencies }, center_actual_hz })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLLD_NOMINAL: f64 = 500_000_000.0;

    #[test]
    fn integer_alignment_holds_for_typical_wspr2_setup() {
        let delta = tone_spacing_hz(WSPR2_SYMBOL_PERIOD_S);
        let rebuild = rebuild(PLLD_NOMINAL, 14_097_100.0, delta).unwrap();
        for k in 0..4usize {
            let i = 2 * k;
            assert_eq!(rebuild.table.words[i] >> 12, rebuild.table.words[i + 1] >> 12);
        }
    }

    #[test]
    fn frequency_table_brackets_each_tone() {
        let delta = tone_spacing_hz(WSPR2_SYMBOL_PERIOD_S);
        let center = 14_097_100.0;
        let rebuild = rebuild(PLLD_NOMINAL, center, delta).unwrap();
        let fc = rebuild.center_actual_hz;
        for k in 0..4usize {
            let target = fc - 1.5 * delta + k as f64 * delta;
            let f_lower = rebuild.table.frequencies[2 * k + 1];
            let f_upper = rebuild.table.frequencies[2 * k];
            assert!(f_lower <= target, "k={k} f_lower={f_lower} target={target}");
            assert!(target <= f_upper, "k={k} target={target} f_upper={f_upper}");
        }
    }

    #[test]
    fn every_word_carries_the_password_byte() {
        let delta = tone_spacing_hz(WSPR2_SYMBOL_PERIOD_S);
        let rebuild = rebuild(PLLD_NOMINAL, 14_097_100.0, delta).unwrap();
        for word in rebuild.table.words.iter() {
            assert_eq!(word >> 24, PASSWORD);
        }
    }

    #[test]
    fn wspr15_subband_center_is_synthesizable() {
        let delta = tone_spacing_hz(WSPR15_SYMBOL_PERIOD_S);
        assert!(rebuild(PLLD_NOMINAL, 137_612.5, delta).is_ok());
    }
}
