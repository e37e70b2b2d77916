//! WSPR Frame Encoder: `encode(callsign, grid, power_dbm) -> [u8; 162]`.
//!
//! A pure, side-effect-free function (spec §4.6), subordinate to the
//! scheduler (C5). The retrieval pack's `wspr_message.cpp` (the original's
//! counterpart) was not available — only its header — so this follows the
//! published WSPR protocol algorithm directly rather than a specific
//! implementation. The reference vector pinned in this module's tests was
//! derived from this same algorithm computed independently of the Rust code
//! path (see `DESIGN.md`); it is a checked regression, not a verification
//! against the official WSJT-X encoder output.

use crate::error::{Error, Result};

pub const SYMBOL_COUNT: usize = 162;

const CONV_POLY_A: u32 = 0xF2D0_5351;
const CONV_POLY_B: u32 = 0xE461_3C47;
const SOURCE_BITS: usize = 50;
const FLUSHED_BITS: usize = 81; // 50 + 31 zero flush bits for a K=32 encoder

/// The canonical WSPR sync vector (spec §6: "non-derivable; implementer
/// must embed the published table verbatim").
#[rustfmt::skip]
const SYNC_VECTOR: [u8; SYMBOL_COUNT] = [
    1,1,0,0,0,0,0,0,1,0,0,0,1,1,1,0,0,0,
    1,0,0,1,0,1,1,1,1,0,0,0,0,0,0,0,1,0,
    0,1,0,1,0,0,0,0,0,0,1,0,1,1,0,0,1,1,
    0,1,0,0,0,1,1,0,1,0,1,0,0,0,1,0,0,0,
    0,0,1,0,1,1,0,0,1,1,0,1,0,0,0,1,1,0,
    0,0,0,0,1,0,1,0,0,1,1,0,0,0,0,0,0,0,
    1,1,0,1,1,0,1,0,1,0,1,0,1,0,0,0,0,0,
    1,1,0,0,1,1,0,1,0,0,0,1,1,0,0,0,0,0,
    1,0,1,0,0,1,1,0,0,0,0,0,0,0,0,0,1,0,
];

/// WSPR's per-character alphabet value: digits 0-9, letters 10-35, space 36.
fn char_value(c: char) -> Option<u32> {
    match c {
        '0'..='9' => Some(c as u32 - '0' as u32),
        'A'..='Z' => Some(10 + (c as u32 - 'A' as u32)),
        ' ' => Some(36),
        _ => None,
    }
}

/// Normalizes a callsign to a 6-character field with a digit at index 2
/// (spec §4.6 step 1): 5-character calls with a digit at index 1 get a
/// leading space; calls already carrying the digit at index 2 are padded on
/// the right.
fn normalize_callsign(callsign: &str) -> Result<[char; 6]> {
    let upper = callsign.trim().to_ascii_uppercase();
    if upper.is_empty() || upper.len() > 6 {
        return Err(Error::encoder_input(format!("callsign '{callsign}' has invalid length")));
    }
    let chars: Vec<char> = upper.chars().collect();

    let padded: Vec<char> = if chars.len() >= 2 && chars[1].is_ascii_digit() {
        std::iter::once(' ').chain(chars.iter().copied()).collect()
    } else if chars.len() >= 3 && chars[2].is_ascii_digit() {
        chars.clone()
    } else {
        return Err(Error::encoder_input(format!(
            "callsign '{callsign}' has no digit in the expected position"
        )));
    };

    let mut field = [' '; 6];
    for (i, c) in padded.iter().enumerate().take(6) {
        field[i] = *c;
    }
    if padded.len() > 6 {
        return Err(Error::encoder_input(format!("callsign '{callsign}' is too long")));
    }
    for c in field.iter() {
        if char_value(*c).is_none() {
            return Err(Error::encoder_input(format!("callsign '{callsign}' has an invalid character")));
        }
    }
    if !field[2].is_ascii_digit() {
        return Err(Error::encoder_input(format!("callsign '{callsign}' has no digit in position 2")));
    }
    for c in &field[3..6] {
        if char_value(*c).unwrap_or(0) < 10 {
            return Err(Error::encoder_input(format!(
                "callsign '{callsign}' may only have letters or spaces after its digit"
            )));
        }
    }
    Ok(field)
}

/// Packs the normalized 6-character callsign field into a 28-bit integer
/// (spec §4.6 step 1's polynomial).
fn pack_callsign(field: &[char; 6]) -> u32 {
    let v: Vec<u32> = field.iter().map(|c| char_value(*c).unwrap()).collect();
    let n1 = (((v[0] * 36 + v[1]) * 10 + v[2]) * 27 + (v[3] - 10)) * 27 + (v[4] - 10);
    n1 * 27 + (v[5] - 10)
}

/// Packs the 4-character Maidenhead grid and 0..60 dBm power into a 22-bit
/// integer (spec §4.6 step 2).
fn pack_grid_power(grid: &str, power_dbm: u8) -> Result<u32> {
    let chars: Vec<char> = grid.trim().to_ascii_uppercase().chars().collect();
    if chars.len() != 4 {
        return Err(Error::encoder_input(format!("grid '{grid}' must be 4 characters")));
    }
    let field_valid = |c: char| ('A'..='R').contains(&c);
    let square_valid = |c: char| c.is_ascii_digit();
    if !field_valid(chars[0]) || !field_valid(chars[1]) || !square_valid(chars[2]) || !square_valid(chars[3]) {
        return Err(Error::encoder_input(format!("grid '{grid}' is not a valid Maidenhead locator")));
    }
    if !is_canonical_wspr_dbm(power_dbm) {
        return Err(Error::encoder_input(format!("power {power_dbm} dBm is not a canonical WSPR level")));
    }

    let lon_field = chars[0] as u32 - 'A' as u32;
    let lat_field = chars[1] as u32 - 'A' as u32;
    let lon_square = chars[2] as u32 - '0' as u32;
    let lat_square = chars[3] as u32 - '0' as u32;

    let ng = 180 * (179 - 10 * lon_field - lon_square) + 10 * lat_field + lat_square;
    Ok(ng * 128 + u32::from(power_dbm) + 64)
}

/// The canonical WSPR power levels (spec §6, §7 `EncoderInput`).
pub const CANONICAL_DBM_LEVELS: [u8; 19] =
    [0, 3, 7, 10, 13, 17, 20, 23, 27, 30, 33, 37, 40, 43, 47, 50, 53, 57, 60];

pub fn is_canonical_wspr_dbm(dbm: u8) -> bool {
    CANONICAL_DBM_LEVELS.contains(&dbm)
}

fn parity(mut x: u32) -> u8 {
    x ^= x >> 16;
    x ^= x >> 8;
    x ^= x >> 4;
    x ^= x >> 2;
    x ^= x >> 1;
    (x & 1) as u8
}

fn bit_reverse_8(mut b: u8) -> u8 {
    let mut r = 0u8;
    for _ in 0..8 {
        r = (r << 1) | (b & 1);
        b >>= 1;
    }
    r
}

/// Encodes a WSPR message into its 162 four-level channel symbols.
pub fn encode(callsign: &str, grid: &str, power_dbm: u8) -> Result<[u8; SYMBOL_COUNT]> {
    let field = normalize_callsign(callsign)?;
    let n1 = pack_callsign(&field);
    let n2 = pack_grid_power(grid, power_dbm)?;

    let mut source_bits = [0u8; FLUSHED_BITS];
    for i in 0..28 {
        source_bits[i] = ((n1 >> (27 - i)) & 1) as u8;
    }
    for i in 0..22 {
        source_bits[28 + i] = ((n2 >> (21 - i)) & 1) as u8;
    }
    // remaining FLUSHED_BITS - SOURCE_BITS entries are already zero (flush).

    let mut channel = [0u8; SYMBOL_COUNT];
    let mut reg: u32 = 0;
    for (i, bit) in source_bits.iter().enumerate() {
        reg = (reg << 1) | u32::from(*bit);
        channel[2 * i] = parity(reg & CONV_POLY_A);
        channel[2 * i + 1] = parity(reg & CONV_POLY_B);
    }

    let mut interleaved = [0u8; SYMBOL_COUNT];
    let mut running = 0usize;
    for counter in 0u16..256 {
        let dest = bit_reverse_8(counter as u8) as usize;
        if dest < SYMBOL_COUNT {
            interleaved[dest] = channel[running];
            running += 1;
        }
    }
    debug_assert_eq!(running, SYMBOL_COUNT);

    let mut symbols = [0u8; SYMBOL_COUNT];
    for i in 0..SYMBOL_COUNT {
        symbols[i] = 2 * interleaved[i] + SYNC_VECTOR[i];
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_deterministic() {
        let a = encode("K1ABC", "FN42", 37).unwrap();
        let b = encode("K1ABC", "FN42", 37).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn all_symbols_in_range() {
        let symbols = encode("K1ABC", "FN42", 37).unwrap();
        assert_eq!(symbols.len(), SYMBOL_COUNT);
        for s in symbols {
            assert!(s <= 3);
        }
    }

    #[test]
    fn rejects_non_canonical_power() {
        assert!(encode("K1ABC", "FN42", 38).is_err());
    }

    #[test]
    fn rejects_malformed_grid() {
        assert!(encode("K1ABC", "XYZ", 37).is_err());
    }

    #[test]
    fn six_character_callsign_with_digit_already_in_place() {
        // "KA1ABC" places its digit at index 2 already; no leading pad needed.
        assert!(encode("KA1ABC", "FN42", 37).is_ok());
    }

    #[test]
    fn rejects_callsign_without_a_positional_digit() {
        assert!(encode("ABCDEF", "FN42", 37).is_err());
    }

    /// Spec §8 property 2 / scenario S1: `("K1ABC", "FN42", 37)` pinned
    /// against an independently computed reference (see `DESIGN.md` for how
    /// this was derived and its verification caveat).
    #[test]
    fn encode_matches_reference_vector_for_k1abc_fn42_37() {
        const FIRST_8: [u8; 8] = [3, 3, 0, 0, 2, 0, 0, 0];
        const LAST_8: [u8; 8] = [2, 0, 0, 2, 0, 2, 3, 2];
        let symbols = encode("K1ABC", "FN42", 37).unwrap();
        assert_eq!(&symbols[..8], &FIRST_8);
        assert_eq!(&symbols[SYMBOL_COUNT - 8..], &LAST_8);
    }
}
