//! Bit-field extraction from 8-byte bus frames.
//!
//! Malformed field descriptions never fail: bit positions that fall outside
//! the frame read as zero, and a zero or >64 length yields 0.

/// Largest field width in bits.
pub const MAX_BITS: u8 = 64;

/// Extract a raw unsigned field.
///
/// Little-endian fields walk `start + i` LSB-first. Big-endian (Motorola)
/// fields walk `start - i`, accumulating MSB-first.
pub fn extract(frame: &[u8; 8], start_bit: u16, bit_length: u8, big_endian: bool) -> u64 {
    if bit_length == 0 || bit_length > MAX_BITS {
        return 0;
    }

    let mut raw: u64 = 0;
    if big_endian {
        for i in 0..u16::from(bit_length) {
            let Some(pos) = start_bit.checked_sub(i) else {
                continue;
            };
            if pos >= 64 {
                continue;
            }
            raw = (raw << 1) | u64::from(bit_at(frame, pos));
        }
    } else {
        for i in 0..u16::from(bit_length) {
            let pos = start_bit.saturating_add(i);
            if pos >= 64 {
                continue;
            }
            raw |= u64::from(bit_at(frame, pos)) << i;
        }
    }
    raw
}

/// Extract a field and apply `raw * factor + offset`.
pub fn decode(
    frame: &[u8; 8],
    start_bit: u16,
    bit_length: u8,
    big_endian: bool,
    factor: f32,
    offset: f32,
) -> f32 {
    extract(frame, start_bit, bit_length, big_endian) as f32 * factor + offset
}

#[inline]
fn bit_at(frame: &[u8; 8], pos: u16) -> u8 {
    (frame[usize::from(pos / 8)] >> (pos % 8)) & 1
}
