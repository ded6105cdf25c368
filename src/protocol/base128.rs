// src/protocol/base128.rs
//
// Fixed five-byte base-128 encoding of 32-bit values.
//
// Each byte carries 7 bits, most significant group first, offset by 32 so the
// encoded bytes stay clear of control characters (and therefore of STX/ETX).
//
// Sign contract: the five groups form a 35-bit raw value whose low 32 bits are
// the two's-complement i32. Bit 31 (bit 3 of the first group) is the sign bit;
// bits 4-6 of the first group are the encoder's sign copies and are ignored
// when decoding.

/// Number of bytes in an encoded value
pub const ENCODED_LEN: usize = 5;
/// Offset added to every 7-bit group
pub const BYTE_OFFSET: u8 = 32;

const SHIFTS: [u32; ENCODED_LEN] = [28, 21, 14, 7, 0];

/// Encode a value as five offset base-128 bytes.
pub fn encode(value: i32) -> [u8; ENCODED_LEN] {
    let mut out = [0u8; ENCODED_LEN];
    for (slot, &shift) in out.iter_mut().zip(SHIFTS.iter()) {
        *slot = ((value >> shift) & 0x7F) as u8 + BYTE_OFFSET;
    }
    out
}

/// Decode five offset base-128 bytes.
pub fn decode(bytes: &[u8; ENCODED_LEN]) -> i32 {
    let raw = bytes.iter().fold(0u64, |acc, &b| {
        (acc << 7) | u64::from(b.wrapping_sub(BYTE_OFFSET) & 0x7F)
    });
    raw as u32 as i32
}

/// Decode the value starting at `offset` in a frame.
///
/// Returns `None` when fewer than five bytes remain.
pub fn decode_at(frame: &[u8], offset: usize) -> Option<i32> {
    let end = offset.checked_add(ENCODED_LEN)?;
    let bytes: &[u8; ENCODED_LEN] = frame.get(offset..end)?.try_into().ok()?;
    Some(decode(bytes))
}
