// src/checksums.rs
//
// Checksum used by the STX/ETX frame format on both the command channel and
// the handshake bus.

/// Bit forced on in every frame checksum so it never collides with STX/ETX or
/// the printable range used by base-128 values.
pub const CHECKSUM_MARKER: u8 = 0x80;

/// XOR of all bytes.
pub fn xor_checksum(data: &[u8]) -> u8 {
    let mut result: u8 = 0;
    for &byte in data {
        result ^= byte;
    }
    result
}

/// Frame checksum: XOR of the bytes between STX and the checksum byte, with
/// bit 7 set.
pub fn frame_checksum(body: &[u8]) -> u8 {
    xor_checksum(body) | CHECKSUM_MARKER
}

/// Check a complete `STX .. checksum ETX` span.
///
/// Spans too short to carry a checksum byte never validate.
pub fn validate_frame_checksum(frame: &[u8]) -> bool {
    let len = frame.len();
    if len < 3 {
        return false;
    }
    frame_checksum(&frame[1..len - 2]) == frame[len - 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_checksum_basic() {
        // 0x01 ^ 0x02 ^ 0x03 ^ 0x04 ^ 0x05 = 0x01
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x03, 0x04, 0x05]), 0x01);
    }

    #[test]
    fn test_xor_checksum_empty() {
        assert_eq!(xor_checksum(&[]), 0);
    }

    #[test]
    fn test_frame_checksum_sets_marker_bit() {
        assert_eq!(frame_checksum(&[]), 0x80);
        assert_eq!(frame_checksum(&[0x0B, 0x04]), 0x8F);
        // Already-set bit 7 stays set
        assert_eq!(frame_checksum(&[0xC0]), 0xC0);
    }

    #[test]
    fn test_validate_frame_checksum() {
        // STX, addr 13, cmd 32, checksum, ETX
        let frame = [0x02, 0x0D, 0x20, 0x0D ^ 0x20 | 0x80, 0x03];
        assert!(validate_frame_checksum(&frame));

        let mut bad = frame;
        bad[2] = 0x21;
        assert!(!validate_frame_checksum(&bad));
    }

    #[test]
    fn test_validate_frame_checksum_too_short() {
        assert!(!validate_frame_checksum(&[0x02, 0x03]));
        assert!(!validate_frame_checksum(&[]));
    }
}
