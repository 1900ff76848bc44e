//! Ones'-complement Internet checksum utilities.
//!
//! Every packet builder and every reply validator goes through this
//! module. The sum treats the buffer as big-endian 16-bit words; an odd
//! trailing byte is padded with a zero low byte. A buffer whose checksum
//! field already holds a valid checksum sums to `0xFFFF`.

use std::net::Ipv4Addr;

/// Ones'-complement sum of 16-bit words with end-around carry folding.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;
    sum as u16
}

/// Ones'-complement addition of two 16-bit values.
pub fn ones_complement_add(a: u16, b: u16) -> u16 {
    let mut sum = u32::from(a) + u32::from(b);
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;
    sum as u16
}

/// Ones'-complement subtraction: `a - b`.
pub fn ones_complement_sub(a: u16, b: u16) -> u16 {
    ones_complement_add(a, !b)
}

/// Standard Internet checksum: complement of the ones'-complement sum,
/// computed with the checksum field itself set to zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// True when `data`, with its checksum field in place, sums to all-ones.
pub fn verifies(data: &[u8]) -> bool {
    ones_complement_sum(data) == 0xFFFF
}

/// Internet checksum of a TCP/UDP segment prefixed by the IPv4
/// pseudo-header (source, destination, zero byte, protocol byte, segment
/// length). The pseudo-header is never transmitted.
pub fn pseudo_header_checksum(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: u8,
    segment: &[u8],
) -> u16 {
    let length = segment.len() as u16;
    let mut pseudo = Vec::with_capacity(12 + segment.len());
    pseudo.extend_from_slice(&source.octets());
    pseudo.extend_from_slice(&destination.octets());
    pseudo.push(0);
    pseudo.push(protocol);
    pseudo.extend_from_slice(&length.to_be_bytes());
    pseudo.extend_from_slice(segment);
    internet_checksum(&pseudo)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 1071 worked example.
    #[test]
    fn known_vector() {
        let data = [0x00u8, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(ones_complement_sum(&data), 0xddf2);
        assert_eq!(internet_checksum(&data), 0x220d);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        assert_eq!(
            ones_complement_sum(&[0x12, 0x34, 0x56]),
            ones_complement_sum(&[0x12, 0x34, 0x56, 0x00])
        );
    }

    #[test]
    fn round_trip_law() {
        // Computing the checksum with the field zeroed, then inserting it,
        // makes the full-buffer sum all-ones.
        let mut packet = vec![
            0x45, 0x00, 0x00, 0x1c, 0xbe, 0xef, 0x00, 0x00, 0x40, 0x01, 0x00, 0x00, 0x0a, 0x00,
            0x00, 0x01, 0x0a, 0x00, 0x00, 0x02,
        ];
        let checksum = internet_checksum(&packet);
        packet[10..12].copy_from_slice(&checksum.to_be_bytes());
        assert!(verifies(&packet));
        assert_eq!(internet_checksum(&packet), 0);
    }

    #[test]
    fn add_sub_are_inverses() {
        for &(a, b) in &[(0x1234u16, 0x9abcu16), (0xffff, 0x0001), (0, 0xffff)] {
            let sum = ones_complement_add(a, b);
            // In ones'-complement arithmetic 0x0000 and 0xFFFF are the same
            // value, so compare modulo that equivalence.
            let back = ones_complement_sub(sum, b);
            assert!(back == a || (back == 0xffff && a == 0) || (back == 0 && a == 0xffff));
        }
    }

    #[test]
    fn pseudo_header_matches_manual_fold() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let segment = [0x75, 0x30, 0x75, 0x31, 0x00, 0x0a, 0x00, 0x00, 0xde, 0xad];
        let mut manual = Vec::new();
        manual.extend_from_slice(&src.octets());
        manual.extend_from_slice(&dst.octets());
        manual.extend_from_slice(&[0, 17]);
        manual.extend_from_slice(&(segment.len() as u16).to_be_bytes());
        manual.extend_from_slice(&segment);
        assert_eq!(
            pseudo_header_checksum(src, dst, 17, &segment),
            internet_checksum(&manual)
        );
    }
}
