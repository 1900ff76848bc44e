use crate::checksum;
use crate::packet::{
    ICMP_HEADER_LENGTH, ICMP_TS_FIELDS_LENGTH, ICMP_TYPE_ECHO_REQUEST, ICMP_TYPE_TS_REQUEST,
    RANDOM_DATA_LENGTH,
};

/// Length of the ICMP region of an Echo Request probe.
pub(crate) fn echo_length(attention: &[u8]) -> usize {
    ICMP_HEADER_LENGTH + RANDOM_DATA_LENGTH + attention.len()
}

/// Length of the ICMP region of a Timestamp Request probe.
pub(crate) fn timestamp_length() -> usize {
    ICMP_HEADER_LENGTH + ICMP_TS_FIELDS_LENGTH
}

/// Encodes an ICMP Echo Request into `buf` (sized by [`echo_length`]).
///
/// Without a fixed flow ID the payload is 8 random bytes plus the attention
/// message and the checksum is computed normally. With `fixed_checksum`
/// set, the checksum field is pinned to that constant and the last two
/// random bytes are replaced by the ones'-complement difference that makes
/// the pinned value correct, so the checksum no longer varies with the
/// payload and flow-hashing routers see one flow across all TTLs.
pub(crate) fn build_echo(
    buf: &mut [u8],
    identifier: u16,
    sequence: u16,
    random_data: &[u8; RANDOM_DATA_LENGTH],
    attention: &[u8],
    fixed_checksum: Option<u16>,
) {
    buf[0] = ICMP_TYPE_ECHO_REQUEST;
    buf[1] = 0;
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&sequence.to_be_bytes());

    let payload = &mut buf[ICMP_HEADER_LENGTH..];
    payload[..RANDOM_DATA_LENGTH].copy_from_slice(random_data);
    payload[RANDOM_DATA_LENGTH..RANDOM_DATA_LENGTH + attention.len()].copy_from_slice(attention);

    match fixed_checksum {
        Some(target) => {
            buf[2..4].copy_from_slice(&target.to_be_bytes());
            // Zero the compensation slot, sum what remains, then store the
            // ones'-complement difference to all-ones in that slot.
            buf[ICMP_HEADER_LENGTH + RANDOM_DATA_LENGTH - 2..ICMP_HEADER_LENGTH + RANDOM_DATA_LENGTH]
                .copy_from_slice(&[0, 0]);
            let sum = checksum::ones_complement_sum(buf);
            let difference = checksum::ones_complement_sub(0xFFFF, sum);
            buf[ICMP_HEADER_LENGTH + RANDOM_DATA_LENGTH - 2..ICMP_HEADER_LENGTH + RANDOM_DATA_LENGTH]
                .copy_from_slice(&difference.to_be_bytes());
        }
        None => {
            buf[2..4].copy_from_slice(&[0, 0]);
            let icmp_checksum = checksum::internet_checksum(buf);
            buf[2..4].copy_from_slice(&icmp_checksum.to_be_bytes());
        }
    }
}

/// Encodes an ICMP Timestamp Request: originate timestamp is the current
/// time as milliseconds since UTC midnight, receive and transmit are zero.
pub(crate) fn build_timestamp(buf: &mut [u8], identifier: u16, sequence: u16, originate: u32) {
    buf[0] = ICMP_TYPE_TS_REQUEST;
    buf[1] = 0;
    buf[2..4].copy_from_slice(&[0, 0]);
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&sequence.to_be_bytes());
    buf[8..12].copy_from_slice(&originate.to_be_bytes());
    buf[12..20].copy_from_slice(&[0; 8]);
    let icmp_checksum = checksum::internet_checksum(buf);
    buf[2..4].copy_from_slice(&icmp_checksum.to_be_bytes());
}

/// Decodes the receive and transmit timestamps of a Timestamp Reply.
/// `icmp` is the ICMP region; the originate timestamp is ours and is
/// skipped.
pub(crate) fn parse_timestamp_reply(icmp: &[u8]) -> Option<(u32, u32)> {
    if icmp.len() < ICMP_HEADER_LENGTH + ICMP_TS_FIELDS_LENGTH {
        return None;
    }
    let receive = u32::from_be_bytes(icmp[12..16].try_into().ok()?);
    let transmit = u32::from_be_bytes(icmp[16..20].try_into().ok()?);
    Some((receive, transmit))
}
