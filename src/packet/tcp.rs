use std::net::Ipv4Addr;

use pnet_packet::tcp::{MutableTcpPacket, TcpFlags};
use pnet_packet::MutablePacket;

use crate::checksum;
use crate::packet::{MINIMUM_TCP_HEADER_LENGTH, RANDOM_DATA_LENGTH};

/// Window size advertised by probe segments.
const PROBE_WINDOW: u16 = 32767;

/// Length of the TCP segment of a probe.
pub(crate) fn segment_length(attention: &[u8]) -> usize {
    MINIMUM_TCP_HEADER_LENGTH + RANDOM_DATA_LENGTH + attention.len()
}

/// Encodes a TCP SYN+ACK probe segment into `buf` (sized by
/// [`segment_length`]). SYN+ACK to a port nobody listens on draws a reset
/// from the destination host while intermediate routers still emit Time
/// Exceeded for it. Sequence and acknowledgment numbers are caller-chosen
/// randoms; the acknowledgment a genuine reset carries is derived from the
/// sequence number, which recognition exploits.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_segment(
    buf: &mut [u8],
    source: Ipv4Addr,
    destination: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    sequence: u32,
    acknowledgement: u32,
    random_data: &[u8; RANDOM_DATA_LENGTH],
    attention: &[u8],
) {
    let mut tcp = MutableTcpPacket::new(buf).expect("tcp buffer sized by caller");
    tcp.set_source(source_port);
    tcp.set_destination(destination_port);
    tcp.set_sequence(sequence);
    tcp.set_acknowledgement(acknowledgement);
    tcp.set_data_offset((MINIMUM_TCP_HEADER_LENGTH / 4) as u8);
    tcp.set_reserved(0);
    tcp.set_flags(TcpFlags::SYN | TcpFlags::ACK);
    tcp.set_window(PROBE_WINDOW);
    tcp.set_checksum(0);
    tcp.set_urgent_ptr(0);
    let payload = tcp.payload_mut();
    payload[..RANDOM_DATA_LENGTH].copy_from_slice(random_data);
    payload[RANDOM_DATA_LENGTH..].copy_from_slice(attention);

    let tcp_checksum = checksum::pseudo_header_checksum(source, destination, 6, buf);
    MutableTcpPacket::new(buf)
        .expect("tcp buffer sized by caller")
        .set_checksum(tcp_checksum);
}
