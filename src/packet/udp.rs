use std::net::Ipv4Addr;

use pnet_packet::udp::MutableUdpPacket;
use pnet_packet::MutablePacket;

use crate::checksum;
use crate::packet::{MINIMUM_UDP_HEADER_LENGTH, RANDOM_DATA_LENGTH};

/// Length of the UDP segment of a probe.
pub(crate) fn segment_length(attention: &[u8]) -> usize {
    MINIMUM_UDP_HEADER_LENGTH + RANDOM_DATA_LENGTH + attention.len()
}

/// Encodes a UDP probe datagram into `buf` (sized by [`segment_length`]).
/// The checksum covers the IPv4 pseudo-header.
pub(crate) fn build_segment(
    buf: &mut [u8],
    source: Ipv4Addr,
    destination: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    random_data: &[u8; RANDOM_DATA_LENGTH],
    attention: &[u8],
) {
    let length = buf.len() as u16;
    let mut udp = MutableUdpPacket::new(buf).expect("udp buffer sized by caller");
    udp.set_source(source_port);
    udp.set_destination(destination_port);
    udp.set_length(length);
    udp.set_checksum(0);
    let payload = udp.payload_mut();
    payload[..RANDOM_DATA_LENGTH].copy_from_slice(random_data);
    payload[RANDOM_DATA_LENGTH..].copy_from_slice(attention);

    let udp_checksum = checksum::pseudo_header_checksum(source, destination, 17, buf);
    MutableUdpPacket::new(buf)
        .expect("udp buffer sized by caller")
        .set_checksum(udp_checksum);
}
