//! TCP probing: SYN+ACK segments aimed at a closed port. The destination
//! host answers with a reset, which arrives on the bound receive socket
//! and is recorded under the pseudo reset type/code; intermediate routers
//! answer with ICMP Time Exceeded as usual.

use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::Packet;

use crate::checksum;
use crate::packet::{
    self, ipv4, ipv4::IpOption, tcp, ICMP_HEADER_LENGTH, MINIMUM_IP_HEADER_LENGTH,
    MINIMUM_TCP_HEADER_LENGTH, RANDOM_DATA_LENGTH,
};
use crate::probe::{icmp::reply_skeleton, ProbeParams, ReplyData};
use crate::record::ProbeOutcome;

/// Builds the complete IPv4 datagram of a TCP probe. The sequence number
/// comes from the params (recognition derives the expected reset
/// acknowledgment from it); the acknowledgment number is a throwaway
/// random.
pub(crate) fn build_datagram(
    params: &ProbeParams,
    random_data: &[u8; RANDOM_DATA_LENGTH],
    attention: &[u8],
    acknowledgement: u32,
) -> Vec<u8> {
    let segment_length = tcp::segment_length(attention);
    let mut datagram = vec![0u8; MINIMUM_IP_HEADER_LENGTH + segment_length];
    ipv4::build_header(
        &mut datagram,
        params.source,
        params.destination,
        params.ip_identifier,
        params.ttl,
        crate::protocol::ProbeMethod::TcpWrapped.ip_protocol(),
        segment_length,
        IpOption::None,
    );
    tcp::build_segment(
        &mut datagram[MINIMUM_IP_HEADER_LENGTH..],
        params.source,
        params.destination,
        params.src_port_icmp_id,
        params.dst_port_icmp_seq,
        params.tcp_sequence,
        acknowledgement,
        random_data,
        attention,
    );
    datagram
}

/// Recognizes a reply to a TCP probe.
///
/// Replies arrive in two shapes. ICMP errors (on the ICMP socket) quote
/// our segment and are matched on the quoted IP identifier, source port
/// and either destination port or sequence number. Direct TCP replies (on
/// the pool socket) are matched on our port pair, or on an acknowledgment
/// that covers the whole segment we sent; they are recorded as a pseudo
/// reset.
pub(crate) fn recognize(
    params: &ProbeParams,
    reply: &Ipv4Packet<'_>,
    from_pool: bool,
) -> Option<ReplyData> {
    if from_pool {
        recognize_direct(params, reply)
    } else {
        recognize_icmp_error(params, reply)
    }
}

fn recognize_icmp_error(params: &ProbeParams, reply: &Ipv4Packet<'_>) -> Option<ReplyData> {
    if reply.get_next_level_protocol().0 != crate::protocol::ProbeMethod::Icmp.ip_protocol() {
        return None;
    }
    let icmp = reply.payload();
    if icmp.len() < ICMP_HEADER_LENGTH || !checksum::verifies(icmp) {
        return None;
    }
    let icmp_type = icmp[0];
    if icmp_type != packet::ICMP_TYPE_TIME_EXCEEDED
        && icmp_type != packet::ICMP_TYPE_DESTINATION_UNREACHABLE
    {
        return None;
    }
    if !quoted_segment_matches(params, &icmp[ICMP_HEADER_LENGTH..]) {
        return None;
    }
    let mut data = reply_skeleton(reply, icmp_type, icmp[1]);
    data.outcome = if icmp_type == packet::ICMP_TYPE_TIME_EXCEEDED {
        ProbeOutcome::IntermediateHop
    } else {
        ProbeOutcome::Unreachable
    };
    Some(data)
}

fn recognize_direct(params: &ProbeParams, reply: &Ipv4Packet<'_>) -> Option<ReplyData> {
    if reply.get_next_level_protocol().0
        != crate::protocol::ProbeMethod::TcpWrapped.ip_protocol()
    {
        return None;
    }
    let segment = reply.payload();
    if segment.len() < MINIMUM_TCP_HEADER_LENGTH {
        return None;
    }
    let source_port = u16::from_be_bytes([segment[0], segment[1]]);
    let destination_port = u16::from_be_bytes([segment[2], segment[3]]);
    if destination_port != params.src_port_icmp_id {
        return None;
    }
    let acknowledgement =
        u32::from_be_bytes([segment[8], segment[9], segment[10], segment[11]]);
    let expected_acknowledgement = params
        .tcp_sequence
        .wrapping_add(1)
        .wrapping_add(u32::from(params.sent_payload_length));
    if source_port != params.dst_port_icmp_seq && acknowledgement != expected_acknowledgement {
        return None;
    }

    let mut data = reply_skeleton(
        reply,
        packet::PSEUDO_TCP_RESET_ICMP_TYPE,
        packet::PSEUDO_TCP_RESET_ICMP_CODE,
    );
    data.outcome = ProbeOutcome::DestinationAnswered;
    Some(data)
}

/// Matches the quoted original segment of an ICMP error. The quote only
/// guarantees eight transport bytes: source port, destination port and
/// sequence number.
fn quoted_segment_matches(params: &ProbeParams, quoted: &[u8]) -> bool {
    if quoted.len() < MINIMUM_IP_HEADER_LENGTH {
        return false;
    }
    let quoted_ip = match Ipv4Packet::new(quoted) {
        Some(ip) => ip,
        None => return false,
    };
    if quoted_ip.get_next_level_protocol().0
        != crate::protocol::ProbeMethod::TcpWrapped.ip_protocol()
        || quoted_ip.get_identification() != params.ip_identifier
    {
        return false;
    }
    let header_length = quoted_ip.get_header_length() as usize * 4;
    if header_length < MINIMUM_IP_HEADER_LENGTH || quoted.len() < header_length + 8 {
        return false;
    }
    let segment = &quoted[header_length..];
    let source_port = u16::from_be_bytes([segment[0], segment[1]]);
    let destination_port = u16::from_be_bytes([segment[2], segment[3]]);
    let sequence = u32::from_be_bytes([segment[4], segment[5], segment[6], segment[7]]);
    source_port == params.src_port_icmp_id
        && (destination_port == params.dst_port_icmp_seq || sequence == params.tcp_sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ipv4::build_header;
    use pnet_packet::tcp::{MutableTcpPacket, TcpFlags};
    use std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
    const RANDOM: [u8; 8] = [2, 4, 6, 8, 10, 12, 14, 16];

    fn params() -> ProbeParams {
        ProbeParams {
            source: SRC,
            destination: DST,
            ip_identifier: 0x7a7a,
            ttl: 6,
            src_port_icmp_id: 30002,
            dst_port_icmp_seq: 47000,
            record_route: false,
            timestamp_request: false,
            tcp_sequence: 0xCAFE_BABE,
            originate_ts: 0,
            sent_payload_length: 13,
        }
    }

    fn icmp_error(error_type: u8, quoted: &[u8]) -> Vec<u8> {
        let icmp_length = ICMP_HEADER_LENGTH + quoted.len();
        let mut datagram = vec![0u8; 20 + icmp_length];
        build_header(
            &mut datagram,
            ROUTER,
            SRC,
            88,
            62,
            1,
            icmp_length,
            IpOption::None,
        );
        let icmp = &mut datagram[20..];
        icmp[0] = error_type;
        icmp[ICMP_HEADER_LENGTH..].copy_from_slice(quoted);
        let sum = checksum::internet_checksum(icmp);
        icmp[2..4].copy_from_slice(&sum.to_be_bytes());
        datagram
    }

    /// A raw reset segment from the destination host, port pair flipped.
    fn reset_reply(source_port: u16, destination_port: u16, acknowledgement: u32) -> Vec<u8> {
        let mut datagram = vec![0u8; 20 + MINIMUM_TCP_HEADER_LENGTH];
        build_header(
            &mut datagram,
            DST,
            SRC,
            5,
            59,
            6,
            MINIMUM_TCP_HEADER_LENGTH,
            IpOption::None,
        );
        let mut segment = MutableTcpPacket::new(&mut datagram[20..]).unwrap();
        segment.set_source(source_port);
        segment.set_destination(destination_port);
        segment.set_acknowledgement(acknowledgement);
        segment.set_data_offset(5);
        segment.set_flags(TcpFlags::RST);
        datagram
    }

    #[test]
    fn direct_reset_with_flipped_ports_is_a_pseudo_reset() {
        let p = params();
        let wire = reset_reply(p.dst_port_icmp_seq, p.src_port_icmp_id, 0);
        let reply = ipv4::validate(&wire).unwrap();
        let data = recognize(&p, &reply, true).unwrap();
        assert_eq!(data.reply_icmp_type, packet::PSEUDO_TCP_RESET_ICMP_TYPE);
        assert_eq!(data.reply_icmp_code, packet::PSEUDO_TCP_RESET_ICMP_CODE);
        assert_eq!(data.outcome, ProbeOutcome::DestinationAnswered);
    }

    #[test]
    fn direct_reset_matched_by_acknowledgment_alone() {
        let p = params();
        // Source port rewritten by middleboxes, but the acknowledgment
        // still covers our whole segment.
        let ack = p.tcp_sequence + 1 + u32::from(p.sent_payload_length);
        let wire = reset_reply(1234, p.src_port_icmp_id, ack);
        let reply = ipv4::validate(&wire).unwrap();
        assert!(recognize(&p, &reply, true).is_some());
    }

    #[test]
    fn unrelated_tcp_traffic_is_ignored() {
        let p = params();
        let wire = reset_reply(1234, p.src_port_icmp_id, 7);
        let reply = ipv4::validate(&wire).unwrap();
        assert!(recognize(&p, &reply, true).is_none());

        // Wrong destination port entirely.
        let wire = reset_reply(p.dst_port_icmp_seq, 9999, 0);
        let reply = ipv4::validate(&wire).unwrap();
        assert!(recognize(&p, &reply, true).is_none());
    }

    #[test]
    fn time_exceeded_quoting_our_segment_matches() {
        let p = params();
        let request = build_datagram(&p, &RANDOM, b"probe", 12345);
        let wire = icmp_error(packet::ICMP_TYPE_TIME_EXCEEDED, &request);
        let reply = ipv4::validate(&wire).unwrap();
        let data = recognize(&p, &reply, false).unwrap();
        assert_eq!(data.reply_address, ROUTER);
        assert_eq!(data.outcome, ProbeOutcome::IntermediateHop);
    }

    #[test]
    fn quoted_match_falls_back_to_sequence_number() {
        let p = params();
        let mut request = build_datagram(&p, &RANDOM, b"probe", 12345);
        // A NAT rewrote the destination port in the quote; the sequence
        // number still identifies the probe.
        request[22..24].copy_from_slice(&51000u16.to_be_bytes());
        let wire = icmp_error(packet::ICMP_TYPE_TIME_EXCEEDED, &request);
        let reply = ipv4::validate(&wire).unwrap();
        assert!(recognize(&p, &reply, false).is_some());
    }

    #[test]
    fn error_quoting_a_foreign_probe_is_ignored() {
        let p = params();
        let mut other = params();
        other.ip_identifier = 1;
        let request = build_datagram(&other, &RANDOM, b"probe", 12345);
        let wire = icmp_error(packet::ICMP_TYPE_TIME_EXCEEDED, &request);
        let reply = ipv4::validate(&wire).unwrap();
        assert!(recognize(&p, &reply, false).is_none());
    }
}
