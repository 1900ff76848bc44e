//! UDP probing: datagrams aimed at a port nobody should listen on, so the
//! destination answers with Port Unreachable (rewritten upstream into an
//! Echo Reply) while intermediate routers answer with Time Exceeded.

use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::Packet;

use crate::checksum;
use crate::packet::{
    self, ipv4, ipv4::IpOption, udp, ICMP_HEADER_LENGTH, MINIMUM_IP_HEADER_LENGTH,
    MINIMUM_UDP_HEADER_LENGTH, RANDOM_DATA_LENGTH,
};
use crate::probe::{icmp::reply_skeleton, ProbeParams, ReplyData};
use crate::record::ProbeOutcome;

/// Builds the complete IPv4 datagram of a UDP probe.
pub(crate) fn build_datagram(
    params: &ProbeParams,
    random_data: &[u8; RANDOM_DATA_LENGTH],
    attention: &[u8],
) -> Vec<u8> {
    let segment_length = udp::segment_length(attention);
    let mut datagram = vec![0u8; MINIMUM_IP_HEADER_LENGTH + segment_length];
    ipv4::build_header(
        &mut datagram,
        params.source,
        params.destination,
        params.ip_identifier,
        params.ttl,
        crate::protocol::ProbeMethod::UdpWrapped.ip_protocol(),
        segment_length,
        IpOption::None,
    );
    udp::build_segment(
        &mut datagram[MINIMUM_IP_HEADER_LENGTH..],
        params.source,
        params.destination,
        params.src_port_icmp_id,
        params.dst_port_icmp_seq,
        random_data,
        attention,
    );
    datagram
}

/// Replies to a UDP probe are always ICMP errors: a Time Exceeded or
/// Destination Unreachable whose quoted packet carries our IP identifier
/// and port pair.
pub(crate) fn recognize(params: &ProbeParams, reply: &Ipv4Packet<'_>) -> Option<ReplyData> {
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

/// Matches the quoted original packet of an ICMP error: protocol UDP, our
/// IP identifier, our source and destination ports. Only the first eight
/// bytes of the quoted transport header are guaranteed to be present.
fn quoted_segment_matches(params: &ProbeParams, quoted: &[u8]) -> bool {
    if quoted.len() < MINIMUM_IP_HEADER_LENGTH {
        return false;
    }
    let quoted_ip = match Ipv4Packet::new(quoted) {
        Some(ip) => ip,
        None => return false,
    };
    if quoted_ip.get_next_level_protocol().0
        != crate::protocol::ProbeMethod::UdpWrapped.ip_protocol()
        || quoted_ip.get_identification() != params.ip_identifier
    {
        return false;
    }
    let header_length = quoted_ip.get_header_length() as usize * 4;
    if header_length < MINIMUM_IP_HEADER_LENGTH
        || quoted.len() < header_length + MINIMUM_UDP_HEADER_LENGTH
    {
        return false;
    }
    let segment = &quoted[header_length..];
    u16::from_be_bytes([segment[0], segment[1]]) == params.src_port_icmp_id
        && u16::from_be_bytes([segment[2], segment[3]]) == params.dst_port_icmp_seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ipv4::build_header;
    use std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
    const RANDOM: [u8; 8] = [1, 1, 2, 3, 5, 8, 13, 21];

    fn params() -> ProbeParams {
        ProbeParams {
            source: SRC,
            destination: DST,
            ip_identifier: 0x2f2f,
            ttl: 4,
            src_port_icmp_id: 30001,
            dst_port_icmp_seq: 47000,
            record_route: false,
            timestamp_request: false,
            tcp_sequence: 0,
            originate_ts: 0,
            sent_payload_length: 13,
        }
    }

    fn icmp_error(error_type: u8, error_code: u8, quoted: &[u8]) -> Vec<u8> {
        let icmp_length = ICMP_HEADER_LENGTH + quoted.len();
        let mut datagram = vec![0u8; 20 + icmp_length];
        build_header(
            &mut datagram,
            ROUTER,
            SRC,
            77,
            61,
            1,
            icmp_length,
            IpOption::None,
        );
        let icmp = &mut datagram[20..];
        icmp[0] = error_type;
        icmp[1] = error_code;
        icmp[ICMP_HEADER_LENGTH..].copy_from_slice(quoted);
        let sum = checksum::internet_checksum(icmp);
        icmp[2..4].copy_from_slice(&sum.to_be_bytes());
        datagram
    }

    #[test]
    fn time_exceeded_quoting_our_datagram_matches() {
        let p = params();
        let request = build_datagram(&p, &RANDOM, b"probe");
        let wire = icmp_error(packet::ICMP_TYPE_TIME_EXCEEDED, 0, &request);
        let reply = ipv4::validate(&wire).unwrap();
        let data = recognize(&p, &reply).unwrap();
        assert_eq!(data.reply_address, ROUTER);
        assert_eq!(data.outcome, ProbeOutcome::IntermediateHop);
    }

    #[test]
    fn port_unreachable_matches_as_unreachable() {
        let p = params();
        let request = build_datagram(&p, &RANDOM, b"probe");
        let wire = icmp_error(
            packet::ICMP_TYPE_DESTINATION_UNREACHABLE,
            packet::ICMP_CODE_PORT_UNREACHABLE,
            &request,
        );
        let reply = ipv4::validate(&wire).unwrap();
        let data = recognize(&p, &reply).unwrap();
        // The Echo Reply rewrite happens upstream; recognition reports the
        // wire values.
        assert_eq!(data.reply_icmp_type, packet::ICMP_TYPE_DESTINATION_UNREACHABLE);
        assert_eq!(data.outcome, ProbeOutcome::Unreachable);
    }

    #[test]
    fn error_quoting_foreign_ports_is_ignored() {
        let p = params();
        let mut other = params();
        other.dst_port_icmp_seq = 48000;
        let request = build_datagram(&other, &RANDOM, b"probe");
        let wire = icmp_error(packet::ICMP_TYPE_TIME_EXCEEDED, 0, &request);
        let reply = ipv4::validate(&wire).unwrap();
        assert!(recognize(&p, &reply).is_none());
    }

    #[test]
    fn truncated_quote_is_ignored() {
        let p = params();
        let request = build_datagram(&p, &RANDOM, b"probe");
        // Quote cut short of the UDP header.
        let wire = icmp_error(packet::ICMP_TYPE_TIME_EXCEEDED, 0, &request[..22]);
        let reply = ipv4::validate(&wire).unwrap();
        assert!(recognize(&p, &reply).is_none());
    }
}
