//! ICMP probing: Echo Request (or Timestamp Request) datagrams and the
//! recognition of their replies.

use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::Packet;

use crate::checksum;
use crate::packet::{
    self, icmpv4, ipv4, ipv4::IpOption, ICMP_HEADER_LENGTH, MINIMUM_IP_HEADER_LENGTH,
    RANDOM_DATA_LENGTH,
};
use crate::probe::{ProbeParams, ReplyData};
use crate::record::ProbeOutcome;

/// Builds the complete IPv4 datagram of an ICMP probe. The ICMP
/// identifier and sequence come from the params' identifier pair.
pub(crate) fn build_datagram(
    params: &ProbeParams,
    random_data: &[u8; RANDOM_DATA_LENGTH],
    attention: &[u8],
    option: IpOption<'_>,
    fixed_checksum: Option<u16>,
) -> Vec<u8> {
    let icmp_length = if params.timestamp_request {
        icmpv4::timestamp_length()
    } else {
        icmpv4::echo_length(attention)
    };
    let header_length = option.header_length();
    let mut datagram = vec![0u8; header_length + icmp_length];

    ipv4::build_header(
        &mut datagram,
        params.source,
        params.destination,
        params.ip_identifier,
        params.ttl,
        crate::protocol::ProbeMethod::Icmp.ip_protocol(),
        icmp_length,
        option,
    );
    let icmp_region = &mut datagram[header_length..];
    if params.timestamp_request {
        icmpv4::build_timestamp(
            icmp_region,
            params.src_port_icmp_id,
            params.dst_port_icmp_seq,
            params.originate_ts,
        );
    } else {
        icmpv4::build_echo(
            icmp_region,
            params.src_port_icmp_id,
            params.dst_port_icmp_seq,
            random_data,
            attention,
            fixed_checksum,
        );
    }
    datagram
}

/// Decides whether a validated incoming packet answers the probe in
/// flight, and if so extracts the reply fields.
///
/// Three shapes are accepted: a Time Exceeded or Destination Unreachable
/// quoting our request (matched on the quoted IP identifier plus ICMP
/// identifier and sequence), an Echo Reply, or a Timestamp Reply (both
/// matched on identifier and sequence).
pub(crate) fn recognize(params: &ProbeParams, reply: &Ipv4Packet<'_>) -> Option<ReplyData> {
    if reply.get_next_level_protocol().0 != crate::protocol::ProbeMethod::Icmp.ip_protocol() {
        return None;
    }
    let icmp = reply.payload();
    if icmp.len() < ICMP_HEADER_LENGTH || !checksum::verifies(icmp) {
        return None;
    }

    let icmp_type = icmp[0];
    let icmp_code = icmp[1];
    let mut data = reply_skeleton(reply, icmp_type, icmp_code);

    match icmp_type {
        packet::ICMP_TYPE_TIME_EXCEEDED | packet::ICMP_TYPE_DESTINATION_UNREACHABLE => {
            let quoted = quoted_request(params, &icmp[ICMP_HEADER_LENGTH..])?;
            data.payload_ttl = quoted.ttl;
            if params.record_route {
                data.record_route = quoted.record_route;
            }
            data.outcome = if icmp_type == packet::ICMP_TYPE_TIME_EXCEEDED {
                ProbeOutcome::IntermediateHop
            } else {
                ProbeOutcome::Unreachable
            };
            Some(data)
        }
        packet::ICMP_TYPE_ECHO_REPLY if !params.timestamp_request => {
            if !echo_identifiers_match(params, icmp) {
                return None;
            }
            data.outcome = ProbeOutcome::DestinationAnswered;
            Some(data)
        }
        packet::ICMP_TYPE_TS_REPLY if params.timestamp_request => {
            if !echo_identifiers_match(params, icmp) {
                return None;
            }
            let (receive_ts, transmit_ts) = icmpv4::parse_timestamp_reply(icmp)?;
            data.receive_ts = receive_ts;
            data.transmit_ts = transmit_ts;
            data.outcome = ProbeOutcome::DestinationAnswered;
            Some(data)
        }
        _ => None,
    }
}

/// Fields common to every recognized reply shape.
pub(super) fn reply_skeleton(reply: &Ipv4Packet<'_>, icmp_type: u8, icmp_code: u8) -> ReplyData {
    let header_length = reply.get_header_length() as u16 * 4;
    ReplyData {
        reply_address: reply.get_source(),
        reply_ttl: reply.get_ttl(),
        reply_icmp_type: icmp_type,
        reply_icmp_code: icmp_code,
        reply_ip_identifier: reply.get_identification(),
        payload_ttl: 0,
        payload_length: reply.get_total_length().saturating_sub(header_length),
        receive_ts: 0,
        transmit_ts: 0,
        record_route: Vec::new(),
        outcome: ProbeOutcome::Anonymous,
    }
}

struct QuotedRequest {
    ttl: u8,
    record_route: Vec<std::net::Ipv4Addr>,
}

/// Matches the original packet quoted inside an ICMP error against the
/// probe in flight: same IP identifier, same ICMP identifier and
/// sequence, and the request type we actually sent.
fn quoted_request(params: &ProbeParams, quoted: &[u8]) -> Option<QuotedRequest> {
    if quoted.len() < MINIMUM_IP_HEADER_LENGTH {
        return None;
    }
    let quoted_ip = Ipv4Packet::new(quoted)?;
    if quoted_ip.get_next_level_protocol().0
        != crate::protocol::ProbeMethod::Icmp.ip_protocol()
        || quoted_ip.get_identification() != params.ip_identifier
    {
        return None;
    }
    let header_length = quoted_ip.get_header_length() as usize * 4;
    if header_length < MINIMUM_IP_HEADER_LENGTH
        || quoted.len() < header_length + ICMP_HEADER_LENGTH
    {
        return None;
    }
    let quoted_icmp = &quoted[header_length..];
    let expected_type = if params.timestamp_request {
        packet::ICMP_TYPE_TS_REQUEST
    } else {
        packet::ICMP_TYPE_ECHO_REQUEST
    };
    if quoted_icmp[0] != expected_type || !echo_identifiers_match(params, quoted_icmp) {
        return None;
    }
    Some(QuotedRequest {
        ttl: quoted_ip.get_ttl(),
        record_route: ipv4::extract_record_route(&quoted[..header_length]),
    })
}

fn echo_identifiers_match(params: &ProbeParams, icmp: &[u8]) -> bool {
    if icmp.len() < ICMP_HEADER_LENGTH {
        return false;
    }
    u16::from_be_bytes([icmp[4], icmp[5]]) == params.src_port_icmp_id
        && u16::from_be_bytes([icmp[6], icmp[7]]) == params.dst_port_icmp_seq
}
