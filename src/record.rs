use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};

use crate::packet;

/// Classified outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The destination itself answered: ICMP Echo/Timestamp Reply, a TCP
    /// reset, or a Port Unreachable elicited by a wrapped probe.
    DestinationAnswered,
    /// An intermediate router answered with Time Exceeded.
    IntermediateHop,
    /// A router answered with Destination Unreachable (other than the
    /// rewritten Port Unreachable of the wrapped methods).
    Unreachable,
    /// No usable reply before the timeout.
    Anonymous,
}

/// Full outcome of one probe call. Built by the receive loop and not
/// modified afterwards; the numeric ICMP fields preserve the wire values,
/// including the pseudo TCP reset pair (101/101) and the Echo-Reply
/// rewrite applied by the wrapped methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub request_time: SystemTime,
    pub reply_time: SystemTime,
    pub destination_address: Ipv4Addr,
    /// Replying router or host; `Ipv4Addr::UNSPECIFIED` when no reply came.
    pub reply_address: Ipv4Addr,
    pub requested_ttl: u8,
    pub reply_ttl: u8,
    /// TTL of the quoted original packet inside an ICMP error, when present.
    pub payload_ttl: u8,
    pub reply_icmp_type: u8,
    pub reply_icmp_code: u8,
    pub source_ip_identifier: u16,
    pub reply_ip_identifier: u16,
    /// Transport payload length of the reply packet.
    pub payload_length: u16,
    /// ICMP timestamp fields, milliseconds since UTC midnight. Zero unless
    /// timestamp probing was used and a Timestamp Reply was received.
    pub originate_ts: u32,
    pub receive_ts: u32,
    pub transmit_ts: u32,
    /// Packets consumed to obtain this record (1, or 2 for a double probe).
    pub probing_cost: u8,
    /// Echo of the request's fixed-flow policy.
    pub fixed_flow_id: bool,
    /// Addresses extracted from the record-route option, in order. Empty
    /// when the option was absent or not requested.
    pub record_route: Vec<Ipv4Addr>,
    pub outcome: ProbeOutcome,
}

impl ProbeRecord {
    /// Record for a probe that got no reply before the timeout.
    pub(crate) fn anonymous(
        request_time: SystemTime,
        destination_address: Ipv4Addr,
        requested_ttl: u8,
        source_ip_identifier: u16,
        fixed_flow_id: bool,
    ) -> Self {
        ProbeRecord {
            request_time,
            reply_time: SystemTime::now(),
            destination_address,
            reply_address: Ipv4Addr::UNSPECIFIED,
            requested_ttl,
            reply_ttl: 0,
            payload_ttl: 0,
            reply_icmp_type: packet::ANONYMOUS_ICMP_TYPE,
            reply_icmp_code: packet::ANONYMOUS_ICMP_CODE,
            source_ip_identifier,
            reply_ip_identifier: 0,
            payload_length: 0,
            originate_ts: 0,
            receive_ts: 0,
            transmit_ts: 0,
            probing_cost: 1,
            fixed_flow_id,
            record_route: Vec::new(),
            outcome: ProbeOutcome::Anonymous,
        }
    }

    /// True when the probe timed out without a usable reply.
    pub fn is_anonymous(&self) -> bool {
        self.reply_address.is_unspecified() && self.reply_icmp_type == packet::ANONYMOUS_ICMP_TYPE
    }

    /// Round-trip time, zero for anonymous records.
    pub fn rtt(&self) -> Duration {
        self.reply_time
            .duration_since(self.request_time)
            .unwrap_or_default()
    }
}
