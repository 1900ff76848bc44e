pub(crate) mod icmpv4;
pub(crate) mod ipv4;
pub(crate) mod tcp;
pub(crate) mod udp;

pub(crate) const MINIMUM_IP_HEADER_LENGTH: usize = 20;
pub(crate) const ICMP_HEADER_LENGTH: usize = 8;
pub(crate) const MINIMUM_UDP_HEADER_LENGTH: usize = 8;
pub(crate) const MINIMUM_TCP_HEADER_LENGTH: usize = 20;

/// Random payload bytes carried by every probe, after the transport header.
pub(crate) const RANDOM_DATA_LENGTH: usize = 8;

/// The three ICMP timestamp fields of a Timestamp Request/Reply.
pub(crate) const ICMP_TS_FIELDS_LENGTH: usize = 12;

pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_DESTINATION_UNREACHABLE: u8 = 3;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
pub const ICMP_TYPE_TIME_EXCEEDED: u8 = 11;
pub const ICMP_TYPE_TS_REQUEST: u8 = 13;
pub const ICMP_TYPE_TS_REPLY: u8 = 14;

pub const ICMP_CODE_PORT_UNREACHABLE: u8 = 3;

/// Reserved type/code pair recorded when a direct TCP reset answered a
/// TCP-wrapped probe. Not a real ICMP value.
pub const PSEUDO_TCP_RESET_ICMP_TYPE: u8 = 101;
pub const PSEUDO_TCP_RESET_ICMP_CODE: u8 = 101;

/// Type/code pair of an anonymous (timed-out) record.
pub const ANONYMOUS_ICMP_TYPE: u8 = 255;
pub const ANONYMOUS_ICMP_CODE: u8 = 255;
