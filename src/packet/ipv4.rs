use std::net::Ipv4Addr;

use pnet_packet::ip::IpNextHeaderProtocol;
use pnet_packet::ipv4::{Ipv4Packet, MutableIpv4Packet};

use crate::checksum;
use crate::packet::MINIMUM_IP_HEADER_LENGTH;

pub(crate) const OPTION_RECORD_ROUTE: u8 = 7;
pub(crate) const OPTION_LOOSE_SOURCE_ROUTE: u8 = 131;

/// Fixed capacity of the record-route option; also the ceiling on loose
/// source route entries. Nine 4-byte slots plus the 3-byte option header
/// fill the 40-byte IPv4 options area.
pub(crate) const RECORD_ROUTE_SLOTS: usize = 9;

/// IP option requested for an outgoing probe. Record route and loose
/// source routing are mutually exclusive (rejected upstream).
#[derive(Debug, Clone, Copy)]
pub(crate) enum IpOption<'a> {
    None,
    RecordRoute,
    /// Intermediate hops; the first entry becomes the IP destination and
    /// the probe's final destination is written as the last list entry.
    LooseSourceRoute(&'a [Ipv4Addr]),
}

impl IpOption<'_> {
    /// Unpadded option length in bytes (type, length, pointer, addresses).
    fn length(&self) -> usize {
        match self {
            IpOption::None => 0,
            IpOption::RecordRoute => 3 + 4 * RECORD_ROUTE_SLOTS,
            IpOption::LooseSourceRoute(hops) => 3 + 4 * hops.len(),
        }
    }

    /// Header length in bytes with the option padded to a 4-byte boundary.
    pub(crate) fn header_length(&self) -> usize {
        let raw = MINIMUM_IP_HEADER_LENGTH + self.length();
        (raw + 3) & !3
    }
}

/// Encodes the IPv4 header (and options) of an outgoing probe into the
/// front of `buf` and installs the header checksum. `payload_length` is the
/// transport segment length; the destination written into the header is
/// `destination`, except under loose source routing where the first hop
/// takes its place. Returns the header length in bytes.
pub(crate) fn build_header(
    buf: &mut [u8],
    source: Ipv4Addr,
    destination: Ipv4Addr,
    identifier: u16,
    ttl: u8,
    protocol: u8,
    payload_length: usize,
    option: IpOption<'_>,
) -> usize {
    let header_length = option.header_length();
    let total_length = header_length + payload_length;

    let mut ip = MutableIpv4Packet::new(&mut buf[..header_length])
        .expect("ip header buffer sized by caller");
    ip.set_version(4);
    ip.set_header_length((header_length / 4) as u8);
    ip.set_dscp(0);
    ip.set_ecn(0);
    ip.set_total_length(total_length as u16);
    ip.set_identification(identifier);
    ip.set_flags(0);
    ip.set_fragment_offset(0);
    ip.set_ttl(ttl);
    ip.set_next_level_protocol(IpNextHeaderProtocol::new(protocol));
    ip.set_source(source);
    ip.set_checksum(0);

    match option {
        IpOption::None => {
            ip.set_destination(destination);
        }
        IpOption::RecordRoute => {
            ip.set_destination(destination);
            let options = ip.get_options_raw_mut();
            options[0] = OPTION_RECORD_ROUTE;
            options[1] = option.length() as u8;
            options[2] = 4; // pointer to the first free slot, 1-based
            for slot in options[3..].iter_mut() {
                *slot = 0;
            }
        }
        IpOption::LooseSourceRoute(hops) => {
            ip.set_destination(hops[0]);
            let options = ip.get_options_raw_mut();
            options[0] = OPTION_LOOSE_SOURCE_ROUTE;
            options[1] = option.length() as u8;
            options[2] = 4;
            let mut at = 3;
            for hop in &hops[1..] {
                options[at..at + 4].copy_from_slice(&hop.octets());
                at += 4;
            }
            options[at..at + 4].copy_from_slice(&destination.octets());
            at += 4;
            for pad in options[at..].iter_mut() {
                *pad = 0;
            }
        }
    }

    let header_checksum = checksum::internet_checksum(&buf[..header_length]);
    MutableIpv4Packet::new(&mut buf[..header_length])
        .expect("ip header buffer sized by caller")
        .set_checksum(header_checksum);
    header_length
}

/// Validates an incoming raw packet: IPv4 version, minimum and declared
/// lengths, intact header checksum. Returns a view clipped to the declared
/// total length, or `None` for anything that should be silently discarded.
pub(crate) fn validate(buf: &[u8]) -> Option<Ipv4Packet<'_>> {
    if buf.len() < MINIMUM_IP_HEADER_LENGTH {
        return None;
    }
    let probe_view = Ipv4Packet::new(buf)?;
    if probe_view.get_version() != 4 {
        return None;
    }
    let header_length = probe_view.get_header_length() as usize * 4;
    let total_length = probe_view.get_total_length() as usize;
    if header_length < MINIMUM_IP_HEADER_LENGTH
        || total_length < header_length
        || buf.len() < total_length
    {
        return None;
    }
    if !checksum::verifies(&buf[..header_length]) {
        return None;
    }
    Ipv4Packet::new(&buf[..total_length])
}

/// Pulls the addresses recorded so far out of a record-route option in the
/// quoted original packet of an ICMP error. `header` is the raw quoted IPv4
/// header including options.
pub(crate) fn extract_record_route(header: &[u8]) -> Vec<Ipv4Addr> {
    if header.len() <= MINIMUM_IP_HEADER_LENGTH {
        return Vec::new();
    }
    let options = &header[MINIMUM_IP_HEADER_LENGTH..];
    if options.len() < 3 || options[0] != OPTION_RECORD_ROUTE {
        return Vec::new();
    }
    // The pointer field is the 1-based offset of the first free slot; it
    // starts at 4 and advances by 4 per recorded address.
    let pointer = options[2] as usize;
    let recorded = pointer.saturating_sub(4) / 4;
    let mut route = Vec::new();
    for i in 0..recorded.min(RECORD_ROUTE_SLOTS) {
        let at = 3 + 4 * i;
        if at + 4 > options.len() {
            break;
        }
        route.push(Ipv4Addr::new(
            options[at],
            options[at + 1],
            options[at + 2],
            options[at + 3],
        ));
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 55);

    #[test]
    fn plain_header_layout() {
        let mut buf = vec![0u8; 64];
        let len = build_header(&mut buf, SRC, DST, 0x1234, 7, 1, 16, IpOption::None);
        assert_eq!(len, 20);
        let ip = Ipv4Packet::new(&buf).unwrap();
        assert_eq!(ip.get_version(), 4);
        assert_eq!(ip.get_header_length(), 5);
        assert_eq!(ip.get_total_length(), 36);
        assert_eq!(ip.get_identification(), 0x1234);
        assert_eq!(ip.get_ttl(), 7);
        assert_eq!(ip.get_source(), SRC);
        assert_eq!(ip.get_destination(), DST);
        assert!(checksum::verifies(&buf[..20]));
    }

    #[test]
    fn record_route_header_layout() {
        let mut buf = vec![0u8; 128];
        let len = build_header(&mut buf, SRC, DST, 1, 3, 17, 0, IpOption::RecordRoute);
        // 20 + (3 + 36) padded to 60.
        assert_eq!(len, 60);
        assert_eq!(buf[20], OPTION_RECORD_ROUTE);
        assert_eq!(buf[21], 39);
        assert_eq!(buf[22], 4);
        assert!(buf[23..60].iter().all(|&b| b == 0));
        assert!(checksum::verifies(&buf[..60]));
    }

    #[test]
    fn loose_source_route_writes_destination_last() {
        let hops = [Ipv4Addr::new(10, 1, 1, 1), Ipv4Addr::new(10, 2, 2, 2)];
        let mut buf = vec![0u8; 128];
        let len = build_header(
            &mut buf,
            SRC,
            DST,
            1,
            3,
            17,
            0,
            IpOption::LooseSourceRoute(&hops),
        );
        // 20 + (3 + 8) padded to 32.
        assert_eq!(len, 32);
        let ip = Ipv4Packet::new(&buf).unwrap();
        // First hop takes the IP destination slot.
        assert_eq!(ip.get_destination(), hops[0]);
        assert_eq!(buf[20], OPTION_LOOSE_SOURCE_ROUTE);
        assert_eq!(buf[21], 11);
        assert_eq!(buf[22], 4);
        assert_eq!(&buf[23..27], &hops[1].octets());
        assert_eq!(&buf[27..31], &DST.octets());
        assert_eq!(buf[31], 0);
    }

    #[test]
    fn validate_rejects_malformed_input() {
        // Too short for any IP header.
        assert!(validate(&[0x45, 0x00, 0x00]).is_none());

        let mut buf = vec![0u8; 64];
        build_header(&mut buf, SRC, DST, 9, 4, 1, 8, IpOption::None);
        assert!(validate(&buf).is_some());

        // Wrong version.
        let mut bad = buf.clone();
        bad[0] = (6 << 4) | 5;
        assert!(validate(&bad).is_none());

        // Corrupted checksum.
        let mut bad = buf.clone();
        bad[10] ^= 0xff;
        assert!(validate(&bad).is_none());

        // Declared length longer than what arrived.
        let truncated = &buf[..24];
        assert!(validate(truncated).is_none());
    }

    #[test]
    fn extracts_recorded_addresses_in_order() {
        let mut header = vec![0u8; 60];
        header[0] = (4 << 4) | 15;
        header[20] = OPTION_RECORD_ROUTE;
        header[21] = 39;
        header[22] = 4 + 8; // two recorded addresses
        header[23..27].copy_from_slice(&[10, 0, 0, 1]);
        header[27..31].copy_from_slice(&[10, 0, 0, 2]);
        let route = extract_record_route(&header);
        assert_eq!(
            route,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
    }

    #[test]
    fn record_route_absent_or_foreign_option() {
        assert!(extract_record_route(&[0u8; 20]).is_empty());
        let mut header = vec![0u8; 24];
        header[20] = 0x44; // a timestamp option, not record route
        assert!(extract_record_route(&header).is_empty());
    }
}
