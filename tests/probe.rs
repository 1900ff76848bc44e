//! Integration tests for the prober.
//!
//! Configuration validation runs anywhere. The tests that open raw
//! sockets need CAP_NET_RAW (or root) and are marked #[ignore]; run them
//! with `--ignored` on a privileged host.

use std::net::Ipv4Addr;
use std::time::Duration;

use rawprobe::{ProbeError, ProbeMethod, ProbeOptions, Prober, ProberConfig};

const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;
// TEST-NET-1, guaranteed unrouted.
const BLACKHOLE: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

#[test]
fn inverted_source_range_is_rejected() {
    let mut config = ProberConfig::new(ProbeMethod::Icmp);
    config.src_port_icmp_id_range = (64000, 30000);
    match Prober::new(config) {
        Err(ProbeError::InvalidRange { lower, upper, .. }) => {
            assert_eq!(lower, 64000);
            assert_eq!(upper, 30000);
        }
        Err(other) => panic!("expected InvalidRange, got {other:?}"),
        Ok(_) => panic!("expected InvalidRange, prober was built"),
    }
}

#[test]
fn empty_destination_range_is_rejected() {
    let mut config = ProberConfig::new(ProbeMethod::UdpWrapped);
    config.dst_port_icmp_seq_range = (40000, 40000);
    assert!(matches!(
        Prober::new(config),
        Err(ProbeError::InvalidRange { .. })
    ));
}

#[test]
#[ignore]
fn loopback_echo_is_answered_by_the_destination() {
    let mut prober = Prober::new(ProberConfig::new(ProbeMethod::Icmp)).unwrap();
    let record = prober
        .single_probe(LOOPBACK, LOOPBACK, 64, &ProbeOptions::default())
        .unwrap();
    assert!(!record.is_anonymous());
    assert_eq!(record.reply_address, LOOPBACK);
    assert_eq!(record.reply_icmp_type, rawprobe::packet::ICMP_TYPE_ECHO_REPLY);
    assert_eq!(record.probing_cost, 1);
    assert_eq!(prober.probe_count(), 1);
}

#[test]
#[ignore]
fn unrouted_destination_times_out_into_an_anonymous_record() {
    let mut config = ProberConfig::new(ProbeMethod::Icmp);
    config.timeout = Duration::from_millis(200);
    let mut prober = Prober::new(config).unwrap();
    let record = prober
        .single_probe(local_source(), BLACKHOLE, 1, &ProbeOptions::default())
        .unwrap();
    assert!(record.is_anonymous());
    assert!(record.reply_address.is_unspecified());
    assert_eq!(record.requested_ttl, 1);
}

#[test]
#[ignore]
fn double_probe_of_a_black_hole_costs_two_packets() {
    let mut config = ProberConfig::new(ProbeMethod::Icmp);
    config.timeout = Duration::from_millis(200);
    let mut prober = Prober::new(config).unwrap();
    let record = prober
        .double_probe(local_source(), BLACKHOLE, 1, &ProbeOptions::default())
        .unwrap();
    assert!(record.is_anonymous());
    assert_eq!(record.probing_cost, 2);
    assert_eq!(prober.probe_count(), 2);
}

#[test]
#[ignore]
fn conflicting_ip_options_are_rejected() {
    let mut prober = Prober::new(ProberConfig::new(ProbeMethod::Icmp)).unwrap();
    let options = ProbeOptions {
        record_route: true,
        loose_source_route: vec![Ipv4Addr::new(10, 0, 0, 1)],
        ..ProbeOptions::default()
    };
    assert!(matches!(
        prober.single_probe(LOOPBACK, LOOPBACK, 4, &options),
        Err(ProbeError::ConflictingIpOptions)
    ));
}

#[test]
#[ignore]
fn ip_options_require_the_icmp_method() {
    let mut prober = Prober::new(ProberConfig::new(ProbeMethod::UdpWrapped)).unwrap();
    let options = ProbeOptions {
        record_route: true,
        ..ProbeOptions::default()
    };
    assert!(matches!(
        prober.single_probe(LOOPBACK, LOOPBACK, 4, &options),
        Err(ProbeError::OptionNotSupported(..))
    ));
}

#[test]
#[ignore]
fn timestamp_requests_exclude_fixed_flow_ids() {
    let mut prober = Prober::new(ProberConfig::new(ProbeMethod::Icmp)).unwrap();
    prober.set_timestamp_request(true).unwrap();
    let options = ProbeOptions {
        fixed_flow_id: true,
        ..ProbeOptions::default()
    };
    assert!(matches!(
        prober.single_probe(LOOPBACK, LOOPBACK, 4, &options),
        Err(ProbeError::TimestampWithFixedFlow)
    ));
}

#[test]
#[ignore]
fn high_port_probing_is_udp_only() {
    let mut prober = Prober::new(ProberConfig::new(ProbeMethod::Icmp)).unwrap();
    assert!(matches!(
        prober.set_use_high_port(true),
        Err(ProbeError::OptionNotSupported(..))
    ));
    let mut prober = Prober::new(ProberConfig::new(ProbeMethod::UdpWrapped)).unwrap();
    assert!(prober.set_use_high_port(true).is_ok());
}

#[test]
#[ignore]
fn timestamp_requests_are_icmp_only() {
    let mut prober = Prober::new(ProberConfig::new(ProbeMethod::TcpWrapped)).unwrap();
    assert!(matches!(
        prober.set_timestamp_request(true),
        Err(ProbeError::OptionNotSupported(..))
    ));
}

fn local_source() -> Ipv4Addr {
    // Good enough for tests that only care about the send path.
    Ipv4Addr::new(10, 0, 0, 1)
}
