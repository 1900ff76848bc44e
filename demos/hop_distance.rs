use std::env;
use std::net::{IpAddr, Ipv4Addr};

use rawprobe::estimate;
use rawprobe::{ProbeMethod, ProbeOptions, Prober, ProberConfig};

// Estimates how many hops away a destination sits, starting the sweep
// from a middle TTL instead of probing every hop from 1.
fn main() {
    let host = env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("dns.google"));
    let middle_ttl: u8 = env::args()
        .nth(2)
        .map(|arg| arg.parse().expect("middle TTL must be a number"))
        .unwrap_or(12);
    let dst_ip = resolve(&host);
    let src_ip = local_ipv4();

    let mut prober =
        Prober::new(ProberConfig::new(ProbeMethod::Icmp)).expect("failed to open raw sockets");
    let options = ProbeOptions::default();

    let estimate =
        estimate::hop_distance_double(&mut prober, src_ip, dst_ip, middle_ttl, &options)
            .expect("estimation failed");
    if estimate.distance == 0 {
        println!(
            "{host} ({dst_ip}): no estimate after {} packets",
            estimate.packets_sent
        );
    } else {
        println!(
            "{host} ({dst_ip}): {} hops away ({} packets sent)",
            estimate.distance, estimate.packets_sent
        );
    }
}

fn resolve(host: &str) -> Ipv4Addr {
    for ip in dns_lookup::lookup_host(host).expect("dns lookup failed") {
        if let IpAddr::V4(v4) = ip {
            return v4;
        }
    }
    panic!("no IPv4 address for {host}");
}

fn local_ipv4() -> Ipv4Addr {
    let interface = default_net::get_default_interface().expect("no default interface");
    interface
        .ipv4
        .first()
        .map(|net| net.addr)
        .expect("default interface has no IPv4 address")
}
