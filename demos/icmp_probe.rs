use std::env;
use std::net::{IpAddr, Ipv4Addr};

use rawprobe::{ProbeMethod, ProbeOptions, ProbeOutcome, Prober, ProberConfig};

// ICMP probing at increasing TTLs until the destination answers.
// Needs the privilege to open raw sockets.
fn main() {
    let host = env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("one.one.one.one"));
    let dst_ip = resolve(&host);
    let src_ip = local_ipv4();
    println!("probing {host} ({dst_ip}) from {src_ip}");

    let mut prober =
        Prober::new(ProberConfig::new(ProbeMethod::Icmp)).expect("failed to open raw sockets");
    let options = ProbeOptions::default();

    for ttl in 1..=30 {
        let record = prober
            .single_probe(src_ip, dst_ip, ttl, &options)
            .expect("probe failed");
        if record.is_anonymous() {
            println!("[{:02}] *", ttl);
            continue;
        }
        println!(
            "[{:02}] {} icmp {}/{} rtt {:?}",
            ttl,
            record.reply_address,
            record.reply_icmp_type,
            record.reply_icmp_code,
            record.rtt()
        );
        if record.outcome != ProbeOutcome::IntermediateHop {
            break;
        }
    }
    println!("{} packets sent", prober.probe_count());
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
