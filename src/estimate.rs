//! Hop-distance estimation: how many hops away a destination sits.
//!
//! Starting from a caller-supplied middle TTL, the estimator sweeps
//! forward until the destination answers, then refines backward when the
//! very first probe was already answered (the destination may be closer
//! than the middle TTL). The sweep is bounded by a conjectured Internet
//! diameter and gives up after a run of anonymous probes or when the same
//! router answers twice (a routing loop).

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::error::Result;
use crate::probe::{ProbeOptions, Prober};
use crate::record::{ProbeOutcome, ProbeRecord};

/// TTL ceiling of the forward sweep. No Internet path should be longer.
pub const CONJECTURED_INTERNET_DIAMETER: u8 = 48;

/// Consecutive anonymous probes tolerated before giving up.
const MAX_CONSECUTIVE_ANONYMOUS: u32 = 3;

/// Result of a hop-distance estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopEstimate {
    /// Estimated hop count, or 0 when no estimate could be made.
    pub distance: u8,
    /// Probe packets spent on the estimation.
    pub packets_sent: u32,
}

/// Estimates the hop distance using one probe per TTL.
pub fn hop_distance_single(
    prober: &mut Prober,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    middle_ttl: u8,
    options: &ProbeOptions,
) -> Result<HopEstimate> {
    hop_distance_with(middle_ttl, |ttl| {
        prober.single_probe(source, destination, ttl, options)
    })
}

/// Estimates the hop distance, retrying each unanswered TTL once.
pub fn hop_distance_double(
    prober: &mut Prober,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    middle_ttl: u8,
    options: &ProbeOptions,
) -> Result<HopEstimate> {
    hop_distance_with(middle_ttl, |ttl| {
        prober.double_probe(source, destination, ttl, options)
    })
}

/// The estimation loop itself, generic over the probing function so it can
/// be driven by either probe flavor.
fn hop_distance_with<F>(middle_ttl: u8, mut probe: F) -> Result<HopEstimate>
where
    F: FnMut(u8) -> Result<ProbeRecord>,
{
    let mut packets_sent: u32 = 0;
    let mut consecutive_anonymous: u32 = 0;
    let mut seen: HashSet<Ipv4Addr> = HashSet::new();
    let mut answered: Option<ProbeRecord> = None;
    let mut ttl = middle_ttl;

    // Forward sweep from the middle TTL.
    loop {
        let record = probe(ttl)?;
        packets_sent += u32::from(record.probing_cost);

        if record.is_anonymous() {
            consecutive_anonymous += 1;
            if consecutive_anonymous >= MAX_CONSECUTIVE_ANONYMOUS {
                break;
            }
        } else {
            if !seen.insert(record.reply_address) {
                // The same router answered twice: a routing loop, no
                // distance can be trusted.
                return Ok(HopEstimate {
                    distance: 0,
                    packets_sent,
                });
            }
            consecutive_anonymous = 0;
            match record.outcome {
                ProbeOutcome::DestinationAnswered => {
                    answered = Some(record);
                    break;
                }
                ProbeOutcome::IntermediateHop => {}
                // An unreachable that is not the destination's own answer
                // ends the sweep without an estimate.
                _ => break,
            }
        }

        if ttl >= CONJECTURED_INTERNET_DIAMETER {
            break;
        }
        ttl += 1;
    }

    // Backward refinement: an answer right at the middle TTL may overshoot
    // the real distance, so walk down while the destination keeps
    // answering.
    if ttl == middle_ttl && answered.is_some() {
        let mut down = middle_ttl.saturating_sub(1);
        while down > 1 {
            let record = probe(down)?;
            packets_sent += u32::from(record.probing_cost);
            if record.is_anonymous() || record.outcome != ProbeOutcome::DestinationAnswered {
                break;
            }
            answered = Some(record);
            down -= 1;
        }
    }

    let distance = answered.map(|record| record.requested_ttl).unwrap_or(0);
    Ok(HopEstimate {
        distance,
        packets_sent,
    })
}
