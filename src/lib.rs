//! Raw socket probing engine for IPv4 topology discovery.
//!
//! Sends ICMP, UDP or TCP probes with arbitrary TTLs over raw sockets,
//! recognizes the replies (including the ICMP errors that quote the
//! original probe) and estimates hop distances. Requires the privilege to
//! open raw sockets.

pub mod checksum;
mod error;
pub mod estimate;
pub mod packet;
mod probe;
mod protocol;
mod record;
mod socket;

pub use error::{ProbeError, Result};
pub use probe::{ProbeOptions, Prober, ProberConfig};
pub use protocol::ProbeMethod;
pub use record::{ProbeOutcome, ProbeRecord};
