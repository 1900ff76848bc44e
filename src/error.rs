//! Error types for the probing engine.
//!
//! Only configuration mistakes and socket-layer failures are errors.
//! A probe that times out is a normal outcome and is reported in-band
//! as an anonymous [`ProbeRecord`](crate::record::ProbeRecord).

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    // Configuration errors, detected synchronously.
    #[error("{context} lower bound {lower} is not less than upper bound {upper}")]
    InvalidRange {
        context: &'static str,
        lower: u16,
        upper: u16,
    },

    #[error("record route and loose source routing cannot be enabled together")]
    ConflictingIpOptions,

    #[error("loose source route holds at most {max} addresses, got {given}")]
    LooseSourceRouteTooLong { max: usize, given: usize },

    #[error("ICMP timestamp requests cannot be combined with a fixed flow ID")]
    TimestampWithFixedFlow,

    #[error("{0} is only supported by the {1:?} probing method")]
    OptionNotSupported(&'static str, crate::protocol::ProbeMethod),

    // Socket-layer errors, fatal to the owning prober.
    #[error("failed to create raw socket: {0}")]
    SocketCreation(#[source] io::Error),

    #[error("failed to set socket option {0}: {1}")]
    SocketOption(&'static str, #[source] io::Error),

    #[error("could not bind any receive socket inside the source port range")]
    NoReceivePort,

    #[error("failed to send probe packet: {0}")]
    Send(#[source] io::Error),

    #[error("select() failed on the receive sockets: {0}")]
    Select(#[source] io::Error),

    #[error("failed to read from receive socket: {0}")]
    Receive(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
