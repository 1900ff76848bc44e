use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::Socket;
use tracing::debug;

use crate::error::{ProbeError, Result};
use crate::protocol::ProbeMethod;
use crate::socket;

/// Bind attempts per pool slot before giving up on the whole pool.
const MAX_BIND_ATTEMPTS: usize = 256;

/// Round-robin pool of raw TCP/UDP receive sockets, each bound to its own
/// source port so direct transport replies (TCP resets in particular)
/// reach us. The cursor picks the socket the next probe sends from and
/// listens on; it only ever moves through [`advance`](Self::advance) and
/// [`pin_front`](Self::pin_front).
pub(crate) struct ReceivePool {
    sockets: Vec<Socket>,
    ports: Vec<u16>,
    cursor: usize,
}

impl ReceivePool {
    /// Binds up to `size` sockets to successive ports strictly inside
    /// `(lower_port, upper_port)`. Ports that fail to bind are skipped, up
    /// to a bounded number of attempts; at least one bound socket is
    /// required.
    pub(crate) fn bind(
        method: ProbeMethod,
        lower_port: u16,
        upper_port: u16,
        size: usize,
    ) -> Result<ReceivePool> {
        let protocol = socket::transport_receive_protocol(method);
        let mut sockets = Vec::with_capacity(size);
        let mut ports = Vec::with_capacity(size);

        let mut offset: u32 = 0;
        'slots: while sockets.len() < size && u32::from(lower_port) + offset + 1 < u32::from(upper_port)
        {
            let candidate = socket::raw_receive_socket(protocol)?;
            candidate
                .set_reuse_address(true)
                .map_err(|e| ProbeError::SocketOption("SO_REUSEADDR", e))?;

            let mut attempts = 0;
            loop {
                if u32::from(lower_port) + offset + 1 >= u32::from(upper_port)
                    || attempts >= MAX_BIND_ATTEMPTS
                {
                    // Range exhausted or too many rejections: drop the
                    // unbound socket and stop growing the pool.
                    break 'slots;
                }
                let port = lower_port + offset as u16 + 1;
                let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
                match candidate.bind(&addr.into()) {
                    Ok(()) => {
                        debug!(port, "bound transport receive socket");
                        sockets.push(candidate);
                        ports.push(port);
                        offset += 1;
                        continue 'slots;
                    }
                    Err(_) => {
                        offset += 1;
                        attempts += 1;
                    }
                }
            }
        }

        if sockets.is_empty() {
            return Err(ProbeError::NoReceivePort);
        }
        Ok(ReceivePool {
            sockets,
            ports,
            cursor: 0,
        })
    }

    /// Socket the next probe listens on.
    pub(crate) fn active(&self) -> &Socket {
        &self.sockets[self.cursor]
    }

    /// Source port of the active socket.
    pub(crate) fn active_port(&self) -> u16 {
        self.ports[self.cursor]
    }

    /// Moves the cursor to the next socket, wrapping around.
    pub(crate) fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.sockets.len();
    }

    /// Pins the cursor to the first socket, so a fixed-flow sequence keeps
    /// one source port across every TTL.
    pub(crate) fn pin_front(&mut self) {
        self.cursor = 0;
    }
}
