pub(crate) mod pool;

use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{ProbeError, Result};
use crate::protocol::ProbeMethod;

fn raw_protocol(method: ProbeMethod) -> Protocol {
    match method {
        ProbeMethod::Icmp => Protocol::ICMPV4,
        ProbeMethod::TcpWrapped => Protocol::TCP,
        ProbeMethod::UdpWrapped => Protocol::UDP,
    }
}

/// Raw IPv4 send socket with IP_HDRINCL: the engine writes complete
/// datagrams, headers included.
pub(crate) fn raw_send_socket(method: ProbeMethod) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(raw_protocol(method)))
        .map_err(ProbeError::SocketCreation)?;
    socket
        .set_header_included_v4(true)
        .map_err(|e| ProbeError::SocketOption("IP_HDRINCL", e))?;
    Ok(socket)
}

/// Non-blocking raw receive socket for the given protocol.
pub(crate) fn raw_receive_socket(protocol: Protocol) -> Result<Socket> {
    let socket =
        Socket::new(Domain::IPV4, Type::RAW, Some(protocol)).map_err(ProbeError::SocketCreation)?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ProbeError::SocketOption("O_NONBLOCK", e))?;
    Ok(socket)
}

/// The ICMP receive socket every prober keeps open: ICMP errors about our
/// probes arrive here regardless of the probe protocol.
pub(crate) fn icmp_receive_socket() -> Result<Socket> {
    raw_receive_socket(Protocol::ICMPV4)
}

pub(crate) fn transport_receive_protocol(method: ProbeMethod) -> Protocol {
    raw_protocol(method)
}

/// Waits until one of `sockets` is readable or `timeout` elapses. Returns
/// the index of a ready socket, or `None` on timeout.
pub(crate) fn select_readable(sockets: &[&Socket], timeout: Duration) -> Result<Option<usize>> {
    let mut read_set = unsafe { std::mem::zeroed::<libc::fd_set>() };
    unsafe { libc::FD_ZERO(&mut read_set) };
    let mut highest: RawFd = -1;
    for socket in sockets {
        let fd = socket.as_raw_fd();
        unsafe { libc::FD_SET(fd, &mut read_set) };
        highest = highest.max(fd);
    }

    let mut wait = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let ready = unsafe {
        libc::select(
            highest + 1,
            &mut read_set,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut wait,
        )
    };
    if ready < 0 {
        return Err(ProbeError::Select(io::Error::last_os_error()));
    }
    if ready == 0 {
        return Ok(None);
    }
    for (index, socket) in sockets.iter().enumerate() {
        if unsafe { libc::FD_ISSET(socket.as_raw_fd(), &read_set) } {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Reads one raw packet into `buf`, returning the initialized length.
pub(crate) fn recv_packet(socket: &Socket, buf: &mut [u8]) -> io::Result<usize> {
    let recv_buf =
        unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
    let (length, _addr) = socket.recv_from(recv_buf)?;
    Ok(length)
}
