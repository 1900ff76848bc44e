/// Probing method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    /// ICMP Echo Request (or Timestamp Request)
    Icmp,
    /// UDP datagram to an unlikely port, replies reinterpreted as ICMP-style signals
    UdpWrapped,
    /// TCP SYN+ACK segment, resets reinterpreted as ICMP-style signals
    TcpWrapped,
}

impl ProbeMethod {
    /// IP protocol number carried by probe packets of this method.
    pub fn ip_protocol(&self) -> u8 {
        match self {
            ProbeMethod::Icmp => 1,
            ProbeMethod::TcpWrapped => 6,
            ProbeMethod::UdpWrapped => 17,
        }
    }

    /// True for the methods whose replies may arrive on the bound socket pool
    /// instead of the ICMP receive socket.
    pub fn uses_receive_pool(&self) -> bool {
        matches!(self, ProbeMethod::UdpWrapped | ProbeMethod::TcpWrapped)
    }
}
