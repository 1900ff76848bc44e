//! The prober: sends raw IPv4 probe packets at controlled TTLs and
//! classifies the replies.
//!
//! One [`Prober`] owns a raw send socket with `IP_HDRINCL`, a raw ICMP
//! receive socket, and (for the TCP/UDP methods) a round-robin pool of
//! transport receive sockets. Every probe is a blocking send/receive
//! cycle bounded by the configured timeout; a probe that draws no
//! recognizable reply yields an anonymous [`ProbeRecord`] rather than an
//! error.

mod icmp;
mod tcp;
mod udp;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use socket2::Socket;
use tracing::trace;

use crate::error::{ProbeError, Result};
use crate::packet::{self, ipv4::IpOption, RANDOM_DATA_LENGTH};
use crate::protocol::ProbeMethod;
use crate::record::{ProbeOutcome, ProbeRecord};
use crate::socket::{self, pool::ReceivePool};

/// Receive buffer length; comfortably above any reply we care about,
/// options included.
const RECEIVE_BUFFER_LENGTH: usize = 512;

/// Destination port used by UDP probes when high-port probing is enabled.
const HIGH_DESTINATION_PORT: u16 = 65535;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);
const DEFAULT_LOWER_BOUND: u16 = 30000;
const DEFAULT_UPPER_BOUND: u16 = 64000;
const DEFAULT_RECEIVE_POOL_SIZE: usize = 6;

/// Construction-time settings of a [`Prober`].
#[derive(Clone, Debug)]
pub struct ProberConfig {
    /// Probing method
    pub method: ProbeMethod,
    /// Marker appended to every probe payload, after the random bytes
    pub attention_message: String,
    /// How long to wait for a reply to each probe
    pub timeout: Duration,
    /// Minimum pause between consecutive probes (zero disables regulation)
    pub probe_regulating_pause: Duration,
    /// Source port (TCP/UDP) or ICMP identifier range, exclusive bounds
    pub src_port_icmp_id_range: (u16, u16),
    /// Destination port (TCP/UDP) or ICMP sequence range, exclusive bounds
    pub dst_port_icmp_seq_range: (u16, u16),
    /// Receive socket pool size for the TCP/UDP methods
    pub receive_pool_size: usize,
    /// Append a textual account of each probe to the prober's log
    pub verbose: bool,
}

impl ProberConfig {
    pub fn new(method: ProbeMethod) -> ProberConfig {
        ProberConfig {
            method,
            attention_message: String::from("NOT an ATTACK"),
            timeout: DEFAULT_TIMEOUT,
            probe_regulating_pause: Duration::ZERO,
            src_port_icmp_id_range: (DEFAULT_LOWER_BOUND, DEFAULT_UPPER_BOUND),
            dst_port_icmp_seq_range: (DEFAULT_LOWER_BOUND, DEFAULT_UPPER_BOUND),
            receive_pool_size: DEFAULT_RECEIVE_POOL_SIZE,
            verbose: false,
        }
    }
}

/// Per-probe options.
#[derive(Clone, Debug, Default)]
pub struct ProbeOptions {
    /// Keep the flow identifier constant across TTLs so load-balancing
    /// routers hash every probe onto the same path.
    pub fixed_flow_id: bool,
    /// Request the IP record-route option (ICMP method only).
    pub record_route: bool,
    /// Intermediate hops for IP loose source routing (ICMP method only).
    /// Empty means no source routing.
    pub loose_source_route: Vec<Ipv4Addr>,
}

/// Everything the receive loop needs to recognize a reply to the probe in
/// flight.
pub(crate) struct ProbeParams {
    pub(crate) source: Ipv4Addr,
    pub(crate) destination: Ipv4Addr,
    pub(crate) ip_identifier: u16,
    pub(crate) ttl: u8,
    pub(crate) src_port_icmp_id: u16,
    pub(crate) dst_port_icmp_seq: u16,
    pub(crate) record_route: bool,
    pub(crate) timestamp_request: bool,
    pub(crate) tcp_sequence: u32,
    pub(crate) originate_ts: u32,
    /// Transport payload bytes sent (random data plus attention message).
    pub(crate) sent_payload_length: u16,
}

/// Reply fields extracted by a method-specific recognizer.
pub(crate) struct ReplyData {
    pub(crate) reply_address: Ipv4Addr,
    pub(crate) reply_ttl: u8,
    pub(crate) reply_icmp_type: u8,
    pub(crate) reply_icmp_code: u8,
    pub(crate) reply_ip_identifier: u16,
    pub(crate) payload_ttl: u8,
    pub(crate) payload_length: u16,
    pub(crate) receive_ts: u32,
    pub(crate) transmit_ts: u32,
    pub(crate) record_route: Vec<Ipv4Addr>,
    pub(crate) outcome: ProbeOutcome,
}

/// Raw IPv4 prober.
pub struct Prober {
    method: ProbeMethod,
    attention_message: Vec<u8>,
    timeout: Duration,
    probe_regulating_pause: Duration,
    src_port_icmp_id_range: (u16, u16),
    dst_port_icmp_seq_range: (u16, u16),
    send_socket: Socket,
    icmp_receive_socket: Socket,
    receive_pool: Option<ReceivePool>,
    timestamp_request: bool,
    use_high_port: bool,
    last_probe_time: Option<Instant>,
    probe_count: u64,
    verbose: bool,
    log: String,
}

impl Prober {
    /// Opens the raw sockets and, for the TCP/UDP methods, binds the
    /// receive pool. Requires the privilege to open raw sockets.
    pub fn new(config: ProberConfig) -> Result<Prober> {
        let (src_lower, src_upper) = config.src_port_icmp_id_range;
        if src_lower >= src_upper {
            return Err(ProbeError::InvalidRange {
                context: "source port / ICMP identifier",
                lower: src_lower,
                upper: src_upper,
            });
        }
        let (dst_lower, dst_upper) = config.dst_port_icmp_seq_range;
        if dst_lower >= dst_upper {
            return Err(ProbeError::InvalidRange {
                context: "destination port / ICMP sequence",
                lower: dst_lower,
                upper: dst_upper,
            });
        }

        let send_socket = socket::raw_send_socket(config.method)?;
        let icmp_receive_socket = socket::icmp_receive_socket()?;
        let receive_pool = if config.method.uses_receive_pool() {
            Some(ReceivePool::bind(
                config.method,
                src_lower,
                src_upper,
                config.receive_pool_size,
            )?)
        } else {
            None
        };

        Ok(Prober {
            method: config.method,
            attention_message: config.attention_message.into_bytes(),
            timeout: config.timeout,
            probe_regulating_pause: config.probe_regulating_pause,
            src_port_icmp_id_range: config.src_port_icmp_id_range,
            dst_port_icmp_seq_range: config.dst_port_icmp_seq_range,
            send_socket,
            icmp_receive_socket,
            receive_pool,
            timestamp_request: false,
            use_high_port: false,
            last_probe_time: None,
            probe_count: 0,
            verbose: config.verbose,
            log: String::new(),
        })
    }

    pub fn method(&self) -> ProbeMethod {
        self.method
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Total probe packets sent by this prober.
    pub fn probe_count(&self) -> u64 {
        self.probe_count
    }

    /// Switches ICMP probes from Echo Request to Timestamp Request.
    /// Only meaningful for the ICMP method and incompatible with fixed
    /// flow IDs (the timestamp fields leave no room for checksum
    /// compensation).
    pub fn set_timestamp_request(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.method != ProbeMethod::Icmp {
            return Err(ProbeError::OptionNotSupported(
                "timestamp requests",
                ProbeMethod::Icmp,
            ));
        }
        self.timestamp_request = enabled;
        Ok(())
    }

    /// Redirects UDP probes to destination port 65535 and disables the
    /// Port Unreachable rewrite, so the raw reply can be inspected (used
    /// for alias resolution).
    pub fn set_use_high_port(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.method != ProbeMethod::UdpWrapped {
            return Err(ProbeError::OptionNotSupported(
                "high-port probing",
                ProbeMethod::UdpWrapped,
            ));
        }
        self.use_high_port = enabled;
        Ok(())
    }

    /// Returns the accumulated verbose log and clears it.
    pub fn take_log(&mut self) -> String {
        std::mem::take(&mut self.log)
    }

    /// Sends one probe toward `destination` with the given TTL and waits
    /// for a reply until the timeout. Returns an anonymous record when
    /// nothing recognizable arrived; errors are reserved for invalid
    /// option combinations and socket failures.
    pub fn single_probe(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        ttl: u8,
        options: &ProbeOptions,
    ) -> Result<ProbeRecord> {
        self.validate_options(options)?;
        let (ip_identifier, src_port_icmp_id, dst_port_icmp_seq) =
            self.pick_identifiers(options.fixed_flow_id);
        let random_data = random_data_buffer();

        let mut record = self.basic_probe(
            source,
            destination,
            ip_identifier,
            ttl,
            options,
            src_port_icmp_id,
            dst_port_icmp_seq,
            &random_data,
        )?;
        record.probing_cost = 1;
        self.probe_count += 1;

        self.apply_wrapped_rewrite(&mut record);
        if let Some(pool) = &mut self.receive_pool {
            pool.advance();
        }
        Ok(record)
    }

    /// Like [`single_probe`](Self::single_probe), but when the first probe
    /// goes unanswered a second one is sent with the same identifiers and
    /// payload. The returned record then carries a probing cost of 2,
    /// whether or not the retry was answered.
    pub fn double_probe(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        ttl: u8,
        options: &ProbeOptions,
    ) -> Result<ProbeRecord> {
        self.validate_options(options)?;
        let (ip_identifier, src_port_icmp_id, dst_port_icmp_seq) =
            self.pick_identifiers(options.fixed_flow_id);
        let random_data = random_data_buffer();

        let mut record = self.basic_probe(
            source,
            destination,
            ip_identifier,
            ttl,
            options,
            src_port_icmp_id,
            dst_port_icmp_seq,
            &random_data,
        )?;
        record.probing_cost = 1;
        self.probe_count += 1;

        if record.is_anonymous() {
            record = self.basic_probe(
                source,
                destination,
                ip_identifier,
                ttl,
                options,
                src_port_icmp_id,
                dst_port_icmp_seq,
                &random_data,
            )?;
            record.probing_cost = 2;
            self.probe_count += 1;
        }

        self.apply_wrapped_rewrite(&mut record);
        if let Some(pool) = &mut self.receive_pool {
            pool.advance();
        }
        Ok(record)
    }

    fn validate_options(&self, options: &ProbeOptions) -> Result<()> {
        if options.record_route && !options.loose_source_route.is_empty() {
            return Err(ProbeError::ConflictingIpOptions);
        }
        if options.loose_source_route.len() > packet::ipv4::RECORD_ROUTE_SLOTS {
            return Err(ProbeError::LooseSourceRouteTooLong {
                max: packet::ipv4::RECORD_ROUTE_SLOTS,
                given: options.loose_source_route.len(),
            });
        }
        if self.method != ProbeMethod::Icmp {
            if options.record_route {
                return Err(ProbeError::OptionNotSupported(
                    "record route",
                    ProbeMethod::Icmp,
                ));
            }
            if !options.loose_source_route.is_empty() {
                return Err(ProbeError::OptionNotSupported(
                    "loose source routing",
                    ProbeMethod::Icmp,
                ));
            }
        }
        if self.timestamp_request && options.fixed_flow_id {
            return Err(ProbeError::TimestampWithFixedFlow);
        }
        Ok(())
    }

    /// Chooses the IP identifier and the source/destination identifier
    /// pair for the next probe. With a fixed flow ID the pool cursor is
    /// pinned and the destination identifier sits in the middle of its
    /// range, so every TTL maps onto the same flow.
    fn pick_identifiers(&mut self, fixed_flow_id: bool) -> (u16, u16, u16) {
        let mut rng = rand::thread_rng();
        let ip_identifier: u16 = rng.gen();

        let (src_lower, src_upper) = self.src_port_icmp_id_range;
        let src_port_icmp_id = match &mut self.receive_pool {
            Some(pool) => {
                if fixed_flow_id {
                    pool.pin_front();
                }
                pool.active_port()
            }
            None => rng.gen_range(src_lower..src_upper),
        };

        let (dst_lower, dst_upper) = self.dst_port_icmp_seq_range;
        let dst_port_icmp_seq = if self.use_high_port {
            HIGH_DESTINATION_PORT
        } else if fixed_flow_id && self.method.uses_receive_pool() {
            dst_lower + (dst_upper - dst_lower) / 2
        } else {
            rng.gen_range(dst_lower..dst_upper)
        };

        (ip_identifier, src_port_icmp_id, dst_port_icmp_seq)
    }

    /// Checksum constant for fixed-flow ICMP probes: the middle of the
    /// sequence range.
    fn fixed_checksum(&self) -> u16 {
        let (lower, upper) = self.dst_port_icmp_seq_range;
        lower + (upper - lower) / 2
    }

    #[allow(clippy::too_many_arguments)]
    fn basic_probe(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        ip_identifier: u16,
        ttl: u8,
        options: &ProbeOptions,
        src_port_icmp_id: u16,
        dst_port_icmp_seq: u16,
        random_data: &[u8; RANDOM_DATA_LENGTH],
    ) -> Result<ProbeRecord> {
        self.regulate_probing_frequency();

        let mut rng = rand::thread_rng();
        let params = ProbeParams {
            source,
            destination,
            ip_identifier,
            ttl,
            src_port_icmp_id,
            dst_port_icmp_seq,
            record_route: options.record_route,
            timestamp_request: self.timestamp_request,
            tcp_sequence: rng.gen(),
            originate_ts: if self.timestamp_request {
                ut_time_since_midnight()
            } else {
                0
            },
            sent_payload_length: (RANDOM_DATA_LENGTH + self.attention_message.len()) as u16,
        };

        let ip_option = if options.record_route {
            IpOption::RecordRoute
        } else if !options.loose_source_route.is_empty() {
            IpOption::LooseSourceRoute(&options.loose_source_route)
        } else {
            IpOption::None
        };

        let fixed_checksum = if options.fixed_flow_id && self.method == ProbeMethod::Icmp {
            Some(self.fixed_checksum())
        } else {
            None
        };

        let datagram = match self.method {
            ProbeMethod::Icmp => icmp::build_datagram(
                &params,
                random_data,
                &self.attention_message,
                ip_option,
                fixed_checksum,
            ),
            ProbeMethod::UdpWrapped => {
                udp::build_datagram(&params, random_data, &self.attention_message)
            }
            ProbeMethod::TcpWrapped => {
                tcp::build_datagram(&params, random_data, &self.attention_message, rng.gen())
            }
        };

        // With IP_HDRINCL the kernel still routes on the sockaddr, which
        // under loose source routing is the first hop, already in the
        // header's destination field.
        let header_destination = match ip_option {
            IpOption::LooseSourceRoute(hops) => hops[0],
            _ => destination,
        };
        let target = SocketAddr::V4(SocketAddrV4::new(header_destination, 0));
        self.send_socket
            .send_to(&datagram, &target.into())
            .map_err(ProbeError::Send)?;

        let request_time = SystemTime::now();
        let started = Instant::now();
        self.last_probe_time = Some(started);
        if self.verbose {
            self.log.push_str(&format!(
                "probe sent to {destination} (ttl {ttl}, ip id {ip_identifier}), listening...\n"
            ));
        }

        match self.receive_reply(&params, started)? {
            Some(reply) => {
                let record = ProbeRecord {
                    request_time,
                    reply_time: SystemTime::now(),
                    destination_address: destination,
                    reply_address: reply.reply_address,
                    requested_ttl: ttl,
                    reply_ttl: reply.reply_ttl,
                    payload_ttl: reply.payload_ttl,
                    reply_icmp_type: reply.reply_icmp_type,
                    reply_icmp_code: reply.reply_icmp_code,
                    source_ip_identifier: ip_identifier,
                    reply_ip_identifier: reply.reply_ip_identifier,
                    payload_length: reply.payload_length,
                    originate_ts: if reply.receive_ts != 0 || reply.transmit_ts != 0 {
                        params.originate_ts
                    } else {
                        0
                    },
                    receive_ts: reply.receive_ts,
                    transmit_ts: reply.transmit_ts,
                    probing_cost: 1,
                    fixed_flow_id: options.fixed_flow_id,
                    record_route: reply.record_route,
                    outcome: reply.outcome,
                };
                if self.verbose {
                    self.log.push_str(&format!(
                        "reply from {} (icmp type {} code {})\n",
                        record.reply_address, record.reply_icmp_type, record.reply_icmp_code
                    ));
                }
                Ok(record)
            }
            None => {
                if self.verbose {
                    self.log.push_str("timed out, anonymous record\n");
                }
                Ok(ProbeRecord::anonymous(
                    request_time,
                    destination,
                    ttl,
                    ip_identifier,
                    options.fixed_flow_id,
                ))
            }
        }
    }

    /// Waits for a reply that matches the probe in flight. Every wakeup
    /// recomputes the remaining budget from the send time, so unrelated
    /// traffic never extends the deadline. Returns `None` once the budget
    /// is spent.
    fn receive_reply(&mut self, params: &ProbeParams, started: Instant) -> Result<Option<ReplyData>> {
        let mut buffer = [0u8; RECEIVE_BUFFER_LENGTH];
        loop {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            let watch_pool = self.method == ProbeMethod::TcpWrapped;
            let ready = {
                let mut sockets: Vec<&Socket> = vec![&self.icmp_receive_socket];
                if watch_pool {
                    if let Some(pool) = &self.receive_pool {
                        sockets.push(pool.active());
                    }
                }
                match socket::select_readable(&sockets, remaining)? {
                    Some(index) => index,
                    None => return Ok(None),
                }
            };

            let from_pool = ready == 1;
            let socket = if from_pool {
                match &self.receive_pool {
                    Some(pool) => pool.active(),
                    None => continue,
                }
            } else {
                &self.icmp_receive_socket
            };

            let received = match socket::recv_packet(socket, &mut buffer) {
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ProbeError::Receive(err)),
            };

            let reply = match packet::ipv4::validate(&buffer[..received]) {
                Some(reply) => reply,
                None => {
                    trace!(received, "discarding malformed packet");
                    continue;
                }
            };

            let recognized = match self.method {
                ProbeMethod::Icmp => icmp::recognize(params, &reply),
                ProbeMethod::UdpWrapped => udp::recognize(params, &reply),
                ProbeMethod::TcpWrapped => tcp::recognize(params, &reply, from_pool),
            };
            match recognized {
                Some(data) => return Ok(Some(data)),
                None => {
                    trace!("discarding packet unrelated to the probe in flight");
                    continue;
                }
            }
        }
    }

    /// Rewrites the replies that, for the wrapped methods, stand in for an
    /// Echo Reply: a Port Unreachable from the destination (UDP and TCP)
    /// or a direct TCP reset.
    fn apply_wrapped_rewrite(&self, record: &mut ProbeRecord) {
        match self.method {
            ProbeMethod::UdpWrapped if !self.use_high_port => {
                if record.reply_icmp_type == packet::ICMP_TYPE_DESTINATION_UNREACHABLE
                    && record.reply_icmp_code == packet::ICMP_CODE_PORT_UNREACHABLE
                {
                    record.reply_icmp_type = packet::ICMP_TYPE_ECHO_REPLY;
                    record.reply_icmp_code = 0;
                    record.outcome = ProbeOutcome::DestinationAnswered;
                }
            }
            ProbeMethod::TcpWrapped => {
                if record.reply_icmp_type == packet::PSEUDO_TCP_RESET_ICMP_TYPE
                    || (record.reply_icmp_type == packet::ICMP_TYPE_DESTINATION_UNREACHABLE
                        && record.reply_icmp_code == packet::ICMP_CODE_PORT_UNREACHABLE)
                {
                    record.reply_icmp_type = packet::ICMP_TYPE_ECHO_REPLY;
                    record.reply_icmp_code = 0;
                    record.outcome = ProbeOutcome::DestinationAnswered;
                }
            }
            _ => {}
        }
    }

    /// Sleeps whatever is left of the regulating pause since the previous
    /// probe.
    fn regulate_probing_frequency(&self) {
        if self.probe_regulating_pause.is_zero() {
            return;
        }
        if let Some(last) = self.last_probe_time {
            let elapsed = last.elapsed();
            if elapsed < self.probe_regulating_pause {
                thread::sleep(self.probe_regulating_pause - elapsed);
            }
        }
    }
}

fn random_data_buffer() -> [u8; RANDOM_DATA_LENGTH] {
    let mut rng = rand::thread_rng();
    let mut data = [0u8; RANDOM_DATA_LENGTH];
    rng.fill(&mut data[..]);
    data
}

/// Milliseconds since UTC midnight, the originate timestamp of an ICMP
/// Timestamp Request.
pub(crate) fn ut_time_since_midnight() -> u32 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_millis() % 86_400_000) as u32
}
