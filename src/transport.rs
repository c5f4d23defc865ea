//! Transport layer for Modbus TCP.
//!
//! [`ModbusTransport`] is the narrow seam between the polling client and the
//! wire: connect, send one request, close. [`TcpTransport`] implements it
//! with MBAP framing:
//!
//! ```text
//! | Transaction ID (2) | Protocol ID (2) = 0 | Length (2) | Unit ID (1) | PDU |
//! ```
//!
//! The transport connects lazily and reconnects on the next request after a
//! fault. Any I/O error, timeout or malformed frame drops the socket; an
//! exception response is a valid answer and keeps it.

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId, UnitAddressing};

/// Format raw bytes as a hex string for packet logging
fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_packet(direction: &str, data: &[u8], unit: SlaveId) {
    trace!("[MODBUS-TCP] {} unit:{} {}", direction, unit, format_hex_packet(data));
}

/// Transport abstraction used by the client.
///
/// A transport that cannot express a request's [`UnitAddressing`] returns
/// [`ModbusError::ShapeRejected`] without touching the wire, letting the
/// client try the next call shape.
pub trait ModbusTransport: Send {
    /// Open the connection if it is not open yet.
    fn connect(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Send one request and wait for its response.
    ///
    /// Exception responses surface as [`ModbusError::Exception`].
    fn request(
        &mut self,
        request: &ModbusRequest,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Successful connects, including the first.
    pub connects: u64,
}

/// Modbus TCP transport
pub struct TcpTransport {
    host: String,
    port: u16,
    /// Unit addressed by [`UnitAddressing::TransportDefault`].
    default_unit: SlaveId,
    timeout: Duration,
    stream: Option<TcpStream>,
    transaction_id: u16,
    stats: TransportStats,
}

impl TcpTransport {
    /// Create a transport; no connection is made until first use.
    pub fn new(host: impl Into<String>, port: u16, default_unit: SlaveId, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            default_unit,
            timeout,
            stream: None,
            transaction_id: 0,
            stats: TransportStats::default(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    fn resolve_unit(&self, addressing: UnitAddressing) -> SlaveId {
        match addressing {
            UnitAddressing::Explicit(unit) => unit,
            UnitAddressing::TransportDefault => self.default_unit,
        }
    }

    /// Encode a request into an MBAP frame.
    fn encode_request(&mut self, request: &ModbusRequest) -> ModbusResult<(u16, SlaveId, BytesMut)> {
        let pdu = request.to_pdu()?;
        let unit = self.resolve_unit(request.unit);
        let transaction_id = self.next_transaction_id();

        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
        frame.put_u16(transaction_id);
        frame.put_u16(0);
        frame.put_u16((1 + pdu.len()) as u16);
        frame.put_u8(unit);
        frame.put_slice(pdu.as_slice());

        Ok((transaction_id, unit, frame))
    }

    /// Write one frame and read one response frame.
    async fn exchange(stream: &mut TcpStream, frame: &[u8]) -> ModbusResult<BytesMut> {
        stream.write_all(frame).await?;

        let mut header = [0u8; MBAP_HEADER_LEN + 1];
        stream.read_exact(&mut header).await?;

        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        if protocol_id != 0 {
            return Err(ModbusError::frame(format!(
                "Unexpected protocol id {}",
                protocol_id
            )));
        }

        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        if !(2..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(ModbusError::frame(format!("Invalid MBAP length {}", length)));
        }

        let mut response = BytesMut::with_capacity(MBAP_HEADER_LEN + length);
        response.put_slice(&header);
        response.resize(MBAP_HEADER_LEN + length, 0);
        stream
            .read_exact(&mut response[MBAP_HEADER_LEN + 1..])
            .await?;

        Ok(response)
    }

    fn fail(&mut self, err: ModbusError) -> ModbusError {
        self.stats.errors += 1;
        if matches!(err, ModbusError::Timeout { .. }) {
            self.stats.timeouts += 1;
        }
        if err.is_transport_fault() {
            debug!("Dropping connection to {}: {}", self.endpoint(), err);
            self.stream = None;
        }
        err
    }
}

impl ModbusTransport for TcpTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let endpoint = self.endpoint();
        let stream = match timeout(self.timeout, TcpStream::connect(endpoint.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}: {}",
                    endpoint, e
                )));
            }
            Err(_) => {
                self.stats.errors += 1;
                self.stats.timeouts += 1;
                return Err(ModbusError::timeout(
                    format!("connect to {}", endpoint),
                    self.timeout_ms(),
                ));
            }
        };

        let _ = stream.set_nodelay(true);
        self.stream = Some(stream);
        self.stats.connects += 1;
        info!("Connected to Modbus TCP gateway {}", endpoint);
        Ok(())
    }

    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        if self.stream.is_none() {
            self.connect().await?;
        }

        let (transaction_id, unit, frame) = self.encode_request(request)?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        log_packet("send", &frame, unit);

        let wait = self.timeout;
        let timeout_ms = self.timeout_ms();
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.fail(ModbusError::connection("Not connected")));
        };

        let outcome = timeout(wait, Self::exchange(stream, &frame)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => {
                return Err(self.fail(ModbusError::timeout(
                    format!("{} @{}", request.function, request.address),
                    timeout_ms,
                )))
            }
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += response.len() as u64;
        log_packet("receive", &response, unit);

        let echoed_id = u16::from_be_bytes([response[0], response[1]]);
        if echoed_id != transaction_id {
            return Err(self.fail(ModbusError::frame(format!(
                "Transaction id mismatch: sent {}, got {}",
                transaction_id, echoed_id
            ))));
        }

        let response_unit = response[MBAP_HEADER_LEN];
        match ModbusResponse::from_pdu(response_unit, &response[MBAP_HEADER_LEN + 1..]) {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("Closed connection to {}", self.endpoint());
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
