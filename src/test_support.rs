//! In-memory gateway used by the unit tests.
//!
//! [`SimulatedGateway`] implements [`ModbusTransport`] over a register table
//! and records every request it sees together with the (tokio) instant it
//! arrived. Behavior knobs live in shared state so a test can keep a
//! [`GatewayHandle`] after moving the transport into a client.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_FUNCTION};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, UnitAddressing};
use crate::transport::{ModbusTransport, TransportStats};

#[derive(Default)]
pub struct GatewayState {
    pub holding: HashMap<u16, u16>,
    pub input: HashMap<u16, u16>,
    /// Answer FC04 with "illegal function" and serve input registers via FC03.
    pub reject_input: bool,
    /// Answer reads touching unknown addresses with "illegal data address".
    pub strict_addresses: bool,
    pub reject_explicit_unit: bool,
    pub reject_default_unit: bool,
    /// Never answer.
    pub stall: bool,
    pub refuse_connect: bool,
    pub latency: Duration,
    /// Consumed one per request, before the request is served.
    pub failures: VecDeque<ModbusError>,
    pub log: Vec<(Instant, ModbusRequest)>,
    pub connects: u32,
    pub closes: u32,
    connected: bool,
}

/// Shared view on a [`SimulatedGateway`]'s state.
#[derive(Clone, Default)]
pub struct GatewayHandle(Arc<Mutex<GatewayState>>);

impl GatewayHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut GatewayState) -> R) -> R {
        let mut state = self.0.lock().unwrap();
        f(&mut state)
    }

    pub fn set_holding(&self, address: u16, value: u16) {
        self.with(|s| s.holding.insert(address, value));
    }

    pub fn set_input(&self, address: u16, value: u16) {
        self.with(|s| s.input.insert(address, value));
    }

    pub fn fail_next(&self, err: ModbusError) {
        self.with(|s| s.failures.push_back(err));
    }

    pub fn requests(&self) -> Vec<ModbusRequest> {
        self.with(|s| s.log.iter().map(|(_, r)| r.clone()).collect())
    }

    pub fn timed_requests(&self) -> Vec<(Instant, ModbusRequest)> {
        self.with(|s| s.log.clone())
    }

    pub fn count(&self, function: ModbusFunction) -> usize {
        self.with(|s| s.log.iter().filter(|(_, r)| r.function == function).count())
    }

    pub fn connects(&self) -> u32 {
        self.with(|s| s.connects)
    }

    pub fn holding(&self, address: u16) -> Option<u16> {
        self.with(|s| s.holding.get(&address).copied())
    }
}

pub struct SimulatedGateway {
    state: GatewayHandle,
    stats: TransportStats,
}

impl SimulatedGateway {
    pub fn new() -> (Self, GatewayHandle) {
        let handle = GatewayHandle::default();
        (
            Self {
                state: handle.clone(),
                stats: TransportStats::default(),
            },
            handle,
        )
    }

    fn serve(state: &mut GatewayState, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let unit = match request.unit {
            UnitAddressing::Explicit(unit) => unit,
            UnitAddressing::TransportDefault => 1,
        };

        match request.function {
            ModbusFunction::WriteSingleRegister => {
                state.holding.insert(request.address, request.value);
                let mut body = request.address.to_be_bytes().to_vec();
                body.extend_from_slice(&request.value.to_be_bytes());
                Ok(ModbusResponse::new(unit, request.function, body))
            }
            read => {
                if read == ModbusFunction::ReadInputRegisters && state.reject_input {
                    return Err(ModbusError::exception(read.to_u8(), EXCEPTION_ILLEGAL_FUNCTION));
                }

                let mut words = Vec::with_capacity(usize::from(request.value));
                for offset in 0..request.value {
                    let address = request.address + offset;
                    let word = match read {
                        ModbusFunction::ReadInputRegisters => state.input.get(&address),
                        // Gateways that refuse FC04 expose input registers as holding
                        _ => state
                            .holding
                            .get(&address)
                            .or_else(|| state.input.get(&address).filter(|_| state.reject_input)),
                    };
                    match word {
                        Some(&w) => words.push(w),
                        None if state.strict_addresses => {
                            return Err(ModbusError::exception(
                                read.to_u8(),
                                EXCEPTION_ILLEGAL_DATA_ADDRESS,
                            ))
                        }
                        None => words.push(0),
                    }
                }

                let mut body = vec![(words.len() * 2) as u8];
                for w in words {
                    body.extend_from_slice(&w.to_be_bytes());
                }
                Ok(ModbusResponse::new(unit, read, body))
            }
        }
    }

    fn serve_logged(
        &mut self,
        request: ModbusRequest,
    ) -> (bool, Duration, ModbusResult<ModbusResponse>) {
        self.stats.requests_sent += 1;
        let (stall, latency, outcome) = self.state.with(|s| {
            s.log.push((Instant::now(), request.clone()));

            let shape_rejected = match request.unit {
                UnitAddressing::Explicit(_) => s.reject_explicit_unit,
                UnitAddressing::TransportDefault => s.reject_default_unit,
            };
            let outcome = if shape_rejected {
                Err(ModbusError::ShapeRejected { shape: request.unit })
            } else if let Some(err) = s.failures.pop_front() {
                if err.is_transport_fault() {
                    s.connected = false;
                }
                Err(err)
            } else {
                Self::serve(s, &request)
            };
            (s.stall, s.latency, outcome)
        });

        if outcome.is_err() {
            self.stats.errors += 1;
        }
        (stall, latency, outcome)
    }
}

impl ModbusTransport for SimulatedGateway {
    fn connect(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        let result = self.state.with(|s| {
            if s.refuse_connect {
                Err(ModbusError::connection("connection refused"))
            } else {
                if !s.connected {
                    s.connected = true;
                    s.connects += 1;
                }
                Ok(())
            }
        });
        if result.is_ok() {
            self.stats.connects += 1;
        }
        async move { result }
    }

    fn request(
        &mut self,
        request: &ModbusRequest,
    ) -> impl std::future::Future<Output = ModbusResult<ModbusResponse>> + Send {
        let request = request.clone();

        // Requests that cannot be encoded never reach the wire
        let (stall, latency, outcome) = match request.to_pdu() {
            Err(err) => (false, Duration::ZERO, Err(err)),
            Ok(_) => self.serve_logged(request),
        };

        async move {
            if stall {
                std::future::pending::<()>().await;
            }
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            outcome
        }
    }

    fn is_connected(&self) -> bool {
        self.state.with(|s| s.connected)
    }

    fn close(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.state.with(|s| {
            s.connected = false;
            s.closes += 1;
        });
        async { Ok(()) }
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
