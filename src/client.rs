//! Fault-tolerant register client
//!
//! [`RegisterClient`] owns one connection to one unit and turns register
//! maps into decoded values. It layers, on top of any [`ModbusTransport`]:
//!
//! - span planning per [`GatewayProfile`] (see [`crate::planner`]);
//! - function-code selection with a one-time, sticky FC04 → FC03 fallback
//!   for gateways that only expose input registers as holding registers;
//! - retry with exponential backoff and forced reconnect;
//! - a post-write cooldown before the next read;
//! - call-shape adaptation for transports that disagree on unit addressing.
//!
//! # Concurrency
//!
//! | Profile | Serialization |
//! |---------|---------------|
//! | generic | `tokio::sync::Mutex` around each operation, fixed message wait |
//! | safe | FIFO queue drained by one worker task, pacing after each operation |
//!
//! The worker is spawned on first use. [`RegisterClient::close`] cancels it;
//! queued and in-flight operations resolve to [`ModbusError::Cancelled`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use systemair_modbus::{models, GatewayProfile, ModbusResult, RegisterClient};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let client = RegisterClient::tcp("192.168.1.50", 502, 1, GatewayProfile::generic());
//!
//!     let values = client.read_register_map(models::SAVE.definitions()).await?;
//!     println!("{:?}", values.get("outdoor_temperature"));
//!
//!     client.write_temperature(models::ADDR_SUPPLY_AIR_SETPOINT, 21.5).await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{ModbusError, ModbusResult};
use crate::planner::{self, ReadSpan};
use crate::profile::{GatewayProfile, InputReadStrategy};
use crate::protocol::{
    call_shapes, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, UnitAddressing,
};
use crate::register_map::{RegisterClass, RegisterDefinition};
use crate::transport::{ModbusTransport, TcpTransport, TransportStats};
use crate::value::DecodedValueMap;

/// How long `close()` waits for the queue worker before aborting it.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Ready,
    Reading,
    Writing,
}

/// Learned way of reading input-class registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputAccess {
    /// FC04
    #[default]
    Native,
    /// FC03 at the same addresses; sticky until `close()`.
    HoldingAlias,
}

// ============================================================================
// Connection
// ============================================================================

/// Transport plus everything learned about it. All I/O runs through here
/// while the owner holds the connection lock.
struct Connection<T> {
    transport: T,
    unit: SlaveId,
    profile: GatewayProfile,
    state: LinkState,
    input_access: InputAccess,
    /// Set once the first-ever connect has waited out the settle delay.
    settled: bool,
    last_write: Option<Instant>,
}

impl<T: ModbusTransport> Connection<T> {
    fn new(transport: T, unit: SlaveId, profile: GatewayProfile) -> Self {
        Self {
            transport,
            unit,
            profile,
            state: LinkState::Disconnected,
            input_access: InputAccess::Native,
            settled: false,
            last_write: None,
        }
    }

    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            debug!("link state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    async fn ensure_connected(&mut self) -> ModbusResult<()> {
        if self.transport.is_connected() {
            if self.state == LinkState::Disconnected {
                self.set_state(LinkState::Ready);
            }
            return Ok(());
        }

        self.set_state(LinkState::Connecting);
        if let Err(e) = self.transport.connect().await {
            self.set_state(LinkState::Disconnected);
            return Err(e);
        }

        if !self.settled {
            self.settled = true;
            let settle = self.profile.settle();
            if !settle.is_zero() {
                debug!("Waiting {:?} for the gateway to settle", settle);
                sleep(settle).await;
            }
        }

        self.set_state(LinkState::Ready);
        Ok(())
    }

    async fn drop_link(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!("Error while closing transport: {}", e);
        }
        self.set_state(LinkState::Disconnected);
    }

    /// Close the transport and forget everything learned about the gateway.
    async fn shutdown(&mut self) {
        self.drop_link().await;
        if self.input_access != InputAccess::Native {
            debug!("Forgetting learned input register access");
        }
        self.input_access = InputAccess::Native;
    }

    fn read_function(&self, class: RegisterClass) -> ModbusFunction {
        match class {
            RegisterClass::Holding => ModbusFunction::ReadHoldingRegisters,
            RegisterClass::Input => match (self.profile.input_reads, self.input_access) {
                (InputReadStrategy::NativeFirst, InputAccess::Native) => {
                    ModbusFunction::ReadInputRegisters
                }
                _ => ModbusFunction::ReadHoldingRegisters,
            },
        }
    }

    /// Send one request, walking the call shapes until the transport accepts
    /// one. Every answered request is followed by the profile's message wait.
    async fn call<F>(&mut self, operation: &'static str, build: F) -> ModbusResult<ModbusResponse>
    where
        F: Fn(UnitAddressing) -> ModbusRequest,
    {
        let request_timeout = self.profile.request_timeout();

        for shape in call_shapes(self.unit) {
            let request = build(shape);
            let result = match timeout(request_timeout, self.transport.request(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ModbusError::timeout(
                    format!("{} @{}", request.function, request.address),
                    request_timeout.as_millis() as u64,
                )),
            };

            if let Err(ModbusError::ShapeRejected { shape }) = &result {
                debug!("{} rejected {} call shape, trying next", operation, shape);
                continue;
            }

            let pacing = self.profile.pacing();
            if !pacing.is_zero() {
                sleep(pacing).await;
            }
            return result;
        }

        Err(ModbusError::UnsupportedTransport { operation })
    }

    /// Bring the link back to `Ready`, or drop it after a transport fault.
    async fn finish(&mut self, transport_fault: bool) {
        if transport_fault {
            self.drop_link().await;
        } else if self.transport.is_connected() {
            self.set_state(LinkState::Ready);
        } else {
            self.set_state(LinkState::Disconnected);
        }
    }

    async fn read_once(
        &mut self,
        function: ModbusFunction,
        start: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.ensure_connected().await?;
        self.set_state(LinkState::Reading);

        let result = self
            .call("read", |shape| ModbusRequest::read(shape, function, start, count))
            .await
            .and_then(|response| {
                if response.function != function {
                    return Err(ModbusError::protocol(format!(
                        "Expected {} response, got {}",
                        function, response.function
                    )));
                }
                response.parse_registers(count)
            });

        self.finish(is_fault(&result)).await;
        result
    }

    async fn write_once(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.ensure_connected().await?;
        self.set_state(LinkState::Writing);

        let result = self
            .call("write", |shape| ModbusRequest::write_single(shape, address, value))
            .await
            .and_then(|response| response.check_write_echo(address, value));

        self.finish(is_fault(&result)).await;
        result
    }

    /// Earliest instant a read may go out after the last write.
    fn cooldown_deadline(&self) -> Option<Instant> {
        let ready_at = self.last_write? + self.profile.write_cooldown();
        (Instant::now() < ready_at).then_some(ready_at)
    }

    /// Sleep before retry `retry` (1-based); from the second retry on the
    /// link is torn down so the attempt starts on a fresh connection.
    async fn prepare_retry(&mut self, retry: u32, err: &ModbusError) {
        let delay = self.profile.backoff_delay(retry - 1, err.is_busy());
        warn!(
            "Retry {}/{} in {:?} after: {}",
            retry, self.profile.retries, delay, err
        );
        sleep(delay).await;
        if retry > 1 {
            self.drop_link().await;
        }
    }

    async fn read_span(
        &mut self,
        class: RegisterClass,
        start: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        if let Some(ready_at) = self.cooldown_deadline() {
            debug!("Waiting out write cooldown");
            sleep_until(ready_at).await;
        }

        let function = self.read_function(class);
        let attempts = self.profile.attempts(false);
        let mut retry = 0;

        loop {
            let err = match self.read_once(function, start, count).await {
                Ok(words) => return Ok(words),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };

            if function == ModbusFunction::ReadInputRegisters
                && self.input_access == InputAccess::Native
            {
                return self.fall_back_to_holding(start, count, err).await;
            }

            retry += 1;
            if retry >= attempts {
                debug!("{} @{} len={} abandoned: {}", function, start, count, err);
                return Err(err);
            }
            self.prepare_retry(retry, &err).await;
        }
    }

    /// Retry a refused FC04 span once with FC03. Success makes the alias
    /// sticky for the rest of the connection's life.
    async fn fall_back_to_holding(
        &mut self,
        start: u16,
        count: u16,
        cause: ModbusError,
    ) -> ModbusResult<Vec<u16>> {
        debug!("FC04 @{} len={} failed ({}), trying FC03", start, count, cause);

        match self
            .read_once(ModbusFunction::ReadHoldingRegisters, start, count)
            .await
        {
            Ok(words) => {
                self.input_access = InputAccess::HoldingAlias;
                info!(
                    "Gateway does not serve input registers via FC04; \
                     reading all input registers with FC03 from now on"
                );
                Ok(words)
            }
            Err(e) => {
                debug!("FC03 fallback @{} len={} failed: {}", start, count, e);
                Err(e)
            }
        }
    }

    async fn write_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        let attempts = self.profile.attempts(true);
        let mut retry = 0;

        loop {
            let err = match self.write_once(address, value).await {
                Ok(()) => {
                    self.last_write = Some(Instant::now());
                    debug!("Wrote {} to register {}", value, address);
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };

            retry += 1;
            if retry >= attempts {
                return Err(err);
            }
            self.prepare_retry(retry, &err).await;
        }
    }
}

fn is_fault<R>(result: &ModbusResult<R>) -> bool {
    matches!(result, Err(e) if e.is_transport_fault())
}

// ============================================================================
// Queue worker
// ============================================================================

/// Operation handed to the queue worker
enum Job {
    Read {
        class: RegisterClass,
        start: u16,
        count: u16,
        responder: oneshot::Sender<ModbusResult<Vec<u16>>>,
    },
    Write {
        address: u16,
        value: u16,
        responder: oneshot::Sender<ModbusResult<()>>,
    },
}

struct Worker {
    sender: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

async fn run_job<T: ModbusTransport>(connection: &Mutex<Connection<T>>, job: Job) {
    let mut conn = connection.lock().await;
    match job {
        Job::Read {
            class,
            start,
            count,
            responder,
        } => {
            let result = conn.read_span(class, start, count).await;
            let _ = responder.send(result);
        }
        Job::Write {
            address,
            value,
            responder,
        } => {
            let result = conn.write_register(address, value).await;
            let _ = responder.send(result);
        }
    }
}

async fn worker_task<T: ModbusTransport>(
    connection: Arc<Mutex<Connection<T>>>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    cancel: CancellationToken,
) {
    debug!("Queue worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        // Dropping an unfinished job drops its responder, which the caller
        // observes as `Cancelled`.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = run_job(&connection, job) => {}
        }
    }
    debug!("Queue worker stopped");
}

// ============================================================================
// RegisterClient
// ============================================================================

/// Register-map client for one unit.
///
/// All methods take `&self`; share the client behind an `Arc` to issue
/// operations from several tasks.
pub struct RegisterClient<T: ModbusTransport> {
    profile: GatewayProfile,
    connection: Arc<Mutex<Connection<T>>>,
    cancel: StdMutex<CancellationToken>,
    worker: StdMutex<Option<Worker>>,
}

impl<T: ModbusTransport> fmt::Debug for RegisterClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterClient")
            .field("profile", &self.profile.kind)
            .finish_non_exhaustive()
    }
}

impl RegisterClient<TcpTransport> {
    /// Client for a Modbus TCP gateway. Connects on first use.
    pub fn tcp(host: impl Into<String>, port: u16, unit: SlaveId, profile: GatewayProfile) -> Self {
        let transport = TcpTransport::new(host, port, unit, profile.request_timeout());
        Self::new(transport, unit, profile)
    }
}

impl<T: ModbusTransport + 'static> RegisterClient<T> {
    pub fn new(transport: T, unit: SlaveId, profile: GatewayProfile) -> Self {
        Self {
            profile,
            connection: Arc::new(Mutex::new(Connection::new(transport, unit, profile))),
            cancel: StdMutex::new(CancellationToken::new()),
            worker: StdMutex::new(None),
        }
    }

    pub fn profile(&self) -> &GatewayProfile {
        &self.profile
    }

    fn current_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sender of the running worker, spawning one if needed.
    fn worker_sender(&self) -> mpsc::UnboundedSender<Job> {
        let mut slot = match self.worker.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(worker) = slot.as_ref() {
            if !worker.handle.is_finished() && !worker.sender.is_closed() {
                return worker.sender.clone();
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker_task(
            Arc::clone(&self.connection),
            receiver,
            self.current_token(),
        ));
        *slot = Some(Worker {
            sender: sender.clone(),
            handle,
        });
        sender
    }

    /// Read `count` raw registers of `class` starting at `start`.
    pub async fn read_registers(
        &self,
        class: RegisterClass,
        start: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        if self.profile.serialized_queue {
            let (responder, receiver) = oneshot::channel();
            self.worker_sender()
                .send(Job::Read {
                    class,
                    start,
                    count,
                    responder,
                })
                .map_err(|_| ModbusError::Cancelled)?;
            receiver.await.map_err(|_| ModbusError::Cancelled)?
        } else {
            let token = self.current_token();
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ModbusError::Cancelled),
                result = async {
                    let mut conn = self.connection.lock().await;
                    conn.read_span(class, start, count).await
                } => result,
            }
        }
    }

    /// Read one planned span and decode its definitions.
    pub async fn read_span(&self, span: &ReadSpan<'_>) -> ModbusResult<DecodedValueMap> {
        let words = self.read_registers(span.class, span.start, span.count).await?;

        let mut values = DecodedValueMap::new();
        for def in &span.definitions {
            match codec::decode_definition(&words, span.start, def) {
                Some(value) => {
                    values.insert(def.key, value);
                }
                None => debug!("{} not decodable from span @{}", def.key, span.start),
            }
        }
        Ok(values)
    }

    /// Read every definition, holding registers first.
    ///
    /// Failed spans only leave their keys out of the result. Transport
    /// incompatibility and cancellation abort the whole read.
    pub async fn read_register_map(
        &self,
        definitions: &[RegisterDefinition],
    ) -> ModbusResult<DecodedValueMap> {
        let spans = planner::plan_all(definitions, &self.profile);
        debug!(
            "Reading {} definitions in {} spans",
            definitions.len(),
            spans.len()
        );

        let mut values = DecodedValueMap::new();
        for span in &spans {
            match self.read_span(span).await {
                Ok(decoded) => values.extend(decoded),
                Err(e) if e.is_fatal() || matches!(e, ModbusError::Cancelled) => return Err(e),
                Err(e) => debug!(
                    "{} span @{} len={} skipped: {}",
                    span.class, span.start, span.count, e
                ),
            }
        }
        Ok(values)
    }

    /// Write a single holding register (FC06).
    pub async fn write_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        if self.profile.serialized_queue {
            let (responder, receiver) = oneshot::channel();
            self.worker_sender()
                .send(Job::Write {
                    address,
                    value,
                    responder,
                })
                .map_err(|_| ModbusError::Cancelled)?;
            receiver.await.map_err(|_| ModbusError::Cancelled)?
        } else {
            let token = self.current_token();
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ModbusError::Cancelled),
                result = async {
                    let mut conn = self.connection.lock().await;
                    conn.write_register(address, value).await
                } => result,
            }
        }
    }

    /// Write a temperature in °C to a 0.1 °C register.
    pub async fn write_temperature(&self, address: u16, celsius: f64) -> ModbusResult<()> {
        self.write_register(address, codec::temperature_to_raw(celsius))
            .await
    }

    /// Cancel pending work, close the transport and forget learned state.
    ///
    /// The next operation reconnects transparently.
    pub async fn close(&self) {
        let old_token = {
            let mut token = match self.cancel.lock() {
                Ok(token) => token,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *token, CancellationToken::new())
        };
        old_token.cancel();

        let worker = match self.worker.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(Worker { sender, mut handle }) = worker {
            drop(sender);
            if timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!("Queue worker did not stop within {:?}, aborting", CLOSE_GRACE);
                handle.abort();
            }
        }

        self.connection.lock().await.shutdown().await;
        info!("Connection closed");
    }

    pub async fn input_access(&self) -> InputAccess {
        self.connection.lock().await.input_access
    }

    pub async fn link_state(&self) -> LinkState {
        self.connection.lock().await.state
    }

    pub async fn stats(&self) -> TransportStats {
        self.connection.lock().await.transport.get_stats()
    }
}

impl<T: ModbusTransport> Drop for RegisterClient<T> {
    fn drop(&mut self) {
        if let Ok(token) = self.cancel.lock() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::Encoding;
    use crate::test_support::{GatewayHandle, SimulatedGateway};

    const UNIT: SlaveId = 1;

    fn client(profile: GatewayProfile) -> (RegisterClient<SimulatedGateway>, GatewayHandle) {
        let (gateway, handle) = SimulatedGateway::new();
        (RegisterClient::new(gateway, UNIT, profile), handle)
    }

    fn input_defs() -> Vec<RegisterDefinition> {
        vec![
            RegisterDefinition::input("outdoor_temperature", 12101).temperature(),
            RegisterDefinition::input("supply_temperature", 12102).temperature(),
            RegisterDefinition::input("supply_air_fan_pwr_fact", 14000).encoding(Encoding::Uint16),
        ]
    }

    fn seed_inputs(handle: &GatewayHandle) {
        handle.set_input(12101, (-35i16) as u16);
        handle.set_input(12102, 215);
        handle.set_input(14000, 55);
    }

    // =========================================================================
    // Function code selection
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_native_input_reads() {
        let (client, handle) = client(GatewayProfile::generic());
        seed_inputs(&handle);

        let values = client.read_register_map(&input_defs()).await.unwrap();
        assert_eq!(values["outdoor_temperature"].as_f64(), Some(-3.5));
        assert_eq!(values["supply_temperature"].as_f64(), Some(21.5));
        assert_eq!(values["supply_air_fan_pwr_fact"].as_i64(), Some(55));
        assert_eq!(handle.count(ModbusFunction::ReadInputRegisters), 2);
        assert_eq!(handle.count(ModbusFunction::ReadHoldingRegisters), 0);
        assert_eq!(client.input_access().await, InputAccess::Native);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sticky_holding_fallback() {
        let (client, handle) = client(GatewayProfile::generic());
        seed_inputs(&handle);
        handle.with(|s| s.reject_input = true);

        let first = client.read_register_map(&input_defs()).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(client.input_access().await, InputAccess::HoldingAlias);

        let second = client.read_register_map(&input_defs()).await.unwrap();
        assert_eq!(second, first);

        // One refused FC04; afterwards every input span goes straight to FC03
        assert_eq!(handle.count(ModbusFunction::ReadInputRegisters), 1);
        assert_eq!(handle.count(ModbusFunction::ReadHoldingRegisters), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fallback_abandons_span() {
        let (client, handle) = client(GatewayProfile::generic());
        seed_inputs(&handle);
        handle.fail_next(ModbusError::exception(0x04, 0x01));
        handle.fail_next(ModbusError::exception(0x03, 0x02));

        let values = client.read_register_map(&input_defs()).await.unwrap();
        assert!(!values.contains_key("outdoor_temperature"));
        assert!(!values.contains_key("supply_temperature"));
        assert_eq!(values["supply_air_fan_pwr_fact"].as_i64(), Some(55));
        assert_eq!(client.input_access().await, InputAccess::Native);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unencodable_span_is_omitted() {
        let (client, handle) = client(GatewayProfile::generic());
        seed_inputs(&handle);
        handle.set_input(65535, 9);

        let mut defs = input_defs();
        defs.push(RegisterDefinition::input("past_end", 65535).encoding(Encoding::Uint32));

        let values = client.read_register_map(&defs).await.unwrap();
        assert!(!values.contains_key("past_end"));
        assert_eq!(values.len(), 3);
        assert!(handle.requests().iter().all(|r| r.address != 65535));
        assert_eq!(client.input_access().await, InputAccess::Native);
    }

    #[tokio::test(start_paused = true)]
    async fn test_holding_only_generic_profile() {
        let profile = GatewayProfile::generic().with_input_reads(InputReadStrategy::HoldingOnly);
        let (client, handle) = client(profile);
        seed_inputs(&handle);
        handle.with(|s| s.reject_input = true);

        let values = client.read_register_map(&input_defs()).await.unwrap();
        assert_eq!(values["supply_temperature"].as_f64(), Some(21.5));
        assert_eq!(handle.count(ModbusFunction::ReadInputRegisters), 0);
        assert_eq!(handle.count(ModbusFunction::ReadHoldingRegisters), 2);
        assert_eq!(client.input_access().await, InputAccess::Native);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_profile_reads_inputs_with_fc03() {
        let (client, handle) = client(GatewayProfile::safe());
        seed_inputs(&handle);
        handle.with(|s| s.reject_input = true);

        let values = client.read_register_map(&input_defs()).await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(handle.count(ModbusFunction::ReadInputRegisters), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_forgets_learned_access() {
        let (client, handle) = client(GatewayProfile::generic());
        seed_inputs(&handle);
        handle.with(|s| s.reject_input = true);

        client.read_register_map(&input_defs()).await.unwrap();
        assert_eq!(client.input_access().await, InputAccess::HoldingAlias);

        client.close().await;
        assert_eq!(client.input_access().await, InputAccess::Native);
        assert_eq!(client.link_state().await, LinkState::Disconnected);

        client.read_register_map(&input_defs()).await.unwrap();
        assert_eq!(handle.count(ModbusFunction::ReadInputRegisters), 2);
        assert_eq!(handle.connects(), 2);
    }

    // =========================================================================
    // Timing
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_write_cooldown_before_next_read() {
        let (client, handle) = client(GatewayProfile::safe());
        handle.set_holding(2000, 200);

        client.write_temperature(2000, 21.5).await.unwrap();
        client
            .read_registers(RegisterClass::Holding, 2000, 1)
            .await
            .unwrap();

        let log = handle.timed_requests();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1.function, ModbusFunction::WriteSingleRegister);
        assert!(log[1].0 - log[0].0 >= Duration::from_millis(1200));
        assert_eq!(handle.holding(2000), Some(215));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_requests() {
        let (client, handle) = client(GatewayProfile::generic().with_pacing_ms(400));

        client.read_registers(RegisterClass::Holding, 1, 1).await.unwrap();
        client.write_register(2, 5).await.unwrap();

        let log = handle.timed_requests();
        assert!(log[1].0 - log[0].0 >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_on_first_connect_only() {
        let (client, handle) = client(GatewayProfile::safe());
        let started = Instant::now();

        client.read_registers(RegisterClass::Holding, 1, 1).await.unwrap();
        let first = handle.timed_requests()[0].0;
        assert!(first - started >= Duration::from_millis(1500));

        client.close().await;
        let reopened = Instant::now();
        client.read_registers(RegisterClass::Holding, 1, 1).await.unwrap();
        let second = handle.timed_requests()[1].0;
        assert!(second - reopened < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_request_times_out() {
        let profile = GatewayProfile::generic().with_request_timeout_ms(500);
        let (client, handle) = client(profile);
        handle.with(|s| s.stall = true);
        let started = Instant::now();

        let err = client
            .read_registers(RegisterClass::Holding, 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_millis(3000));
        assert_eq!(client.link_state().await, LinkState::Disconnected);
    }

    // =========================================================================
    // Queue ordering
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_queue_preserves_submission_order() {
        let (client, handle) = client(GatewayProfile::safe());
        handle.with(|s| s.latency = Duration::from_millis(40));

        let (a, b, c) = tokio::join!(
            client.read_registers(RegisterClass::Holding, 100, 1),
            client.write_register(200, 7),
            client.read_registers(RegisterClass::Holding, 300, 1),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let addresses: Vec<u16> = handle.requests().iter().map(|r| r.address).collect();
        assert_eq!(addresses, vec![100, 200, 300]);
    }

    // =========================================================================
    // Retry
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_with_forced_reconnect() {
        let (client, handle) = client(GatewayProfile::safe());
        handle.set_holding(10, 42);
        // Busy exceptions keep the socket, so any reconnect is a forced one
        handle.fail_next(ModbusError::exception(0x03, 0x06));
        handle.fail_next(ModbusError::exception(0x03, 0x06));

        let words = client
            .read_registers(RegisterClass::Holding, 10, 1)
            .await
            .unwrap();
        assert_eq!(words, vec![42]);

        let log = handle.timed_requests();
        assert_eq!(log.len(), 3);
        // pacing 250 + busy backoff 450, then pacing 250 + busy backoff 900
        assert!(log[1].0 - log[0].0 >= Duration::from_millis(700));
        assert!(log[2].0 - log[1].0 >= Duration::from_millis(1150));
        assert_eq!(handle.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let (client, handle) = client(GatewayProfile::safe().with_retries(1));
        handle.fail_next(ModbusError::timeout("read", 10));
        handle.fail_next(ModbusError::timeout("read", 10));

        let err = client
            .read_registers(RegisterClass::Holding, 10, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert_eq!(handle.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_write_failure_surfaces_immediately() {
        let (client, handle) = client(GatewayProfile::generic());
        handle.fail_next(ModbusError::exception(0x06, 0x04));

        let err = client.write_register(1130, 3).await.unwrap_err();
        assert!(matches!(err, ModbusError::Exception { code: 0x04, .. }));
        assert_eq!(handle.count(ModbusFunction::WriteSingleRegister), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_write_is_retried() {
        let (client, handle) = client(GatewayProfile::safe());
        handle.fail_next(ModbusError::connection("reset by peer"));

        client.write_register(1130, 3).await.unwrap();
        assert_eq!(handle.count(ModbusFunction::WriteSingleRegister), 2);
        assert_eq!(handle.holding(1130), Some(3));
    }

    // =========================================================================
    // Call shapes
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_call_shape_fallback_is_not_cached() {
        let (client, handle) = client(GatewayProfile::generic());
        handle.set_holding(5, 9);
        handle.with(|s| s.reject_explicit_unit = true);

        for _ in 0..2 {
            let words = client.read_registers(RegisterClass::Holding, 5, 1).await.unwrap();
            assert_eq!(words, vec![9]);
        }
        client.write_register(6, 1).await.unwrap();

        let shapes: Vec<_> = handle.requests().iter().map(|r| r.unit).collect();
        use crate::protocol::UnitAddressing::{Explicit, TransportDefault};
        assert_eq!(
            shapes,
            vec![
                Explicit(UNIT),
                TransportDefault,
                Explicit(UNIT),
                TransportDefault,
                Explicit(UNIT),
                TransportDefault
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_call_shapes_are_fatal() {
        let (client, handle) = client(GatewayProfile::generic());
        handle.with(|s| {
            s.reject_explicit_unit = true;
            s.reject_default_unit = true;
        });

        let err = client.read_register_map(&input_defs()).await.unwrap_err();
        assert!(matches!(
            err,
            ModbusError::UnsupportedTransport { operation: "read" }
        ));

        let err = client.write_register(1, 1).await.unwrap_err();
        assert!(matches!(
            err,
            ModbusError::UnsupportedTransport { operation: "write" }
        ));
    }

    // =========================================================================
    // Close / cancellation
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_queued_operations() {
        let (client, handle) = client(GatewayProfile::safe());
        handle.with(|s| s.stall = true);
        let client = Arc::new(client);

        let in_flight = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.read_registers(RegisterClass::Holding, 1, 1).await }
        });
        let queued = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.write_register(2, 2).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        client.close().await;
        assert!(matches!(
            in_flight.await.unwrap(),
            Err(ModbusError::Cancelled)
        ));
        assert!(matches!(queued.await.unwrap(), Err(ModbusError::Cancelled)));

        // Next operation reconnects transparently
        handle.with(|s| s.stall = false);
        client.read_registers(RegisterClass::Holding, 1, 1).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_generic_operation() {
        let (client, handle) = client(GatewayProfile::generic());
        handle.with(|s| s.stall = true);
        let client = Arc::new(client);

        let in_flight = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.read_registers(RegisterClass::Holding, 1, 1).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        client.close().await;
        assert!(matches!(
            in_flight.await.unwrap(),
            Err(ModbusError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_fault_drops_link_and_recovers() {
        let (client, handle) = client(GatewayProfile::generic());
        handle.set_holding(1, 11);
        handle.fail_next(ModbusError::connection("broken pipe"));

        assert!(client.read_registers(RegisterClass::Holding, 1, 1).await.is_err());
        assert_eq!(client.link_state().await, LinkState::Disconnected);

        let words = client.read_registers(RegisterClass::Holding, 1, 1).await.unwrap();
        assert_eq!(words, vec![11]);
        assert_eq!(client.link_state().await, LinkState::Ready);
        assert_eq!(handle.connects(), 2);
    }
}
