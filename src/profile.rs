//! # Gateway Profiles
//!
//! Timing, batching and strictness parameters for one connection. Gateways
//! differ widely: serial bridges like the EW11 accept large FC04 reads back
//! to back, while SAVE Connect only serves two registers per request, needs
//! quiet time after a write and exposes input registers through FC03.
//!
//! | parameter            | generic     | safe           |
//! |----------------------|-------------|----------------|
//! | max span             | 125         | 2              |
//! | gap bridging         | ≤1 register | strict         |
//! | input reads          | FC04 first  | FC03 only      |
//! | serialized queue     | no (mutex)  | yes (worker)   |
//! | pacing / msg wait    | 20 ms       | 250 ms         |
//! | retries              | 0           | 3              |
//! | backoff base         | 200 ms      | 300 ms         |
//! | retry writes         | no          | yes            |
//! | settle after connect | 0           | 1500 ms        |
//! | post-write cooldown  | 0           | 1200 ms        |
//! | request timeout      | 3 s         | 5 s            |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_READ_REGISTERS, MIN_SPAN_REGISTERS};
use crate::error::ModbusError;

/// Upper bound of a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Extra weight of a busy / gateway-target exception in backoff.
const BUSY_BACKOFF_FACTOR: f64 = 1.5;

/// Named profile preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    #[default]
    Generic,
    #[serde(alias = "save_connect")]
    Safe,
}

impl ProfileKind {
    pub fn profile(self) -> GatewayProfile {
        match self {
            Self::Generic => GatewayProfile::generic(),
            Self::Safe => GatewayProfile::safe(),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Safe => write!(f, "safe"),
        }
    }
}

impl FromStr for ProfileKind {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "safe" | "save_connect" => Ok(Self::Safe),
            other => Err(ModbusError::configuration(format!(
                "Unknown gateway profile '{}'",
                other
            ))),
        }
    }
}

/// How input-class registers are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputReadStrategy {
    /// FC04, falling back to FC03 once if the gateway refuses it.
    NativeFirst,
    /// Always FC03.
    HoldingOnly,
}

/// Per-connection gateway behavior.
///
/// ```rust
/// use systemair_modbus::GatewayProfile;
///
/// let profile = GatewayProfile::safe().with_retries(1);
/// assert_eq!(profile.max_span, 2);
/// assert_eq!(profile.retries, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayProfile {
    pub kind: ProfileKind,
    /// Maximum registers per read request.
    pub max_span: u16,
    /// Merge definitions separated by a single unused register.
    pub bridge_gaps: bool,
    pub input_reads: InputReadStrategy,
    /// Serialize all I/O through a FIFO worker instead of a mutex.
    pub serialized_queue: bool,
    /// Wait after every operation (milliseconds).
    pub pacing_ms: u64,
    /// Additional attempts after a failed operation.
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub retry_writes: bool,
    /// Delay after the first successful connect (milliseconds).
    pub settle_ms: u64,
    /// Minimum quiet time between a write and the next read (milliseconds).
    pub write_cooldown_ms: u64,
    pub request_timeout_ms: u64,
}

impl GatewayProfile {
    /// Fast profile for gateways that implement the protocol fully.
    pub const fn generic() -> Self {
        Self {
            kind: ProfileKind::Generic,
            max_span: MAX_READ_REGISTERS,
            bridge_gaps: true,
            input_reads: InputReadStrategy::NativeFirst,
            serialized_queue: false,
            pacing_ms: 20,
            retries: 0,
            backoff_base_ms: 200,
            retry_writes: false,
            settle_ms: 0,
            write_cooldown_ms: 0,
            request_timeout_ms: 3000,
        }
    }

    /// Conservative profile for SAVE Connect style gateways.
    pub const fn safe() -> Self {
        Self {
            kind: ProfileKind::Safe,
            max_span: MIN_SPAN_REGISTERS,
            bridge_gaps: false,
            input_reads: InputReadStrategy::HoldingOnly,
            serialized_queue: true,
            pacing_ms: 250,
            retries: 3,
            backoff_base_ms: 300,
            retry_writes: true,
            settle_ms: 1500,
            write_cooldown_ms: 1200,
            request_timeout_ms: 5000,
        }
    }

    pub fn with_max_span(mut self, max_span: u16) -> Self {
        self.max_span = max_span;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_pacing_ms(mut self, pacing_ms: u64) -> Self {
        self.pacing_ms = pacing_ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_input_reads(mut self, strategy: InputReadStrategy) -> Self {
        self.input_reads = strategy;
        self
    }

    /// Effective span limit: never below two so a 32-bit value fits.
    #[inline]
    pub fn span_limit(&self) -> u16 {
        self.max_span.clamp(MIN_SPAN_REGISTERS, MAX_READ_REGISTERS)
    }

    #[inline]
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    #[inline]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    #[inline]
    pub fn write_cooldown(&self) -> Duration {
        Duration::from_millis(self.write_cooldown_ms)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Number of attempts for an operation, including the first.
    pub fn attempts(&self, is_write: bool) -> u32 {
        if is_write && !self.retry_writes {
            1
        } else {
            self.retries + 1
        }
    }

    /// Sleep before retry number `attempt` (0-based):
    /// `min(base * 2^attempt * (1.5 if busy), 5 s)`.
    pub fn backoff_delay(&self, attempt: u32, busy: bool) -> Duration {
        let factor = if busy { BUSY_BACKOFF_FACTOR } else { 1.0 };
        let exp = 2f64.powi(attempt.min(30) as i32);
        let millis = self.backoff_base_ms as f64 * exp * factor;
        Duration::from_millis(millis as u64).min(MAX_BACKOFF)
    }
}

impl Default for GatewayProfile {
    fn default() -> Self {
        Self::generic()
    }
}
