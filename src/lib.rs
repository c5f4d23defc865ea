//! # Systemair Modbus - Fault-Tolerant Ventilation Unit Polling
//!
//! A register-map-driven Modbus TCP polling client for Systemair ventilation
//! units (SAVE and legacy CD4 panels), built to cope with the many gateways
//! sitting in front of them.
//!
//! ## Features
//!
//! - **Span Planning**: register definitions merged into as few reads as the gateway allows
//! - **Function Code Detection**: FC04 with a sticky, one-time fallback to FC03
//! - **Gateway Profiles**: `generic` for full implementations, `safe` for SAVE Connect
//! - **Retry & Backoff**: exponential backoff, busy-aware, with forced reconnect
//! - **Serialized I/O**: FIFO queue worker with post-write cooldown
//! - **Derived Values**: filter status, mode texts, flow and exhaust estimates
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Use |
//! |------|----------|-----|
//! | 0x03 | Read Holding Registers | holding class, input alias |
//! | 0x04 | Read Input Registers | input class |
//! | 0x06 | Write Single Register | setpoints and commands |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use systemair_modbus::{DeviceModel, GatewayProfile, ModbusResult, VentilationUnit};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let unit = VentilationUnit::connect_tcp(
//!         "192.168.1.50",
//!         502,
//!         1,
//!         GatewayProfile::safe(),
//!         DeviceModel::Save,
//!         Some(368),
//!     );
//!
//!     unit.probe().await?;
//!     let values = unit.poll().await?;
//!     println!("{:?}", values.get("next_filter_change_status"));
//!
//!     unit.close().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// Stack-allocated PDU buffer
pub mod pdu;

/// Function codes, requests, responses and call shapes
pub mod protocol;

/// Network transport layer for Modbus TCP
pub mod transport;

/// Fault-tolerant register client
pub mod client;

// ============================================================================
// Register model and decoding
// ============================================================================

/// Decoded value types
pub mod value;

/// Register definitions and device models
pub mod register_map;

/// Register tables per device model
pub mod models;

/// Raw word decoding and PDU helpers
pub mod codec;

/// Gateway timing and batching profiles
pub mod profile;

/// Read span planning
pub mod planner;

/// Values derived from decoded registers
pub mod derived;

// ============================================================================
// Host integration
// ============================================================================

/// One configured ventilation unit
pub mod device;

/// Unit configuration (TOML + environment)
pub mod config;

/// Subscriber setup for the poller binary
#[cfg(feature = "cli")]
pub mod logging;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Client API ===
pub use client::{InputAccess, LinkState, RegisterClient};
pub use device::VentilationUnit;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, UnitAddressing};
pub use register_map::{DeviceModel, Encoding, RegisterClass, RegisterDefinition, RegisterMap};
pub use value::{DecodedValueMap, Value};

// === Profiles and planning ===
pub use planner::ReadSpan;
pub use profile::{GatewayProfile, InputReadStrategy, ProfileKind};

// === Configuration ===
pub use config::{ConfigError, UnitConfig};

// === Transport ===
pub use transport::{ModbusTransport, TcpTransport, TransportStats};

// === Protocol limits ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_REGISTERS};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default Modbus unit (slave) id
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
