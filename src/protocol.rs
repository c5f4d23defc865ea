//! Modbus application-layer request/response types.
//!
//! The client speaks exactly three function codes. A request carries the
//! unit addressing *shape* it is sent with; see [`call_shapes`] for how the
//! client walks the supported shapes when a transport refuses one.

use std::fmt;

use crate::codec;
use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_SINGLE_REGISTER,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// Modbus unit (slave) identifier
pub type SlaveId = u8;

/// Function codes used by the polling client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    /// FC03
    ReadHoldingRegisters,
    /// FC04
    ReadInputRegisters,
    /// FC06
    WriteSingleRegister,
}

impl ModbusFunction {
    #[inline]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
        }
    }

    /// Parse a function code, ignoring the exception flag.
    pub fn from_u8(code: u8) -> ModbusResult<Self> {
        match code & !EXCEPTION_FLAG {
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            other => Err(ModbusError::protocol(format!(
                "Unsupported function code 0x{:02X}",
                other
            ))),
        }
    }

    #[inline]
    pub fn is_read(self) -> bool {
        !matches!(self, Self::WriteSingleRegister)
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadHoldingRegisters => write!(f, "FC03"),
            Self::ReadInputRegisters => write!(f, "FC04"),
            Self::WriteSingleRegister => write!(f, "FC06"),
        }
    }
}

/// How the unit id is conveyed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAddressing {
    /// The unit id travels with each request.
    Explicit(SlaveId),
    /// The transport addresses the unit it was configured with.
    TransportDefault,
}

impl fmt::Display for UnitAddressing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(unit) => write!(f, "explicit(unit={})", unit),
            Self::TransportDefault => write!(f, "transport-default"),
        }
    }
}

/// Number of call shapes tried per operation.
pub const CALL_SHAPE_COUNT: usize = 2;

/// Ordered call shapes for `unit`.
///
/// Operations try these front to back. A transport answering
/// [`ModbusError::ShapeRejected`] moves the call to the next entry; running
/// out of entries is [`ModbusError::UnsupportedTransport`]. The shape is
/// resolved on every call and never remembered.
#[inline]
pub const fn call_shapes(unit: SlaveId) -> [UnitAddressing; CALL_SHAPE_COUNT] {
    [UnitAddressing::Explicit(unit), UnitAddressing::TransportDefault]
}

/// A single Modbus request.
///
/// For [`ModbusFunction::WriteSingleRegister`] `value` holds the register
/// value; for reads it is the register count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub unit: UnitAddressing,
    pub function: ModbusFunction,
    pub address: u16,
    pub value: u16,
}

impl ModbusRequest {
    pub fn read(unit: UnitAddressing, function: ModbusFunction, address: u16, count: u16) -> Self {
        Self {
            unit,
            function,
            address,
            value: count,
        }
    }

    pub fn write_single(unit: UnitAddressing, address: u16, value: u16) -> Self {
        Self {
            unit,
            function: ModbusFunction::WriteSingleRegister,
            address,
            value,
        }
    }

    /// Encode the request PDU (function code onwards).
    pub fn to_pdu(&self) -> ModbusResult<ModbusPdu> {
        match self.function {
            ModbusFunction::WriteSingleRegister => codec::build_fc06_pdu(self.address, self.value),
            read => codec::build_read_pdu(read, self.address, self.value),
        }
    }
}

/// A decoded, non-exception Modbus response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub unit: SlaveId,
    pub function: ModbusFunction,
    data: Vec<u8>,
}

impl ModbusResponse {
    /// `data` is the PDU after the function code.
    pub fn new(unit: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            unit,
            function,
            data,
        }
    }

    /// Build a response from a raw PDU, mapping exception PDUs to
    /// [`ModbusError::Exception`].
    pub fn from_pdu(unit: SlaveId, pdu: &[u8]) -> ModbusResult<Self> {
        let pdu = ModbusPdu::from_slice(pdu)?;
        let fc = pdu
            .function_code()
            .ok_or_else(|| ModbusError::frame("Empty response PDU"))?;

        if pdu.is_exception() {
            let code = pdu.exception_code().unwrap_or(0);
            return Err(ModbusError::exception(fc & !EXCEPTION_FLAG, code));
        }

        Ok(Self::new(
            unit,
            ModbusFunction::from_u8(fc)?,
            pdu.as_slice()[1..].to_vec(),
        ))
    }

    /// Register words of an FC03/FC04 response, degraded to the complete
    /// words actually present.
    pub fn parse_registers(&self, expected: u16) -> ModbusResult<Vec<u16>> {
        codec::parse_read_response(&self.data, self.function, expected)
    }

    /// Validate an FC06 echo against the request.
    pub fn check_write_echo(&self, address: u16, value: u16) -> ModbusResult<()> {
        codec::parse_write_response(&self.data, address, value)
    }
}
