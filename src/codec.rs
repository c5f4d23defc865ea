//! # Register Codec
//!
//! Pure conversions between raw register words and engineering values, plus
//! PDU build/parse helpers for the three supported function codes.
//!
//! ## Encodings
//!
//! | Encoding | Registers | Word order |
//! |----------|-----------|------------|
//! | int16 | 1 | two's complement over the low 16 bits |
//! | uint16 | 1 | - |
//! | uint32 | 2 | low word first, then high word |

use crate::constants::{FC_WRITE_SINGLE_REGISTER, MAX_READ_REGISTERS};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::protocol::ModbusFunction;
use crate::register_map::{Encoding, RegisterDefinition};
use crate::value::Value;

// ============================================================================
// Decoding Functions
// ============================================================================

/// Decode the raw integer at `index` of `words`.
///
/// Returns `None` when the encoding needs words beyond the end of the buffer,
/// so a short response never produces a partial value.
///
/// ```rust
/// use systemair_modbus::{codec, Encoding};
///
/// assert_eq!(codec::decode(&[0xFFFF], 0, Encoding::Int16), Some(-1));
/// assert_eq!(codec::decode(&[0x0001, 0x0002], 0, Encoding::Uint32), Some(0x0002_0001));
/// assert_eq!(codec::decode(&[0x0001], 0, Encoding::Uint32), None);
/// ```
pub fn decode(words: &[u16], index: usize, encoding: Encoding) -> Option<i64> {
    match encoding {
        Encoding::Int16 => words.get(index).map(|&w| i64::from(w as i16)),
        Encoding::Uint16 => words.get(index).map(|&w| i64::from(w)),
        Encoding::Uint32 => {
            let lo = *words.get(index)?;
            let hi = *words.get(index.checked_add(1)?)?;
            Some(i64::from((u32::from(hi) << 16) | u32::from(lo)))
        }
    }
}

/// Apply scale, offset and optional rounding to a raw value.
///
/// Unscaled values without a precision stay [`Value::Int`].
pub fn to_engineering(raw: i64, scale: f64, offset: f64, precision: Option<u8>) -> Value {
    if scale == 1.0 && offset == 0.0 && precision.is_none() {
        return Value::Int(raw);
    }

    let value = raw as f64 * scale + offset;
    match precision {
        Some(digits) => Value::Float(round_to(value, digits)),
        None => Value::Float(value),
    }
}

/// Round to `digits` decimal places, halves to even.
#[inline]
pub fn round_to(value: f64, digits: u8) -> f64 {
    let factor = 10f64.powi(i32::from(digits));
    (value * factor).round_ties_even() / factor
}

/// Decode one definition out of a span read starting at `span_start`.
pub fn decode_definition(
    words: &[u16],
    span_start: u16,
    definition: &RegisterDefinition,
) -> Option<Value> {
    let index = usize::from(definition.address.checked_sub(span_start)?);
    let raw = decode(words, index, definition.encoding)?;
    Some(to_engineering(
        raw,
        definition.scale,
        definition.offset,
        definition.precision,
    ))
}

// ============================================================================
// Encoding Functions
// ============================================================================

/// Convert a temperature in °C to the 0.1 °C register representation.
///
/// Ties round to even and the result is clamped to `0..=u16::MAX`; negative
/// setpoints write 0.
///
/// ```rust
/// use systemair_modbus::codec::temperature_to_raw;
///
/// assert_eq!(temperature_to_raw(21.5), 215);
/// assert_eq!(temperature_to_raw(-5.0), 0);
/// ```
pub fn temperature_to_raw(celsius: f64) -> u16 {
    let scaled = (celsius * 10.0).round_ties_even();
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, f64::from(u16::MAX)) as u16
}

// ============================================================================
// PDU Building Functions
// ============================================================================

/// Build an FC03/FC04 request PDU.
pub fn build_read_pdu(function: ModbusFunction, address: u16, count: u16) -> ModbusResult<ModbusPdu> {
    if !function.is_read() {
        return Err(ModbusError::invalid_data(format!(
            "{} is not a read function",
            function
        )));
    }
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(ModbusError::invalid_data(format!(
            "Invalid register count {} (1-{})",
            count, MAX_READ_REGISTERS
        )));
    }
    if u32::from(address) + u32::from(count) > 0x1_0000 {
        return Err(ModbusError::invalid_data(format!(
            "Read of {} registers at {} exceeds the address space",
            count, address
        )));
    }

    Ok(PduBuilder::new()
        .function_code(function.to_u8())?
        .address(address)?
        .word(count)?
        .build())
}

/// Build an FC06 (Write Single Register) request PDU.
pub fn build_fc06_pdu(address: u16, value: u16) -> ModbusResult<ModbusPdu> {
    Ok(PduBuilder::new()
        .function_code(FC_WRITE_SINGLE_REGISTER)?
        .address(address)?
        .word(value)?
        .build())
}

// ============================================================================
// PDU Parsing Functions
// ============================================================================

/// Extract register words from an FC03/FC04 response body (the PDU after
/// the function code).
///
/// Degrades gracefully: a byte count larger than the payload yields only the
/// complete words present, and surplus words beyond `expected` are dropped.
/// Callers decode with [`decode`], which rejects indexes past the end.
pub fn parse_read_response(
    body: &[u8],
    function: ModbusFunction,
    expected: u16,
) -> ModbusResult<Vec<u16>> {
    if !function.is_read() {
        return Err(ModbusError::protocol(format!(
            "Expected a read response, got {}",
            function
        )));
    }

    let Some((&byte_count, payload)) = body.split_first() else {
        return Ok(Vec::new());
    };

    let usable = usize::from(byte_count).min(payload.len());
    let registers = payload[..usable]
        .chunks_exact(2)
        .take(usize::from(expected))
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    Ok(registers)
}

/// Check an FC06 response body against the written address and value.
pub fn parse_write_response(body: &[u8], address: u16, value: u16) -> ModbusResult<()> {
    if body.len() < 4 {
        return Err(ModbusError::protocol(format!(
            "Write echo too short: {} bytes",
            body.len()
        )));
    }

    let echoed_address = u16::from_be_bytes([body[0], body[1]]);
    let echoed_value = u16::from_be_bytes([body[2], body[3]]);
    if echoed_address != address || echoed_value != value {
        return Err(ModbusError::protocol(format!(
            "Write echo mismatch: sent {}={}, got {}={}",
            address, value, echoed_address, echoed_value
        )));
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::RegisterClass;

    #[test]
    fn test_decode_int16_negative() {
        assert_eq!(decode(&[0xFFFF], 0, Encoding::Int16), Some(-1));
        assert_eq!(decode(&[0x8000], 0, Encoding::Int16), Some(-32768));
        assert_eq!(decode(&[0x00D7], 0, Encoding::Int16), Some(215));
    }

    #[test]
    fn test_decode_uint16() {
        assert_eq!(decode(&[0xFFFF], 0, Encoding::Uint16), Some(65535));
    }

    #[test]
    fn test_decode_uint32_low_word_first() {
        assert_eq!(
            decode(&[0x0001, 0x0002], 0, Encoding::Uint32),
            Some(0x0002_0001)
        );
        // 2,000,000 s = 0x001E_8480
        assert_eq!(
            decode(&[0x0000, 0x8480, 0x001E], 1, Encoding::Uint32),
            Some(2_000_000)
        );
    }

    #[test]
    fn test_decode_out_of_range() {
        assert_eq!(decode(&[], 0, Encoding::Int16), None);
        assert_eq!(decode(&[0x0001], 0, Encoding::Uint32), None);
        assert_eq!(decode(&[0x0001, 0x0002], 5, Encoding::Uint16), None);
    }

    #[test]
    fn test_to_engineering() {
        assert_eq!(to_engineering(215, 1.0, 0.0, None), Value::Int(215));
        assert_eq!(to_engineering(215, 0.1, 0.0, Some(1)), Value::Float(21.5));
        assert_eq!(to_engineering(-35, 0.1, 0.0, Some(1)), Value::Float(-3.5));
        assert_eq!(to_engineering(10, 1.0, 0.5, None), Value::Float(10.5));
    }

    #[test]
    fn test_round_to_halves_to_even() {
        assert_eq!(round_to(0.25, 1), 0.2);
        assert_eq!(round_to(-0.25, 1), -0.2);
        assert_eq!(round_to(0.75, 1), 0.8);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
    }

    #[test]
    fn test_decode_definition_applies_offset() {
        let def = RegisterDefinition::holding("heater_output", 300)
            .scaled(0.5, 1)
            .offset(-40.0);
        assert_eq!(decode_definition(&[100], 300, &def), Some(Value::Float(10.0)));
        assert_eq!(decode_definition(&[0], 300, &def), Some(Value::Float(-40.0)));
    }

    #[test]
    fn test_temperature_to_raw() {
        assert_eq!(temperature_to_raw(21.5), 215);
        assert_eq!(temperature_to_raw(-5.0), 0);
        assert_eq!(temperature_to_raw(18.04), 180);
        assert_eq!(temperature_to_raw(1e9), u16::MAX);
        assert_eq!(temperature_to_raw(f64::NAN), 0);
    }

    #[test]
    fn test_decode_definition_offsets_into_span() {
        let def = RegisterDefinition::new("supply_air_temperature", 12102, RegisterClass::Input)
            .encoding(Encoding::Int16)
            .scaled(0.1, 1);
        let words = [0x0000, 0x00D7];
        assert_eq!(
            decode_definition(&words, 12101, &def),
            Some(Value::Float(21.5))
        );
        assert_eq!(decode_definition(&words, 12103, &def), None);
    }

    #[test]
    fn test_build_read_pdu() {
        let pdu = build_read_pdu(ModbusFunction::ReadHoldingRegisters, 0x006B, 3).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);

        assert!(build_read_pdu(ModbusFunction::ReadInputRegisters, 0, 0).is_err());
        assert!(build_read_pdu(ModbusFunction::ReadInputRegisters, 0, 126).is_err());
        assert!(build_read_pdu(ModbusFunction::WriteSingleRegister, 0, 1).is_err());
        assert!(build_read_pdu(ModbusFunction::ReadHoldingRegisters, 0xFFFF, 2).is_err());
    }

    #[test]
    fn test_build_fc06_pdu() {
        let pdu = build_fc06_pdu(0x0100, 0x1234).unwrap();
        assert_eq!(pdu.as_slice(), &[0x06, 0x01, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn test_parse_read_response_degrades() {
        let f = ModbusFunction::ReadInputRegisters;
        assert_eq!(
            parse_read_response(&[0x04, 0x00, 0x01, 0x00, 0x02], f, 2).unwrap(),
            vec![1, 2]
        );
        // byte count claims 4, only 3 bytes arrived
        assert_eq!(
            parse_read_response(&[0x04, 0x00, 0x01, 0x00], f, 2).unwrap(),
            vec![1]
        );
        assert!(parse_read_response(&[], f, 2).unwrap().is_empty());
        assert!(parse_read_response(&[0x02, 0x00, 0x01], ModbusFunction::WriteSingleRegister, 1)
            .is_err());
    }

    #[test]
    fn test_parse_write_response() {
        assert!(parse_write_response(&[0x07, 0xD0, 0x00, 0xD7], 2000, 215).is_ok());
        assert!(parse_write_response(&[0x07, 0xD0, 0x00, 0xD8], 2000, 215).is_err());
        assert!(parse_write_response(&[0x07, 0xD0], 2000, 215).is_err());
    }
}
