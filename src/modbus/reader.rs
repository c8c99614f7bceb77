//! Modbus address parsing and value decoding

use crate::registry::{DataType, Value};

/// Modbus data table an address points into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Holding,
    Input,
    Coil,
    Discrete,
}

/// Parsed form of an address string such as `HR100` or `%DI7`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub table: Table,
    pub offset: u16,
}

/// Parse `HR<n>`, `IR<n>`, `C<n>` or `DI<n>` (optional leading `%`, any case)
pub fn parse_address(address: &str) -> Result<Location, String> {
    let normalized = address.trim().trim_start_matches('%').to_uppercase();

    let (table, digits) = if let Some(rest) = normalized.strip_prefix("HR") {
        (Table::Holding, rest)
    } else if let Some(rest) = normalized.strip_prefix("IR") {
        (Table::Input, rest)
    } else if let Some(rest) = normalized.strip_prefix("DI") {
        (Table::Discrete, rest)
    } else if let Some(rest) = normalized.strip_prefix('C') {
        (Table::Coil, rest)
    } else {
        return Err(format!("unrecognized Modbus address '{}'", address));
    };

    let offset = digits
        .parse::<u16>()
        .map_err(|_| format!("invalid register offset in '{}'", address))?;

    Ok(Location { table, offset })
}

/// Number of 16-bit registers a value of this type occupies
pub fn register_count(data_type: DataType) -> u16 {
    match data_type {
        DataType::Bool | DataType::Byte | DataType::Int => 1,
        DataType::DInt | DataType::Real => 2,
    }
}

/// Convert raw register words to a typed value (big-endian word order)
pub fn decode_registers(raw: &[u16], data_type: DataType) -> Option<Value> {
    let word = |i: usize| raw.get(i).copied();
    let dword = || Some((u32::from(word(0)?) << 16) | u32::from(word(1)?));

    let value = match data_type {
        DataType::Bool => Value::Bool(word(0)? != 0),
        DataType::Byte => Value::Byte((word(0)? & 0x00FF) as u8),
        DataType::Int => Value::Int(i32::from(word(0)? as i16)),
        DataType::DInt => Value::DInt(i64::from(dword()? as i32)),
        DataType::Real => Value::Real(f64::from(f32::from_bits(dword()?))),
    };

    Some(value)
}

/// Convert coil/discrete bits to a typed value; only BOOL is meaningful there
pub fn decode_bits(bits: &[bool], data_type: DataType) -> Option<Value> {
    match data_type {
        DataType::Bool => bits.first().copied().map(Value::Bool),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            parse_address("HR100").unwrap(),
            Location {
                table: Table::Holding,
                offset: 100
            }
        );
        assert_eq!(parse_address("%ir5").unwrap().table, Table::Input);
        assert_eq!(parse_address("c3").unwrap().table, Table::Coil);
        assert_eq!(
            parse_address("DI65535").unwrap(),
            Location {
                table: Table::Discrete,
                offset: 65535
            }
        );
    }

    #[test]
    fn test_parse_rejects_foreign_syntax() {
        assert!(parse_address("%DB2.DBW0:INT").is_err());
        assert!(parse_address("HR").is_err());
        assert!(parse_address("HR70000").is_err());
        assert!(parse_address("XYZ1").is_err());
    }

    #[test]
    fn test_register_count() {
        assert_eq!(register_count(DataType::Int), 1);
        assert_eq!(register_count(DataType::Real), 2);
        assert_eq!(register_count(DataType::DInt), 2);
    }

    #[test]
    fn test_decode_int() {
        assert_eq!(decode_registers(&[0], DataType::Int), Some(Value::Int(0)));
        assert_eq!(decode_registers(&[100], DataType::Int), Some(Value::Int(100)));
        // 65535 as i16 = -1
        assert_eq!(decode_registers(&[65535], DataType::Int), Some(Value::Int(-1)));
        // 65436 as i16 = -100
        assert_eq!(
            decode_registers(&[65436], DataType::Int),
            Some(Value::Int(-100))
        );
    }

    #[test]
    fn test_decode_byte_and_bool() {
        assert_eq!(
            decode_registers(&[0x12AB], DataType::Byte),
            Some(Value::Byte(0xAB))
        );
        assert_eq!(decode_registers(&[0], DataType::Bool), Some(Value::Bool(false)));
        assert_eq!(
            decode_registers(&[100], DataType::Bool),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn test_decode_dint() {
        assert_eq!(decode_registers(&[0, 1], DataType::DInt), Some(Value::DInt(1)));
        assert_eq!(
            decode_registers(&[1, 0], DataType::DInt),
            Some(Value::DInt(65536))
        );
        // -1 (0xFFFFFFFF)
        assert_eq!(
            decode_registers(&[65535, 65535], DataType::DInt),
            Some(Value::DInt(-1))
        );

        let neg100: i32 = -100;
        let high = ((neg100 as u32) >> 16) as u16;
        let low = (neg100 as u32) as u16;
        assert_eq!(
            decode_registers(&[high, low], DataType::DInt),
            Some(Value::DInt(-100))
        );
    }

    #[test]
    fn test_decode_real() {
        let bits: u32 = (-42.5_f32).to_bits();
        let high = (bits >> 16) as u16;
        let low = bits as u16;

        match decode_registers(&[high, low], DataType::Real) {
            Some(Value::Real(v)) => assert!((v - (-42.5)).abs() < 0.0001),
            other => panic!("unexpected {:?}", other),
        }

        let pi_bits: u32 = std::f32::consts::PI.to_bits();
        match decode_registers(&[(pi_bits >> 16) as u16, pi_bits as u16], DataType::Real) {
            Some(Value::Real(v)) => assert!((v - std::f64::consts::PI).abs() < 0.0001),
            other => panic!("unexpected {:?}", other),
        }

        // uninitialised memory decodes to NaN and still reaches the registry
        match decode_registers(&[0xFFFF, 0xFFFF], DataType::Real) {
            Some(Value::Real(v)) => assert!(v.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_short_responses() {
        assert_eq!(decode_registers(&[], DataType::Int), None);
        assert_eq!(decode_registers(&[1], DataType::DInt), None); // Not enough values
        assert_eq!(decode_registers(&[1], DataType::Real), None);
        assert_eq!(decode_bits(&[], DataType::Bool), None);
    }

    #[test]
    fn test_decode_bits() {
        assert_eq!(decode_bits(&[true], DataType::Bool), Some(Value::Bool(true)));
        assert_eq!(decode_bits(&[true], DataType::Int), None);
    }
}
