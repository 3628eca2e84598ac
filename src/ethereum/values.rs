//! JSON <-> ABI value coercion for callers that only have loosely typed
//! input (config files, scripts) and for rendering decoded records.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, B256, I256, U256},
};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{BindError, Result};

/// Coerce a JSON array (positional) or object (by parameter name) into the
/// argument list of a function.
pub fn json_to_args(
    function: &str,
    types: &[DynSolType],
    names: &[String],
    params: &Value,
) -> Result<Vec<DynSolValue>> {
    match params {
        Value::Array(items) => {
            if items.len() != types.len() {
                return Err(BindError::Encoding(format!(
                    "'{}' expects {} parameters, got {}",
                    function,
                    types.len(),
                    items.len()
                )));
            }
            items
                .iter()
                .zip(types)
                .enumerate()
                .map(|(i, (item, ty))| {
                    json_to_value(item, ty).map_err(|e| {
                        BindError::Encoding(format!("'{}' parameter #{}: {}", function, i, e))
                    })
                })
                .collect()
        }
        Value::Object(object) => types
            .iter()
            .zip(names)
            .map(|(ty, name)| {
                let item = object.get(name).ok_or_else(|| {
                    BindError::Encoding(format!(
                        "'{}' is missing parameter '{}' of type {}",
                        function, name, ty
                    ))
                })?;
                json_to_value(item, ty).map_err(|e| {
                    BindError::Encoding(format!("'{}' parameter '{}': {}", function, name, e))
                })
            })
            .collect(),
        Value::Null if types.is_empty() => Ok(Vec::new()),
        other => Err(BindError::Encoding(format!(
            "'{}' parameters must be an array or an object, got {}",
            function, other
        ))),
    }
}

/// Convert a JSON value to a `DynSolValue` of the given type.
pub fn json_to_value(value: &Value, ty: &DynSolType) -> Result<DynSolValue> {
    match ty {
        DynSolType::Address => {
            let s = value
                .as_str()
                .ok_or_else(|| encoding("address must be a string"))?;
            let address = Address::from_str(s.trim())
                .map_err(|e| encoding(&format!("invalid address '{}': {}", s, e)))?;
            Ok(DynSolValue::Address(address))
        }
        DynSolType::Uint(bits) => {
            let num = match value {
                Value::Number(n) => n
                    .as_u64()
                    .map(U256::from)
                    .ok_or_else(|| encoding(&format!("invalid uint value {}", n)))?,
                Value::String(s) => parse_uint(s)?,
                _ => return Err(encoding("uint must be a number or string")),
            };
            if *bits < 256 && num.bit_len() > *bits {
                return Err(encoding(&format!("{} does not fit uint{}", num, bits)));
            }
            Ok(DynSolValue::Uint(num, *bits))
        }
        DynSolType::Int(bits) => {
            let num = match value {
                Value::Number(n) => {
                    let raw = n
                        .as_i64()
                        .ok_or_else(|| encoding(&format!("invalid int value {}", n)))?;
                    I256::from_dec_str(&raw.to_string())
                        .map_err(|e| encoding(&e.to_string()))?
                }
                Value::String(s) => I256::from_dec_str(s.trim())
                    .map_err(|_| encoding(&format!("invalid int string: {}", s)))?,
                _ => return Err(encoding("int must be a number or string")),
            };
            Ok(DynSolValue::Int(num, *bits))
        }
        DynSolType::Bool => value
            .as_bool()
            .map(DynSolValue::Bool)
            .ok_or_else(|| encoding("bool parameter must be a boolean")),
        DynSolType::String => value
            .as_str()
            .map(|s| DynSolValue::String(s.to_string()))
            .ok_or_else(|| encoding("string parameter must be a string")),
        DynSolType::FixedBytes(size) => {
            let bytes = parse_hex(value)?;
            if bytes.len() != *size {
                return Err(encoding(&format!(
                    "bytes{} needs exactly {} bytes, got {}",
                    size,
                    size,
                    bytes.len()
                )));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(B256::from(word), *size))
        }
        DynSolType::Bytes => Ok(DynSolValue::Bytes(parse_hex(value)?)),
        DynSolType::Array(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| encoding("array parameter must be an array"))?;
            let values = items
                .iter()
                .map(|item| json_to_value(item, inner))
                .collect::<Result<Vec<_>>>()?;
            Ok(DynSolValue::Array(values))
        }
        DynSolType::FixedArray(inner, len) => {
            let items = value
                .as_array()
                .ok_or_else(|| encoding("array parameter must be an array"))?;
            if items.len() != *len {
                return Err(encoding(&format!(
                    "fixed array needs {} elements, got {}",
                    len,
                    items.len()
                )));
            }
            let values = items
                .iter()
                .map(|item| json_to_value(item, inner))
                .collect::<Result<Vec<_>>>()?;
            Ok(DynSolValue::FixedArray(values))
        }
        DynSolType::Tuple(types) => {
            let items = value
                .as_array()
                .ok_or_else(|| encoding("tuple parameter must be an array"))?;
            if items.len() != types.len() {
                return Err(encoding(&format!(
                    "tuple needs {} elements, got {}",
                    types.len(),
                    items.len()
                )));
            }
            let values = items
                .iter()
                .zip(types)
                .map(|(item, ty)| json_to_value(item, ty))
                .collect::<Result<Vec<_>>>()?;
            Ok(DynSolValue::Tuple(values))
        }
        other => Err(encoding(&format!("unsupported Solidity type: {}", other))),
    }
}

/// Render a decoded value as JSON. Integers become decimal strings so
/// 256-bit values survive, byte strings become `0x` hex.
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(format!("0x{:x}", addr)),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

/// Render a list of outputs: a single value stays bare, named outputs become
/// an object, anything else an array.
pub fn outputs_to_json(names: &[String], values: &[DynSolValue]) -> Value {
    if values.len() == 1 {
        return value_to_json(&values[0]);
    }

    let named = !names.is_empty() && names.iter().all(|name| !name.is_empty());
    if named && names.len() == values.len() {
        let object = names
            .iter()
            .zip(values)
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect();
        Value::Object(object)
    } else {
        Value::Array(values.iter().map(value_to_json).collect())
    }
}

fn parse_uint(s: &str) -> Result<U256> {
    let s = s.trim();
    if let Some(hex_digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        U256::from_str_radix(hex_digits, 16)
            .map_err(|_| encoding(&format!("invalid hexadecimal value: '{}'", s)))
    } else {
        U256::from_str(s).map_err(|_| {
            encoding(&format!(
                "invalid numeric value: '{}'. Use decimal format or '0x' prefixed hex",
                s
            ))
        })
    }
}

fn parse_hex(value: &Value) -> Result<Vec<u8>> {
    let hex_str = value
        .as_str()
        .ok_or_else(|| encoding("bytes must be a hex string"))?;
    hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|_| encoding(&format!("invalid hex string: {}", hex_str)))
}

fn encoding(message: &str) -> BindError {
    BindError::Encoding(message.to_string())
}
