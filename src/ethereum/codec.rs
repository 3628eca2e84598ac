//! ABI encoding and decoding on top of alloy's dynamic types.
//!
//! Calls are encoded as selector + params sequence (head/tail layout);
//! results are decoded into a positional `Vec<DynSolValue>` that the
//! `CallOutput` impls reinterpret as whatever shape the caller asked for.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{keccak256, Address, Bytes, Selector, B256, I256, U256},
};

use crate::error::{BindError, Result};

/// Check `args` against the declared parameter types: count, structure and
/// integer ranges.
pub fn check_args(context: &str, types: &[DynSolType], args: &[DynSolValue]) -> Result<()> {
    if types.len() != args.len() {
        return Err(BindError::Encoding(format!(
            "'{}' expects {} arguments, got {}",
            context,
            types.len(),
            args.len()
        )));
    }

    for (i, (ty, arg)) in types.iter().zip(args).enumerate() {
        if !ty.matches(arg) {
            return Err(BindError::Encoding(format!(
                "'{}' argument #{}: expected {}, got {}",
                context,
                i,
                ty,
                describe(arg)
            )));
        }
        if !in_range(arg) {
            return Err(BindError::Encoding(format!(
                "'{}' argument #{}: value does not fit {}",
                context, i, ty
            )));
        }
    }
    Ok(())
}

/// Encode arguments without a selector (constructor arguments).
pub fn encode_args(context: &str, types: &[DynSolType], args: &[DynSolValue]) -> Result<Vec<u8>> {
    check_args(context, types, args)?;
    Ok(DynSolValue::Tuple(args.to_vec()).abi_encode_params())
}

/// Encode a function call: 4-byte selector followed by the arguments.
pub fn encode_call(
    context: &str,
    selector: Selector,
    types: &[DynSolType],
    args: &[DynSolValue],
) -> Result<Bytes> {
    let encoded = encode_args(context, types, args)?;
    let mut calldata = Vec::with_capacity(4 + encoded.len());
    calldata.extend_from_slice(selector.as_slice());
    calldata.extend(encoded);
    Ok(calldata.into())
}

/// Decode a params sequence. Truncated or malformed data is an error, never
/// a zero value.
pub fn decode_values(data: &[u8], types: &[DynSolType]) -> Result<Vec<DynSolValue>> {
    if types.is_empty() {
        return Ok(Vec::new());
    }

    let decoded = DynSolType::Tuple(types.to_vec())
        .abi_decode_params(data)
        .map_err(|e| BindError::Decoding(e.to_string()))?;

    match decoded {
        DynSolValue::Tuple(values) if values.len() == types.len() => Ok(values),
        other => Err(BindError::Decoding(format!(
            "expected {} values, decoded {}",
            types.len(),
            describe(&other)
        ))),
    }
}

/// Indexed reference types are stored as the keccak hash of their value and
/// cannot be recovered from the topic.
pub fn is_hashed_topic(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(_, _)
            | DynSolType::Tuple(_)
    )
}

/// Encode a value as the topic an indexed field of type `ty` would produce.
pub fn encode_topic(ty: &DynSolType, value: &DynSolValue) -> Result<B256> {
    if !ty.matches(value) {
        return Err(BindError::Encoding(format!(
            "topic value: expected {}, got {}",
            ty,
            describe(value)
        )));
    }
    if !in_range(value) {
        return Err(BindError::Encoding(format!("topic value does not fit {}", ty)));
    }

    match value {
        DynSolValue::String(s) => Ok(keccak256(s.as_bytes())),
        DynSolValue::Bytes(b) => Ok(keccak256(b)),
        _ => value.as_word().ok_or_else(|| {
            BindError::Encoding(format!("{} is not supported as a topic filter", ty))
        }),
    }
}

pub fn decode_topic(ty: &DynSolType, topic: &B256) -> Result<DynSolValue> {
    if is_hashed_topic(ty) {
        return Ok(DynSolValue::FixedBytes(*topic, 32));
    }
    ty.abi_decode(topic.as_slice())
        .map_err(|e| BindError::Decoding(format!("topic as {}: {}", ty, e)))
}

fn describe(value: &DynSolValue) -> String {
    value
        .as_type()
        .map(|ty| ty.to_string())
        .unwrap_or_else(|| "unknown type".to_string())
}

fn in_range(value: &DynSolValue) -> bool {
    match value {
        DynSolValue::Uint(v, bits) => *bits >= 256 || v.bit_len() <= *bits,
        DynSolValue::Int(v, bits) => {
            if *bits >= 256 || *bits == 0 {
                return true;
            }
            let bound = I256::from_raw(U256::from(1) << (*bits - 1));
            *v < bound && *v >= -bound
        }
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            values.iter().all(in_range)
        }
        _ => true,
    }
}

/// Decoded function outputs with their declared names.
#[derive(Debug, Clone, PartialEq)]
pub struct Outputs {
    names: Vec<String>,
    values: Vec<DynSolValue>,
}

impl Outputs {
    pub fn new(names: Vec<String>, values: Vec<DynSolValue>) -> Self {
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn positional(&self) -> &[DynSolValue] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
    }

    /// True when every output carries a declared name.
    pub fn is_named(&self) -> bool {
        !self.names.is_empty() && self.names.iter().all(|name| !name.is_empty())
    }

    /// Pair values with names; unnamed outputs become `arg{i}`.
    pub fn named(&self) -> NamedOutputs {
        NamedOutputs(
            self.values
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let name = match self.names.get(i) {
                        Some(name) if !name.is_empty() => name.clone(),
                        _ => format!("arg{}", i),
                    };
                    (name, value.clone())
                })
                .collect(),
        )
    }

    pub fn into_values(self) -> Vec<DynSolValue> {
        self.values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedOutputs(pub Vec<(String, DynSolValue)>);

impl NamedOutputs {
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, DynSolValue)> {
        self.0.iter()
    }
}

/// Conversion from one decoded ABI value into a native type.
pub trait FromDynValue: Sized {
    fn from_dyn_value(value: DynSolValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &DynSolValue) -> Result<T> {
    Err(BindError::Decoding(format!(
        "expected {}, got {}",
        expected,
        describe(value)
    )))
}

impl FromDynValue for DynSolValue {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        Ok(value)
    }
}

impl FromDynValue for U256 {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Uint(v, _) => Ok(v),
            other => mismatch("uint", &other),
        }
    }
}

impl FromDynValue for I256 {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Int(v, _) => Ok(v),
            other => mismatch("int", &other),
        }
    }
}

impl FromDynValue for Address {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Address(a) => Ok(a),
            other => mismatch("address", &other),
        }
    }
}

impl FromDynValue for bool {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl FromDynValue for String {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::String(s) => Ok(s),
            other => mismatch("string", &other),
        }
    }
}

impl FromDynValue for Bytes {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Bytes(b) => Ok(b.into()),
            other => mismatch("bytes", &other),
        }
    }
}

impl FromDynValue for B256 {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::FixedBytes(word, 32) => Ok(word),
            other => mismatch("bytes32", &other),
        }
    }
}

impl<T: FromDynValue> FromDynValue for Vec<T> {
    fn from_dyn_value(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
                values.into_iter().map(T::from_dyn_value).collect()
            }
            other => mismatch("array", &other),
        }
    }
}

macro_rules! from_small_uint {
    ($($ty:ty),*) => {$(
        impl FromDynValue for $ty {
            fn from_dyn_value(value: DynSolValue) -> Result<Self> {
                match value {
                    DynSolValue::Uint(v, _) if v.bit_len() <= <$ty>::BITS as usize => {
                        Ok(v.to::<$ty>())
                    }
                    other => mismatch(stringify!($ty), &other),
                }
            }
        }
    )*};
}

from_small_uint!(u8, u16, u32, u64, u128);

/// The shape a call result is decoded into, chosen at the call site.
pub trait CallOutput: Sized {
    fn from_outputs(outputs: Outputs) -> Result<Self>;
}

impl CallOutput for Outputs {
    fn from_outputs(outputs: Outputs) -> Result<Self> {
        Ok(outputs)
    }
}

impl CallOutput for NamedOutputs {
    fn from_outputs(outputs: Outputs) -> Result<Self> {
        Ok(outputs.named())
    }
}

impl CallOutput for Vec<DynSolValue> {
    fn from_outputs(outputs: Outputs) -> Result<Self> {
        Ok(outputs.into_values())
    }
}

impl CallOutput for () {
    fn from_outputs(_outputs: Outputs) -> Result<Self> {
        Ok(())
    }
}

fn single(outputs: Outputs) -> Result<DynSolValue> {
    let count = outputs.len();
    let mut values = outputs.into_values();
    match values.pop() {
        Some(value) if count == 1 => Ok(value),
        _ => Err(BindError::Decoding(format!(
            "expected a single output, got {}",
            count
        ))),
    }
}

macro_rules! single_output {
    ($($ty:ty),*) => {$(
        impl CallOutput for $ty {
            fn from_outputs(outputs: Outputs) -> Result<Self> {
                <$ty as FromDynValue>::from_dyn_value(single(outputs)?)
            }
        }
    )*};
}

single_output!(DynSolValue, U256, I256, Address, bool, String, Bytes, B256, u8, u16, u32, u64, u128);

macro_rules! tuple_output {
    ($count:expr; $($name:ident),+) => {
        impl<$($name: FromDynValue),+> CallOutput for ($($name,)+) {
            fn from_outputs(outputs: Outputs) -> Result<Self> {
                if outputs.len() != $count {
                    return Err(BindError::Decoding(format!(
                        "expected {} outputs, got {}",
                        $count,
                        outputs.len()
                    )));
                }
                let mut values = outputs.into_values().into_iter();
                Ok(($(
                    $name::from_dyn_value(values.next().ok_or_else(|| {
                        BindError::Decoding("missing output".to_string())
                    })?)?,
                )+))
            }
        }
    };
}

tuple_output!(1; A);
tuple_output!(2; A, B);
tuple_output!(3; A, B, C);
tuple_output!(4; A, B, C, D);
