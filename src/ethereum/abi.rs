use alloy::{
    dyn_abi::{DynSolType, Specifier},
    json_abi::{JsonAbi, Param, StateMutability},
    primitives::{Bytes, Selector, B256, U256},
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use super::codec;
use super::values;
use crate::error::{BindError, Result};

/// Selector of the built-in `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// Selector of the built-in `Panic(uint256)` revert payload.
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// A function with its parameter types resolved.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub name: String,
    pub signature: String,
    pub selector: Selector,
    pub inputs: Vec<DynSolType>,
    pub input_names: Vec<String>,
    pub outputs: Vec<DynSolType>,
    pub output_names: Vec<String>,
    /// `view` or `pure`
    pub read_only: bool,
    pub payable: bool,
}

#[derive(Debug, Clone)]
pub struct EventField {
    pub name: String,
    pub ty: DynSolType,
    pub indexed: bool,
}

#[derive(Debug, Clone)]
pub struct EventSpec {
    pub name: String,
    pub signature: String,
    pub selector: B256,
    pub anonymous: bool,
    pub fields: Vec<EventField>,
}

impl EventSpec {
    pub fn indexed_fields(&self) -> impl Iterator<Item = &EventField> {
        self.fields.iter().filter(|field| field.indexed)
    }

    pub fn body_types(&self) -> Vec<DynSolType> {
        self.fields
            .iter()
            .filter(|field| !field.indexed)
            .map(|field| field.ty.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ErrorSpec {
    pub name: String,
    pub signature: String,
    pub selector: Selector,
    pub inputs: Vec<DynSolType>,
}

/// Parsed, immutable description of a contract's functions, events and
/// errors. All parameter types are resolved up front so a malformed
/// descriptor fails here and never at call time.
#[derive(Debug, Clone)]
pub struct AbiDescriptor {
    abi: JsonAbi,
    methods: Vec<MethodSpec>,
    method_index: HashMap<String, usize>,
    events: Vec<EventSpec>,
    event_index: HashMap<String, usize>,
    errors: Vec<ErrorSpec>,
    constructor_inputs: Vec<DynSolType>,
}

impl AbiDescriptor {
    pub fn from_json(json: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json)
            .map_err(|e| BindError::Descriptor(format!("failed to parse ABI JSON: {}", e)))?;
        Self::from_abi(abi)
    }

    pub fn from_abi(abi: JsonAbi) -> Result<Self> {
        let mut methods = Vec::new();
        let mut method_index = HashMap::new();
        for function in abi.functions() {
            let spec = MethodSpec {
                name: function.name.clone(),
                signature: function.signature(),
                selector: function.selector(),
                inputs: resolve_params(&function.inputs, &function.name)?,
                input_names: param_names(&function.inputs),
                outputs: resolve_params(&function.outputs, &function.name)?,
                output_names: param_names(&function.outputs),
                read_only: matches!(
                    function.state_mutability,
                    StateMutability::View | StateMutability::Pure
                ),
                payable: matches!(function.state_mutability, StateMutability::Payable),
            };
            register(&mut method_index, &spec.name, &spec.signature, methods.len());
            methods.push(spec);
        }

        let mut events = Vec::new();
        let mut event_index = HashMap::new();
        for event in abi.events() {
            let mut fields = Vec::with_capacity(event.inputs.len());
            for (i, input) in event.inputs.iter().enumerate() {
                let ty = input.resolve().map_err(|e| {
                    BindError::Descriptor(format!(
                        "event '{}' field #{} has invalid type '{}': {}",
                        event.name, i, input.ty, e
                    ))
                })?;
                fields.push(EventField {
                    name: field_name(&input.name, i),
                    ty,
                    indexed: input.indexed,
                });
            }

            let indexed = fields.iter().filter(|f| f.indexed).count();
            let limit = if event.anonymous { 4 } else { 3 };
            if indexed > limit {
                return Err(BindError::Descriptor(format!(
                    "event '{}' declares {} indexed fields, at most {} allowed",
                    event.name, indexed, limit
                )));
            }

            let spec = EventSpec {
                name: event.name.clone(),
                signature: event.signature(),
                selector: event.selector(),
                anonymous: event.anonymous,
                fields,
            };
            register(&mut event_index, &spec.name, &spec.signature, events.len());
            events.push(spec);
        }

        let mut errors = Vec::new();
        for error in abi.errors() {
            errors.push(ErrorSpec {
                name: error.name.clone(),
                signature: error.signature(),
                selector: error.selector(),
                inputs: resolve_params(&error.inputs, &error.name)?,
            });
        }

        let constructor_inputs = match &abi.constructor {
            Some(constructor) => resolve_params(&constructor.inputs, "constructor")?,
            None => Vec::new(),
        };

        debug!(
            "Parsed ABI with {} functions, {} events, {} errors",
            methods.len(),
            events.len(),
            errors.len()
        );

        Ok(Self {
            abi,
            methods,
            method_index,
            events,
            event_index,
            errors,
            constructor_inputs,
        })
    }

    /// Look a function up by name, de-conflicted overload name (`name0`,
    /// `name1`, ...) or full signature.
    pub fn method(&self, name: &str) -> Result<&MethodSpec> {
        self.method_index
            .get(name)
            .map(|&i| &self.methods[i])
            .ok_or_else(|| BindError::MethodNotFound(name.to_string()))
    }

    pub fn event(&self, name: &str) -> Result<&EventSpec> {
        self.event_index
            .get(name)
            .map(|&i| &self.events[i])
            .ok_or_else(|| BindError::EventNotFound(name.to_string()))
    }

    /// Find the event whose selector is the log's first topic.
    pub fn event_by_selector(&self, selector: &B256) -> Option<&EventSpec> {
        self.events
            .iter()
            .find(|event| !event.anonymous && event.selector == *selector)
    }

    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }

    pub fn events(&self) -> &[EventSpec] {
        &self.events
    }

    pub fn errors(&self) -> &[ErrorSpec] {
        &self.errors
    }

    pub fn constructor_inputs(&self) -> &[DynSolType] {
        &self.constructor_inputs
    }

    pub fn has_fallback(&self) -> bool {
        self.abi.fallback.is_some()
    }

    pub fn has_receive(&self) -> bool {
        self.abi.receive.is_some()
    }

    pub fn json_abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Turn revert data into a readable reason: `Error(string)`,
    /// `Panic(uint256)` or one of the contract's custom errors.
    pub fn decode_revert(&self, data: &[u8]) -> Option<String> {
        if data.len() < 4 {
            return None;
        }
        let (selector, body) = data.split_at(4);

        if selector == ERROR_STRING_SELECTOR {
            let values = codec::decode_values(body, &[DynSolType::String]).ok()?;
            return values.into_iter().next()?.as_str().map(str::to_string);
        }

        if selector == PANIC_SELECTOR {
            let values = codec::decode_values(body, &[DynSolType::Uint(256)]).ok()?;
            let (code, _) = values.into_iter().next()?.as_uint()?;
            let code = if code.bit_len() <= 64 {
                code.as_limbs()[0]
            } else {
                u64::MAX
            };
            return Some(format!("panic: {} (0x{:02x})", panic_reason(code), code));
        }

        let error = self
            .errors
            .iter()
            .find(|error| error.selector.as_slice() == selector)?;
        let values = codec::decode_values(body, &error.inputs).ok()?;
        let args: Vec<String> = values
            .iter()
            .map(|value| values::value_to_json(value).to_string())
            .collect();
        Some(format!("{}({})", error.name, args.join(", ")))
    }
}

fn resolve_params(params: &[Param], owner: &str) -> Result<Vec<DynSolType>> {
    params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            param.resolve().map_err(|e| {
                BindError::Descriptor(format!(
                    "'{}' parameter #{} has invalid type '{}': {}",
                    owner, i, param.ty, e
                ))
            })
        })
        .collect()
}

fn param_names(params: &[Param]) -> Vec<String> {
    params.iter().map(|param| param.name.clone()).collect()
}

fn field_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("arg{}", index)
    } else {
        name.to_string()
    }
}

/// Index an entry by its signature and by its name. Overloads after the
/// first get a numeric suffix, skipping names already taken.
fn register(index: &mut HashMap<String, usize>, name: &str, signature: &str, position: usize) {
    index.insert(signature.to_string(), position);

    let mut candidate = name.to_string();
    let mut suffix = 0;
    while index.contains_key(&candidate) {
        candidate = format!("{}{}", name, suffix);
        suffix += 1;
    }
    index.insert(candidate, position);
}

fn panic_reason(code: u64) -> &'static str {
    match code {
        0x01 => "assertion failed",
        0x11 => "arithmetic overflow or underflow",
        0x12 => "division or modulo by zero",
        0x21 => "invalid enum conversion",
        0x22 => "corrupted storage byte array",
        0x31 => "pop on empty array",
        0x32 => "array index out of bounds",
        0x41 => "out of memory",
        0x51 => "call to zero-initialized function",
        _ => "unknown panic code",
    }
}

/// A descriptor together with the creation bytecode from the same build
/// artifact.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub descriptor: Arc<AbiDescriptor>,
    pub bytecode: Option<Bytes>,
}

impl ContractArtifact {
    /// Accepts either a bare JSON ABI array or a build artifact object with
    /// `abi` and `bytecode` (plain hex string or `{ "object": "0x..." }`).
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| BindError::Descriptor(format!("failed to parse artifact JSON: {}", e)))?;

        let (abi_value, bytecode) = match value {
            Value::Array(_) => (value, None),
            Value::Object(mut object) => {
                let abi = object
                    .remove("abi")
                    .ok_or_else(|| BindError::Descriptor("artifact has no 'abi' field".into()))?;
                let bytecode = match object.get("bytecode") {
                    Some(Value::String(hex)) => Some(parse_bytecode(hex)?),
                    Some(Value::Object(inner)) => match inner.get("object") {
                        Some(Value::String(hex)) => Some(parse_bytecode(hex)?),
                        _ => None,
                    },
                    _ => None,
                };
                (abi, bytecode)
            }
            _ => {
                return Err(BindError::Descriptor(
                    "artifact must be a JSON array or object".into(),
                ))
            }
        };

        let abi: JsonAbi = serde_json::from_value(abi_value)
            .map_err(|e| BindError::Descriptor(format!("failed to parse ABI JSON: {}", e)))?;

        Ok(Self {
            descriptor: Arc::new(AbiDescriptor::from_abi(abi)?),
            bytecode,
        })
    }
}

fn parse_bytecode(hex_str: &str) -> Result<Bytes> {
    let trimmed = hex_str.trim().trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(Bytes::new());
    }
    hex::decode(trimmed)
        .map(Bytes::from)
        .map_err(|e| BindError::Descriptor(format!("invalid bytecode hex: {}", e)))
}

/// Keeps one parsed artifact per contract type so every handle of that type
/// shares the same descriptor.
#[derive(Debug, Default)]
pub struct AbiRegistry {
    artifacts: HashMap<String, ContractArtifact>,
}

impl AbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ContractArtifact> {
        self.artifacts.get(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<AbiDescriptor>> {
        self.artifacts
            .get(name)
            .map(|artifact| artifact.descriptor.clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }

    pub fn insert(&mut self, name: &str, artifact: ContractArtifact) {
        self.artifacts.insert(name.to_string(), artifact);
        info!("Registered ABI for {}", name);
    }

    /// Load one artifact file; the contract type is named after the file stem.
    pub async fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<ContractArtifact> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| BindError::Descriptor(format!("invalid artifact path {:?}", path)))?
            .to_string();

        if let Some(artifact) = self.artifacts.get(&name) {
            debug!("ABI cache hit for {}", name);
            return Ok(artifact.clone());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            BindError::Descriptor(format!("failed to read artifact {:?}: {}", path, e))
        })?;
        let artifact = ContractArtifact::from_json(&content)
            .map_err(|e| BindError::Descriptor(format!("{:?}: {}", path, e)))?;

        self.insert(&name, artifact.clone());
        Ok(artifact)
    }

    /// Load every `*.json` file in a directory. Files that fail to parse
    /// abort the load.
    pub async fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            BindError::Descriptor(format!("failed to read directory {:?}: {}", dir, e))
        })?;

        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BindError::Descriptor(format!("failed to list {:?}: {}", dir, e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            } else {
                warn!("Skipping non-JSON file {:?}", path);
            }
        }
        paths.sort();

        for path in &paths {
            self.load_file(path).await?;
        }
        Ok(paths.len())
    }

    pub fn clear(&mut self) {
        self.artifacts.clear();
        info!("Cleared ABI registry");
    }
}
