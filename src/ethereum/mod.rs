pub mod abi;
pub mod codec;
pub mod contract;
pub mod filter;
pub mod provider;
pub mod utils;
pub mod values;
pub mod watcher;

use alloy::{
    dyn_abi::DynSolValue,
    eips::BlockId,
    primitives::{Address, Bytes, B256, U256},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Default capacity of a live subscription's raw-log channel.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 128;

/// A log as handed over by the transport, before any ABI decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    /// Set when a chain reorganisation invalidated the log
    pub removed: bool,
}

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number.unwrap_or_default(),
            transaction_hash: log.transaction_hash.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
            removed: log.removed,
        }
    }
}

/// A decoded event instance.
///
/// `fields` follows the ABI declaration order. Indexed fields of dynamic
/// type only exist on-chain as their topic hash and are kept as `bytes32`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event: String,
    pub fields: Vec<(String, DynSolValue)>,
    pub raw: RawLog,
}

impl EventRecord {
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn block_number(&self) -> u64 {
        self.raw.block_number
    }

    pub fn log_index(&self) -> u64 {
        self.raw.log_index
    }

    pub fn to_json(&self) -> Value {
        let mut fields = Map::new();
        for (name, value) in &self.fields {
            fields.insert(name.clone(), values::value_to_json(value));
        }

        serde_json::json!({
            "event": self.event,
            "fields": fields,
            "address": format!("0x{:x}", self.raw.address),
            "block_number": self.raw.block_number,
            "transaction_hash": format!("0x{:x}", self.raw.transaction_hash),
            "log_index": self.raw.log_index,
            "removed": self.raw.removed,
        })
    }
}

impl Serialize for EventRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Options for read-only calls.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    pub from: Option<Address>,
    /// Pin the call to a historical block; latest when unset
    pub block: Option<BlockId>,
}

/// Signing and gas options for state-changing invocations. Anything left
/// unset is filled in by the signer/transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactOpts {
    pub from: Option<Address>,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct WatchOpts {
    /// Capacity of the raw-log channel between transport and consumer
    pub buffer: usize,
}

impl Default for WatchOpts {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

impl WatchOpts {
    pub fn with_buffer(buffer: usize) -> Self {
        Self { buffer: buffer.max(1) }
    }
}

/// A read-only invocation as handed to the transport.
#[derive(Debug, Clone)]
pub struct CallMsg {
    pub to: Address,
    pub data: Bytes,
    pub from: Option<Address>,
    pub block: Option<BlockId>,
}

/// A state-changing invocation as handed to the transport. `to` is `None`
/// for contract creation.
#[derive(Debug, Clone)]
pub struct TxMsg {
    pub to: Option<Address>,
    pub data: Bytes,
    pub opts: TransactOpts,
}

/// Reference to a submitted, not yet included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub hash: B256,
    pub from: Address,
    pub nonce: u64,
}
