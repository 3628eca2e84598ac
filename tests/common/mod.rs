#![allow(dead_code)]

use abi_bind::{
    AbiDescriptor, CallMsg, LogQuery, PendingTransaction, RawLog, RawSubscription, RevertData,
    Transport, TxMsg, Unsubscribe,
};
use alloy::dyn_abi::DynSolValue;
use alloy::eips::BlockId;
use alloy::primitives::{address, keccak256, Address, Bytes, B256, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const TOKEN: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
pub const ALICE: Address = address!("00000000000000000000000000000000000000a1");
pub const BOB: Address = address!("00000000000000000000000000000000000000b2");
pub const CAROL: Address = address!("00000000000000000000000000000000000000c3");
pub const DEPLOYER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

pub const TOKEN_ABI: &str = r#"[
    {"type":"constructor","stateMutability":"nonpayable",
     "inputs":[{"name":"name","type":"string"},{"name":"supply","type":"uint256"}]},
    {"type":"function","name":"name","stateMutability":"view",
     "inputs":[],"outputs":[{"name":"","type":"string"}]},
    {"type":"function","name":"balanceOf","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"}],
     "outputs":[{"name":"balance","type":"uint256"}]},
    {"type":"function","name":"getReserves","stateMutability":"view",
     "inputs":[],
     "outputs":[{"name":"reserve0","type":"uint112"},{"name":"reserve1","type":"uint112"}]},
    {"type":"function","name":"transfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
     "outputs":[{"name":"","type":"bool"}]},
    {"type":"receive","stateMutability":"payable"},
    {"type":"event","name":"Transfer","anonymous":false,
     "inputs":[{"name":"from","type":"address","indexed":true},
               {"name":"to","type":"address","indexed":true},
               {"name":"value","type":"uint256","indexed":false}]},
    {"type":"event","name":"Approval","anonymous":false,
     "inputs":[{"name":"owner","type":"address","indexed":true},
               {"name":"spender","type":"address","indexed":true},
               {"name":"value","type":"uint256","indexed":false}]},
    {"type":"error","name":"InsufficientBalance",
     "inputs":[{"name":"available","type":"uint256"},{"name":"required","type":"uint256"}]}
]"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn token_abi() -> Arc<AbiDescriptor> {
    Arc::new(AbiDescriptor::from_json(TOKEN_ABI).unwrap())
}

pub fn transfer_log(from: Address, to: Address, value: u64, block: u64, index: u64) -> RawLog {
    let selector = keccak256("Transfer(address,address,uint256)");
    RawLog {
        address: TOKEN,
        topics: vec![selector, from.into_word(), to.into_word()],
        data: Bytes::from(DynSolValue::Uint(U256::from(value), 256).abi_encode()),
        block_number: block,
        transaction_hash: B256::left_padding_from(&(block * 1000 + index).to_be_bytes()),
        log_index: index,
        removed: false,
    }
}

pub fn approval_log(owner: Address, spender: Address, block: u64) -> RawLog {
    let mut log = transfer_log(owner, spender, 1, block, 0);
    log.topics[0] = keccak256("Approval(address,address,uint256)");
    log
}

pub fn revert_with_reason(reason: &str) -> Bytes {
    let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
    data.extend(DynSolValue::Tuple(vec![DynSolValue::String(reason.into())]).abi_encode_params());
    Bytes::from(data)
}

enum Reply {
    Data(Bytes),
    Revert(Bytes),
    Fail(String),
}

struct LiveSub {
    query: LogQuery,
    logs: mpsc::Sender<RawLog>,
    errors: mpsc::Sender<anyhow::Error>,
}

/// In-memory node: canned call replies, a fixed log history, and live
/// subscriptions fed by `emit`.
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<[u8; 4], Reply>>,
    code: Mutex<HashMap<Address, Bytes>>,
    history: Mutex<Vec<RawLog>>,
    subs: Mutex<Vec<LiveSub>>,
    pub calls: Mutex<Vec<CallMsg>>,
    pub submitted: Mutex<Vec<TxMsg>>,
    pub queries: Mutex<Vec<LogQuery>>,
    pub code_lookups: Mutex<Vec<(Address, Option<BlockId>)>>,
    pub released: Arc<AtomicUsize>,
    nonce: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, selector: [u8; 4], data: Vec<u8>) {
        self.replies
            .lock()
            .unwrap()
            .insert(selector, Reply::Data(Bytes::from(data)));
    }

    pub fn revert(&self, selector: [u8; 4], data: Bytes) {
        self.replies
            .lock()
            .unwrap()
            .insert(selector, Reply::Revert(data));
    }

    pub fn fail(&self, selector: [u8; 4], message: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(selector, Reply::Fail(message.to_string()));
    }

    pub fn set_code(&self, address: Address, code: &[u8]) {
        self.code
            .lock()
            .unwrap()
            .insert(address, Bytes::copy_from_slice(code));
    }

    pub fn add_logs(&self, logs: Vec<RawLog>) {
        self.history.lock().unwrap().extend(logs);
    }

    pub fn set_nonce(&self, nonce: usize) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subs.lock().unwrap().len()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Deliver a log to every open subscription it matches.
    pub async fn emit(&self, log: RawLog) {
        let targets: Vec<_> = self
            .subs
            .lock()
            .unwrap()
            .iter()
            .filter(|sub| sub.query.matches(&log))
            .map(|sub| sub.logs.clone())
            .collect();
        for target in targets {
            let _ = target.send(log.clone()).await;
        }
    }

    pub async fn fail_subscriptions(&self, message: &str) {
        let targets: Vec<_> = self
            .subs
            .lock()
            .unwrap()
            .iter()
            .map(|sub| sub.errors.clone())
            .collect();
        for target in targets {
            let _ = target.send(anyhow!("{}", message)).await;
        }
    }

    /// Report an error on every subscription, then drop both channels the
    /// way a stopped poller does.
    pub async fn fail_and_end_subscriptions(&self, message: &str) {
        self.fail_subscriptions(message).await;
        self.end_subscriptions();
    }

    /// Close every subscription's log channel as a node shutting down would.
    pub fn end_subscriptions(&self) {
        self.subs.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, call: &CallMsg) -> Result<Bytes> {
        self.calls.lock().unwrap().push(call.clone());
        let selector: [u8; 4] = call
            .data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| anyhow!("calldata too short"))?;

        match self.replies.lock().unwrap().get(&selector) {
            Some(Reply::Data(data)) => Ok(data.clone()),
            Some(Reply::Revert(data)) => {
                Err(anyhow::Error::new(RevertData(data.clone())).context("execution reverted"))
            }
            Some(Reply::Fail(message)) => Err(anyhow!("{}", message)),
            None => Ok(Bytes::new()),
        }
    }

    async fn submit(&self, tx: &TxMsg) -> Result<PendingTransaction> {
        let from = tx.opts.from.unwrap_or(DEPLOYER);
        let nonce = match tx.opts.nonce {
            Some(nonce) => nonce,
            None => self.nonce.fetch_add(1, Ordering::SeqCst) as u64,
        };
        self.submitted.lock().unwrap().push(tx.clone());
        Ok(PendingTransaction {
            hash: keccak256(&tx.data),
            from,
            nonce,
        })
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>> {
        self.queries.lock().unwrap().push(query.clone());
        // Newest first, and topic filtering left to the caller.
        let mut logs: Vec<RawLog> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.address == query.address)
            .cloned()
            .collect();
        logs.reverse();
        Ok(logs)
    }

    async fn subscribe(&self, query: &LogQuery, buffer: usize) -> Result<RawSubscription> {
        let (log_tx, log_rx) = mpsc::channel(buffer);
        let (err_tx, err_rx) = mpsc::channel(1);
        self.subs.lock().unwrap().push(LiveSub {
            query: query.clone(),
            logs: log_tx,
            errors: err_tx,
        });
        let released = self.released.clone();
        Ok(RawSubscription {
            logs: log_rx,
            errors: err_rx,
            unsubscribe: Unsubscribe::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }

    async fn code_at(&self, address: Address, block: Option<BlockId>) -> Result<Bytes> {
        self.code_lookups.lock().unwrap().push((address, block));
        Ok(self
            .code
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }
}
