use crate::config::{Config, GasConfig};
use alloy::{
    eips::BlockId,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, TxKind},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    transports::{
        http::{Client, Http},
        TransportError,
    },
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::filter::LogQuery;
use super::{utils, CallMsg, PendingTransaction, RawLog, TxMsg};

/// Revert payload reported by the node. Transports attach it to the error
/// they return so callers can decode the reason against the ABI.
#[derive(Debug, Clone, thiserror::Error)]
#[error("execution reverted")]
pub struct RevertData(pub Bytes);

/// Releases a transport-level subscription. Runs its closure at most once,
/// either on an explicit call or on drop.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send + 'static>>);

impl Unsubscribe {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.is_active())
            .finish()
    }
}

/// An open log stream from the node.
#[derive(Debug)]
pub struct RawSubscription {
    pub logs: mpsc::Receiver<RawLog>,
    pub errors: mpsc::Receiver<anyhow::Error>,
    pub unsubscribe: Unsubscribe,
}

/// The node client the bindings talk through. Implementations must support
/// many concurrent independent subscriptions on one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Simulated, read-only execution (`eth_call`).
    async fn execute(&self, call: &CallMsg) -> Result<Bytes>;

    /// Sign and submit a transaction; returns without waiting for inclusion.
    async fn submit(&self, tx: &TxMsg) -> Result<PendingTransaction>;

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>>;

    async fn subscribe(&self, query: &LogQuery, buffer: usize) -> Result<RawSubscription>;

    async fn code_at(&self, address: Address, block: Option<BlockId>) -> Result<Bytes>;
}

/// Transport over an alloy HTTP provider. Live logs are polled through
/// `eth_newFilter`/`eth_getFilterChanges`.
#[derive(Debug)]
pub struct AlloyTransport<P> {
    provider: P,
    from: Option<Address>,
    gas: GasConfig,
    poll_interval: Duration,
}

impl<P> AlloyTransport<P>
where
    P: Provider<Http<Client>> + 'static,
{
    pub fn new(provider: P, gas: GasConfig, poll_interval: Duration) -> Self {
        Self {
            provider,
            from: None,
            gas,
            poll_interval,
        }
    }

    /// Default sender for transactions that do not set `from`.
    pub fn with_sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn apply_gas(&self, mut request: TransactionRequest, tx: &TxMsg) -> TransactionRequest {
        let gas_limit = tx.opts.gas_limit.or(self.gas.default_gas_limit);
        if let Some(gas) = gas_limit {
            request = request.with_gas_limit(gas);
        }

        match tx.opts.gas_price {
            Some(price) => request = request.with_gas_price(price),
            None => {
                if let Some(max_gas_price) = self.gas.max_gas_price {
                    request = request.with_gas_price(max_gas_price as u128);
                }
            }
        }

        let priority_fee = tx
            .opts
            .max_priority_fee_per_gas
            .or(self.gas.priority_fee.map(u128::from));
        if let (Some(fee), None) = (priority_fee, request.gas_price) {
            request = request.with_max_priority_fee_per_gas(fee);
        }
        request
    }
}

/// Connect a read-only transport for the configured network.
pub fn connect(
    config: &Config,
    network: Option<&str>,
) -> Result<AlloyTransport<RootProvider<Http<Client>>>> {
    let network_config = config.network(network)?;
    let provider = ProviderBuilder::new().on_http(network_config.rpc_url.parse().map_err(|e| {
        anyhow!("Invalid RPC URL '{}': {}", network_config.rpc_url, e)
    })?);

    Ok(AlloyTransport::new(
        provider,
        network_config.gas.clone(),
        config.subscription.poll_interval(),
    ))
}

/// Connect a transport that signs with a local private key.
pub fn connect_with_signer(
    config: &Config,
    network: Option<&str>,
    private_key: &str,
) -> Result<AlloyTransport<impl Provider<Http<Client>> + 'static>> {
    let network_config = config.network(network)?;

    let private_key = private_key.trim();
    let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let signer = PrivateKeySigner::from_str(private_key)
        .map_err(|e| anyhow!("Invalid private key: {}", e))?;
    let from = signer.address();

    let url = network_config
        .rpc_url
        .parse()
        .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", network_config.rpc_url, e))?;

    let wallet = EthereumWallet::from(signer);
    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(wallet)
        .on_http(url);

    info!("Signing transactions as {:?}", from);
    Ok(AlloyTransport::new(
        provider,
        network_config.gas.clone(),
        config.subscription.poll_interval(),
    )
    .with_sender(from))
}

fn rpc_error(err: TransportError) -> anyhow::Error {
    debug!("{}", utils::interpret_rpc_error(&err.to_string()));
    let revert = err
        .as_error_resp()
        .and_then(|payload| payload.as_revert_data());
    match revert {
        Some(data) => anyhow::Error::new(RevertData(data)).context(err.to_string()),
        None => anyhow::Error::new(err),
    }
}

#[async_trait]
impl<P> Transport for AlloyTransport<P>
where
    P: Provider<Http<Client>> + 'static,
{
    async fn execute(&self, call: &CallMsg) -> Result<Bytes> {
        let mut request = TransactionRequest::default()
            .to(call.to)
            .input(call.data.clone().into());
        if let Some(from) = call.from {
            request = request.from(from);
        }

        let block = call.block.unwrap_or_else(BlockId::latest);
        self.provider
            .call(&request)
            .block(block)
            .await
            .map_err(rpc_error)
    }

    async fn submit(&self, tx: &TxMsg) -> Result<PendingTransaction> {
        let from = tx
            .opts
            .from
            .or(self.from)
            .ok_or_else(|| anyhow!("No sender configured for transaction"))?;

        let nonce = match tx.opts.nonce {
            Some(nonce) => nonce,
            None => self
                .provider
                .get_transaction_count(from)
                .block_id(BlockId::pending())
                .await
                .map_err(rpc_error)?,
        };

        let mut request = TransactionRequest::default()
            .from(from)
            .input(tx.data.clone().into())
            .with_nonce(nonce);
        request.to = Some(match tx.to {
            Some(to) => TxKind::Call(to),
            None => TxKind::Create,
        });
        if let Some(value) = tx.opts.value {
            request = request.value(value);
        }
        let request = self.apply_gas(request, tx);

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(rpc_error)?;
        let hash = *pending.tx_hash();
        info!("Transaction sent with hash: {:?}", hash);

        Ok(PendingTransaction { hash, from, nonce })
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>> {
        let logs = self
            .provider
            .get_logs(&query.to_filter())
            .await
            .map_err(rpc_error)?;
        Ok(logs.into_iter().map(RawLog::from).collect())
    }

    async fn subscribe(&self, query: &LogQuery, buffer: usize) -> Result<RawSubscription> {
        let poller = self
            .provider
            .watch_logs(&query.to_filter())
            .await
            .map_err(rpc_error)?;
        let mut stream = poller.with_poll_interval(self.poll_interval).into_stream();

        let (log_tx, log_rx) = mpsc::channel(buffer.max(1));
        let (err_tx, err_rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    batch = stream.next() => match batch {
                        Some(logs) => {
                            for log in logs {
                                if log_tx.send(RawLog::from(log)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => {
                            warn!("Log poller stopped");
                            let _ = err_tx.send(anyhow!("log poller stopped")).await;
                            break;
                        }
                    }
                }
            }
            debug!("Log polling task finished");
        });

        Ok(RawSubscription {
            logs: log_rx,
            errors: err_rx,
            unsubscribe: Unsubscribe::new(move || token.cancel()),
        })
    }

    async fn code_at(&self, address: Address, block: Option<BlockId>) -> Result<Bytes> {
        self.provider
            .get_code_at(address)
            .block_id(block.unwrap_or_else(BlockId::latest))
            .await
            .map_err(rpc_error)
    }
}
