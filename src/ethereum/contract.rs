use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::abi::{AbiDescriptor, MethodSpec};
use super::codec::{self, CallOutput, Outputs};
use super::filter::{EventDecoder, LogFilterSpec, LogQuery};
use super::provider::{RawSubscription, RevertData, Transport};
use super::watcher::{EventStream, WatchHandle};
use super::{
    utils, values, CallMsg, CallOpts, EventRecord, PendingTransaction, RawLog, TransactOpts,
    TxMsg, WatchOpts,
};
use crate::error::{BindError, Result};

/// A deployed contract: address, descriptor and the transport to reach it.
/// Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct ContractHandle {
    address: Address,
    abi: Arc<AbiDescriptor>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &self.address)
            .field("methods", &self.abi.methods().len())
            .field("events", &self.abi.events().len())
            .finish()
    }
}

impl ContractHandle {
    pub fn new(address: Address, abi: Arc<AbiDescriptor>, transport: Arc<dyn Transport>) -> Self {
        Self {
            address,
            abi,
            transport,
        }
    }

    /// Bind to a hex address string.
    pub fn at(address: &str, abi: Arc<AbiDescriptor>, transport: Arc<dyn Transport>) -> Result<Self> {
        let address = utils::validate_address(address)
            .map_err(|e| BindError::Encoding(format!("Invalid contract address: {}", e)))?;
        Ok(Self::new(address, abi, transport))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Arc<AbiDescriptor> {
        &self.abi
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Invoke a method read-only and decode its outputs into `T`.
    ///
    /// `T` picks the result shape: `Outputs` or `Vec<DynSolValue>` for
    /// positional values, `NamedOutputs` for name/value pairs, `()` to
    /// discard, or a single value/tuple of plain Rust types.
    pub async fn call<T: CallOutput>(
        &self,
        opts: &CallOpts,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<T> {
        let outputs = self.call_outputs(opts, method, args).await?;
        T::from_outputs(outputs)
    }

    async fn call_outputs(
        &self,
        opts: &CallOpts,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Outputs> {
        let spec = self.abi.method(method)?;
        let data = codec::encode_call(&spec.signature, spec.selector, &spec.inputs, args)?;

        tracing::debug!("Calling {} on {:?}", spec.signature, self.address);
        let output = self
            .transport
            .execute(&CallMsg {
                to: self.address,
                data,
                from: opts.from,
                block: opts.block,
            })
            .await
            .map_err(|e| map_transport_error(&self.abi, e))?;

        if output.is_empty() && !spec.outputs.is_empty() {
            let code = self
                .transport
                .code_at(self.address, opts.block)
                .await
                .map_err(BindError::transport)?;
            if code.is_empty() {
                return Err(BindError::NoCode(self.address));
            }
        }

        let values = codec::decode_values(&output, &spec.outputs).map_err(|e| {
            BindError::Decoding(format!("{} returned bad data: {}", spec.signature, e))
        })?;
        Ok(Outputs::new(spec.output_names.clone(), values))
    }

    /// `call` for loosely typed callers: parameters as a JSON array or
    /// object, result rendered as JSON.
    pub async fn call_json(&self, opts: &CallOpts, method: &str, params: &Value) -> Result<Value> {
        let spec = self.abi.method(method)?;
        let args = json_args(spec, params)?;
        let outputs = self.call_outputs(opts, method, &args).await?;
        Ok(values::outputs_to_json(&spec.output_names, outputs.positional()))
    }

    /// Submit a state-changing invocation. Returns once the transport has
    /// accepted the transaction; inclusion is not awaited.
    pub async fn transact(
        &self,
        opts: &TransactOpts,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<PendingTransaction> {
        let spec = self.abi.method(method)?;
        let data = codec::encode_call(&spec.signature, spec.selector, &spec.inputs, args)?;

        if spec.read_only {
            tracing::debug!("{} is read-only, submitting as a transaction anyway", spec.signature);
        }
        if opts.value.is_some_and(|value| !value.is_zero()) && !spec.payable {
            tracing::warn!("Sending value to non-payable {}", spec.signature);
        }

        tracing::debug!("Transacting {} on {:?}", spec.signature, self.address);
        self.submit(opts, data).await
    }

    pub async fn transact_json(
        &self,
        opts: &TransactOpts,
        method: &str,
        params: &Value,
    ) -> Result<PendingTransaction> {
        let spec = self.abi.method(method)?;
        let args = json_args(spec, params)?;
        self.transact(opts, method, &args).await
    }

    /// Submit caller-built calldata without going through the descriptor.
    pub async fn raw_transact(
        &self,
        opts: &TransactOpts,
        calldata: Bytes,
    ) -> Result<PendingTransaction> {
        tracing::debug!(
            "Raw transaction to {:?} with {} bytes of calldata",
            self.address,
            calldata.len()
        );
        self.submit(opts, calldata).await
    }

    /// Plain value transfer, handled by the receive or fallback function.
    pub async fn transfer(&self, opts: &TransactOpts) -> Result<PendingTransaction> {
        if !self.abi.has_receive() && !self.abi.has_fallback() {
            tracing::warn!(
                "Contract at {:?} declares neither receive nor fallback",
                self.address
            );
        }
        self.raw_transact(opts, Bytes::new()).await
    }

    async fn submit(&self, opts: &TransactOpts, data: Bytes) -> Result<PendingTransaction> {
        let pending = self
            .transport
            .submit(&TxMsg {
                to: Some(self.address),
                data,
                opts: opts.clone(),
            })
            .await
            .map_err(|e| map_transport_error(&self.abi, e))?;
        tracing::info!("Transaction {:?} submitted to {:?}", pending.hash, self.address);
        Ok(pending)
    }

    /// Create a new contract from `bytecode` with ABI-encoded constructor
    /// arguments appended. The address is derived from the sender and nonce
    /// the transport reports, so it is known before the transaction is mined.
    pub async fn deploy(
        transport: Arc<dyn Transport>,
        abi: Arc<AbiDescriptor>,
        bytecode: &[u8],
        opts: &TransactOpts,
        args: &[DynSolValue],
    ) -> Result<(Address, PendingTransaction, ContractHandle)> {
        if bytecode.is_empty() {
            return Err(BindError::Encoding("no creation bytecode to deploy".into()));
        }
        let constructor_args = codec::encode_args("constructor", abi.constructor_inputs(), args)?;

        let mut data = Vec::with_capacity(bytecode.len() + constructor_args.len());
        data.extend_from_slice(bytecode);
        data.extend_from_slice(&constructor_args);

        let pending = transport
            .submit(&TxMsg {
                to: None,
                data: Bytes::from(data),
                opts: opts.clone(),
            })
            .await
            .map_err(|e| map_transport_error(&abi, e))?;

        let address = pending.from.create(pending.nonce);
        tracing::info!(
            "Deploying contract at {:?} (tx {:?}, nonce {})",
            address,
            pending.hash,
            pending.nonce
        );
        let handle = ContractHandle::new(address, abi, transport);
        Ok((address, pending, handle))
    }

    /// Decode a single log as `event`.
    pub fn parse_log(&self, event: &str, log: &RawLog) -> Result<EventRecord> {
        let spec = self.abi.event(event)?;
        EventDecoder::new(spec.clone()).decode(log)
    }

    /// Decode a log as whichever declared event its first topic selects.
    /// Anonymous events cannot be recognised this way.
    pub fn parse_any_log(&self, log: &RawLog) -> Result<EventRecord> {
        let selector = log
            .topics
            .first()
            .ok_or_else(|| BindError::Decoding("log has no topics".into()))?;
        let spec = self.abi.event_by_selector(selector).ok_or_else(|| {
            BindError::Decoding(format!("no event with selector {:?} in ABI", selector))
        })?;
        EventDecoder::new(spec.clone()).decode(log)
    }

    /// Historical events matching the filter, ordered by block then log index.
    /// One undecodable log fails the whole query.
    pub async fn filter_logs(&self, spec: &LogFilterSpec) -> Result<Vec<EventRecord>> {
        let event = self.abi.event(&spec.event)?;
        let query = LogQuery::build(self.address, event, spec)?;
        let decoder = EventDecoder::new(event.clone());

        tracing::debug!("Querying {} logs on {:?}", event.signature, self.address);
        let mut logs = self
            .transport
            .query_logs(&query)
            .await
            .map_err(BindError::transport)?;

        let before = logs.len();
        logs.retain(|log| query.matches(log));
        if logs.len() != before {
            tracing::debug!(
                "Discarded {} logs outside the filter",
                before - logs.len()
            );
        }
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        logs.iter().map(|log| decoder.decode(log)).collect()
    }

    /// Open a pull-style live subscription.
    pub async fn subscribe(&self, spec: &LogFilterSpec, opts: &WatchOpts) -> Result<EventStream> {
        let (decoder, subscription) = self.open_subscription(spec, opts).await?;
        Ok(EventStream::new(decoder, subscription))
    }

    /// Forward live events into `sink` from a background task.
    pub async fn watch(
        &self,
        spec: &LogFilterSpec,
        opts: &WatchOpts,
        sink: mpsc::Sender<EventRecord>,
    ) -> Result<WatchHandle> {
        let (decoder, subscription) = self.open_subscription(spec, opts).await?;
        Ok(WatchHandle::spawn(decoder, subscription, sink))
    }

    async fn open_subscription(
        &self,
        spec: &LogFilterSpec,
        opts: &WatchOpts,
    ) -> Result<(EventDecoder, RawSubscription)> {
        let event = self.abi.event(&spec.event)?;
        let query = LogQuery::build(self.address, event, spec)?;

        tracing::debug!("Subscribing to {} on {:?}", event.signature, self.address);
        let subscription = self
            .transport
            .subscribe(&query, opts.buffer.max(1))
            .await
            .map_err(BindError::transport)?;
        Ok((EventDecoder::new(event.clone()), subscription))
    }

    /// Bundle this handle with options reused on every invocation.
    pub fn session(&self, call_opts: CallOpts, transact_opts: TransactOpts) -> ContractSession {
        ContractSession {
            contract: self.clone(),
            call_opts,
            transact_opts,
        }
    }
}

fn json_args(spec: &MethodSpec, params: &Value) -> Result<Vec<DynSolValue>> {
    values::json_to_args(&spec.signature, &spec.inputs, &spec.input_names, params)
}

fn map_transport_error(abi: &AbiDescriptor, err: anyhow::Error) -> BindError {
    match err.downcast_ref::<RevertData>() {
        Some(RevertData(data)) => BindError::Reverted {
            reason: abi.decode_revert(data),
            data: data.clone(),
        },
        None => BindError::transport(err),
    }
}

/// A contract handle with preset call and transaction options.
#[derive(Debug, Clone)]
pub struct ContractSession {
    contract: ContractHandle,
    pub call_opts: CallOpts,
    pub transact_opts: TransactOpts,
}

impl ContractSession {
    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    pub async fn call<T: CallOutput>(&self, method: &str, args: &[DynSolValue]) -> Result<T> {
        self.contract.call(&self.call_opts, method, args).await
    }

    pub async fn transact(&self, method: &str, args: &[DynSolValue]) -> Result<PendingTransaction> {
        self.contract
            .transact(&self.transact_opts, method, args)
            .await
    }

    pub async fn raw_transact(&self, calldata: Bytes) -> Result<PendingTransaction> {
        self.contract
            .raw_transact(&self.transact_opts, calldata)
            .await
    }

    pub async fn transfer(&self) -> Result<PendingTransaction> {
        self.contract.transfer(&self.transact_opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    const ABI: &str = r#"[
        {"type":"function","name":"setOwner","stateMutability":"nonpayable",
         "inputs":[{"name":"owner","type":"address"},{"name":"locked","type":"bool"}],
         "outputs":[]},
        {"type":"error","name":"Unauthorized","inputs":[]}
    ]"#;

    #[test]
    fn test_revert_data_becomes_reverted() {
        let abi = AbiDescriptor::from_json(ABI).unwrap();
        let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
        data.extend(
            DynSolValue::Tuple(vec![DynSolValue::String("not owner".into())]).abi_encode_params(),
        );
        let err = anyhow::Error::new(RevertData(Bytes::from(data.clone())))
            .context("execution reverted");

        match map_transport_error(&abi, err) {
            BindError::Reverted { reason, data: raw } => {
                assert_eq!(reason.as_deref(), Some("not owner"));
                assert_eq!(&raw[..], &data[..]);
            }
            other => panic!("expected revert, got {:?}", other),
        }
    }

    #[test]
    fn test_other_errors_pass_through() {
        let abi = AbiDescriptor::from_json(ABI).unwrap();
        let err = map_transport_error(&abi, anyhow!("timed out"));
        assert!(err.is_transport());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_json_args_by_name_and_position() {
        let abi = AbiDescriptor::from_json(ABI).unwrap();
        let spec = abi.method("setOwner").unwrap();
        let owner = "0x00000000000000000000000000000000000000a1";

        let named = json_args(spec, &json!({ "locked": true, "owner": owner })).unwrap();
        let positional = json_args(spec, &json!([owner, true])).unwrap();
        assert_eq!(named, positional);
        assert_eq!(named[1], DynSolValue::Bool(true));

        assert!(matches!(
            json_args(spec, &json!([owner])),
            Err(BindError::Encoding(_))
        ));
    }
}
