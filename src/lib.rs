//! Typed call, transaction and event bindings for contracts described by a
//! JSON ABI.
//!
//! A [`ContractHandle`] pairs an address with a parsed [`AbiDescriptor`] and
//! a [`Transport`]. Calls and transactions are encoded from `DynSolValue`
//! arguments; events can be queried over a block range or followed live,
//! either pulled from an [`EventStream`] or pushed into a channel through a
//! [`WatchHandle`].

pub mod config;
pub mod error;
pub mod ethereum;

pub use config::Config;
pub use error::{BindError, Result};
pub use ethereum::abi::{AbiDescriptor, AbiRegistry, ContractArtifact};
pub use ethereum::codec::{CallOutput, FromDynValue, NamedOutputs, Outputs};
pub use ethereum::contract::{ContractHandle, ContractSession};
pub use ethereum::filter::{EventDecoder, LogFilterSpec, LogQuery};
pub use ethereum::provider::{
    connect, connect_with_signer, AlloyTransport, RawSubscription, RevertData, Transport,
    Unsubscribe,
};
pub use ethereum::watcher::{EventStream, SubscriptionState, WatchHandle};
pub use ethereum::{
    CallMsg, CallOpts, EventRecord, PendingTransaction, RawLog, TransactOpts, TxMsg, WatchOpts,
};
