//! EVM chain access: JSON-RPC transport, ERC20 metadata probing and the
//! per-chain block watcher that feeds the dispatch queue.

pub mod abi;
pub mod inspector;
pub mod rpc;
pub mod watcher;

pub use inspector::RpcDeploymentInspector;
pub use rpc::{ChainRpc, JsonRpcClient, RpcBlock, RpcReceipt, RpcTransaction};
pub use watcher::{BlockWatcher, WatchSummary, WatcherExit};
