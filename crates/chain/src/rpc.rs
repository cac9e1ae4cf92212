use alloy::network::TransactionResponse;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, TransactionInput, TransactionRequest};
use alloy::transports::http::{Client, Http};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::future::IntoFuture;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTransaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcBlock {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReceipt {
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    /// `Ok(None)` when the node does not have the block yet.
    async fn block_with_transactions(&self, number: u64) -> Result<Option<RpcBlock>>;

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<RpcReceipt>>;

    /// `eth_call` against the latest block; returns the raw return data.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes>;
}

/// HTTP JSON-RPC node access through an alloy provider.
#[derive(Clone, Debug)]
pub struct JsonRpcClient {
    provider: RootProvider<Http<Client>>,
    endpoint: String,
    timeout: Duration,
}

impl JsonRpcClient {
    pub fn new(endpoint: &str, timeout_ms: u64) -> Result<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(anyhow!("rpc endpoint must not be empty"));
        }
        let url: reqwest::Url = endpoint
            .parse()
            .map_err(|_| anyhow!("rpc endpoint is not a valid url"))?;
        Ok(Self {
            provider: ProviderBuilder::new().on_http(url.clone()),
            endpoint: url.to_string(),
            timeout: Duration::from_millis(timeout_ms.max(1)),
        })
    }

    /// Runs one provider request under the client timeout. Provider URLs
    /// embed the API key, so the endpoint is scrubbed from error text.
    async fn request<T, E, F>(&self, method: &str, call: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(anyhow!(
                "rpc method {method} failed: {}",
                self.scrub(&error.to_string())
            )),
            Err(_) => Err(anyhow!(
                "rpc method {method} timed out after {}ms",
                self.timeout.as_millis()
            )),
        }
    }

    fn scrub(&self, message: &str) -> String {
        let trimmed = self.endpoint.trim_end_matches('/');
        message
            .replace(&self.endpoint, "<rpc-endpoint>")
            .replace(trimmed, "<rpc-endpoint>")
    }
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn block_number(&self) -> Result<u64> {
        self.request("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn block_with_transactions(&self, number: u64) -> Result<Option<RpcBlock>> {
        let block = self
            .request(
                "eth_getBlockByNumber",
                self.provider
                    .get_block_by_number(number.into(), BlockTransactionsKind::Full),
            )
            .await?;
        let Some(block) = block else {
            return Ok(None);
        };
        let timestamp = block_timestamp(block.header.timestamp)?;
        let transactions = block
            .transactions
            .into_transactions()
            .map(|tx| RpcTransaction {
                hash: TransactionResponse::tx_hash(&tx),
                from: TransactionResponse::from(&tx),
                to: alloy::consensus::Transaction::to(&tx),
            })
            .collect();
        Ok(Some(RpcBlock {
            number: block.header.number,
            timestamp,
            transactions,
        }))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<RpcReceipt>> {
        let receipt = self
            .request(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(tx_hash),
            )
            .await?;
        Ok(receipt.map(|receipt| RpcReceipt {
            contract_address: receipt.contract_address,
            block_number: receipt.block_number,
        }))
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes> {
        let request = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(input));
        self.request("eth_call", self.provider.call(&request)).await
    }
}

pub fn block_timestamp(secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| anyhow!("block timestamp out of range: {secs}"))
        .context("invalid block header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_or_malformed_endpoint() {
        assert!(JsonRpcClient::new("  ", 1_000).is_err());
        let error = JsonRpcClient::new("not a url", 1_000).expect_err("malformed endpoint");
        assert!(error.to_string().contains("valid url"));
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_endpoint() {
        let client = JsonRpcClient::new("http://127.0.0.1:1/v2/secretkey", 2_000)
            .expect("client");
        let error = client.block_number().await.expect_err("nothing listens on port 1");
        let text = format!("{error:#}");
        assert!(text.contains("eth_blockNumber"));
        assert!(!text.contains("secretkey"));
    }

    #[test]
    fn converts_header_timestamp() {
        let timestamp = block_timestamp(0x65e1c2c0).expect("timestamp");
        assert_eq!(timestamp.timestamp(), 0x65e1c2c0);
        assert!(block_timestamp(u64::MAX).is_err());
    }
}
