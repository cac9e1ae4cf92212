use alloy::primitives::{Address, B256};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokenwatch_core_types::{Chain, DeploymentCandidate, DeploymentEvent, TokenDetails};
use tokenwatch_pipeline::DeploymentInspector;
use tracing::debug;

use crate::abi::{decimals_calldata, decode_decimals, StringGetter};
use crate::rpc::ChainRpc;

/// Resolves receipts and reads ERC20 metadata over each chain's RPC.
#[derive(Clone)]
pub struct RpcDeploymentInspector {
    eth: Arc<dyn ChainRpc>,
    base: Arc<dyn ChainRpc>,
}

impl RpcDeploymentInspector {
    pub fn new(eth: Arc<dyn ChainRpc>, base: Arc<dyn ChainRpc>) -> Self {
        Self { eth, base }
    }

    fn rpc(&self, chain: Chain) -> &Arc<dyn ChainRpc> {
        match chain {
            Chain::Eth => &self.eth,
            Chain::Base => &self.base,
        }
    }

    async fn read_token_details(&self, chain: Chain, address: &str) -> Result<TokenDetails> {
        let token: Address = address
            .parse()
            .with_context(|| format!("invalid contract address {address}"))?;
        let rpc = self.rpc(chain);
        let (name, symbol, decimals) = tokio::join!(
            rpc.call(token, StringGetter::Name.calldata()),
            rpc.call(token, StringGetter::Symbol.calldata()),
            rpc.call(token, decimals_calldata())
        );
        let name = StringGetter::Name
            .decode(&name.context("name() call failed")?)
            .ok_or_else(|| anyhow!("name() returned undecodable data"))?;
        let symbol = StringGetter::Symbol
            .decode(&symbol.context("symbol() call failed")?)
            .ok_or_else(|| anyhow!("symbol() returned undecodable data"))?;
        let decimals = decode_decimals(&decimals.context("decimals() call failed")?)
            .ok_or_else(|| anyhow!("decimals() returned undecodable data"))?;
        Ok(TokenDetails {
            name,
            symbol,
            decimals,
        })
    }
}

#[async_trait]
impl DeploymentInspector for RpcDeploymentInspector {
    async fn resolve_deployment(
        &self,
        candidate: &DeploymentCandidate,
    ) -> Result<Option<DeploymentEvent>> {
        let tx_hash: B256 = candidate
            .tx_hash
            .parse()
            .with_context(|| format!("invalid transaction hash {}", candidate.tx_hash))?;
        let receipt = self
            .rpc(candidate.chain)
            .transaction_receipt(tx_hash)
            .await?;
        let Some(address) = receipt.and_then(|receipt| receipt.contract_address) else {
            return Ok(None);
        };
        Ok(Some(DeploymentEvent {
            deployer: candidate.deployer.clone(),
            address: address.to_string(),
            chain: candidate.chain,
            block_timestamp: candidate.block_timestamp,
        }))
    }

    async fn classify_erc20(&self, chain: Chain, address: &str) -> Option<TokenDetails> {
        match self.read_token_details(chain, address).await {
            Ok(details) => Some(details),
            Err(error) => {
                debug!(
                    chain = %chain,
                    address,
                    error = %format!("{error:#}"),
                    "erc20 metadata lookup failed"
                );
                None
            }
        }
    }
}
