use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, B256, U64};
use alloy::rpc::{
    client::{ClientBuilder, ReqwestClient},
    types::Block,
};
use async_trait::async_trait;
use serde_json::json;

use crate::config::EndpointConfig;
use crate::error::{DashboardError, Result};

/// Read-only view of a node.
///
/// Implementations perform no retries and enforce no deadlines; both are
/// left to the caller.
#[async_trait]
pub trait ChainReader: Send + Sync + 'static {
    async fn get_block_number(&self) -> Result<u64>;

    async fn get_block(&self, tag: BlockNumberOrTag) -> Result<BlockSnapshot>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes>;

    async fn chain_id(&self) -> Result<u64>;
}

/// The subset of a block header the dashboard shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub number: u64,
    pub timestamp: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub miner: Address,
}

impl TryFrom<Block> for BlockSnapshot {
    type Error = DashboardError;

    fn try_from(block: Block) -> Result<Self> {
        let header = block.header;
        let number = header
            .number
            .ok_or_else(|| DashboardError::parse("block has no number"))?;
        let hash = header
            .hash
            .ok_or_else(|| DashboardError::parse("block has no hash"))?;
        Ok(Self {
            number,
            timestamp: header.timestamp,
            hash,
            parent_hash: header.parent_hash,
            miner: header.miner,
        })
    }
}

/// JSON-RPC client for a single node.
#[derive(Debug, Clone)]
pub struct Client(ReqwestClient);

impl Client {
    pub fn new(config: &EndpointConfig) -> Self {
        // Instantiate a new client over a HTTP transport.
        let client = ClientBuilder::default().http(config.provider_url.clone());
        Self(client)
    }
}

#[async_trait]
impl ChainReader for Client {
    async fn get_block_number(&self) -> Result<u64> {
        let number: U64 = self.0.request("eth_blockNumber", ()).await?;
        Ok(number.to::<u64>())
    }

    async fn get_block(&self, tag: BlockNumberOrTag) -> Result<BlockSnapshot> {
        let block: Option<Block> = self
            .0
            .request("eth_getBlockByNumber", (tag, false))
            .await?;
        block
            .ok_or_else(|| DashboardError::parse(format!("node has no block for tag {tag}")))?
            .try_into()
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes> {
        let tx = json!({ "to": to, "data": input });
        let output: Bytes = self
            .0
            .request("eth_call", (tx, BlockNumberOrTag::Latest))
            .await?;
        Ok(output)
    }

    async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.0.request("eth_chainId", ()).await?;
        Ok(id.to::<u64>())
    }
}
