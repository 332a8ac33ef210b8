//! Scripted [`ChainReader`]s for tests.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use super::client::{BlockSnapshot, ChainReader};
use crate::error::{DashboardError, Result};

pub(crate) fn snapshot(number: u64) -> BlockSnapshot {
    BlockSnapshot {
        number,
        timestamp: 1_700_000_000 + number * 12,
        hash: B256::with_last_byte((number % 256) as u8),
        parent_hash: B256::with_last_byte((number.wrapping_sub(1) % 256) as u8),
        miner: Address::ZERO,
    }
}

fn block_for(tag: BlockNumberOrTag) -> Result<BlockSnapshot> {
    match tag {
        BlockNumberOrTag::Number(number) => Ok(snapshot(number)),
        other => Err(DashboardError::parse(format!("unexpected tag {other}"))),
    }
}

/// Answers `get_block_number` from a fixed script, then fails.
pub(crate) struct ScriptedReader {
    script: Mutex<VecDeque<Result<u64>>>,
    calls: AtomicUsize,
    chain_id: u64,
}

impl ScriptedReader {
    pub(crate) fn new(script: impl IntoIterator<Item = Result<u64>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
            chain_id: 1,
        }
    }

    pub(crate) fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for ScriptedReader {
    async fn get_block_number(&self) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(DashboardError::network("script exhausted", false)))
    }

    async fn get_block(&self, tag: BlockNumberOrTag) -> Result<BlockSnapshot> {
        block_for(tag)
    }

    async fn call(&self, _to: Address, _input: Bytes) -> Result<Bytes> {
        Err(DashboardError::network("execution reverted", false))
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }
}

/// Blocks inside `get_block_number` until released.
pub(crate) struct GatedReader {
    number: u64,
    entered: Notify,
    release: Notify,
}

impl GatedReader {
    pub(crate) fn new(number: u64) -> Self {
        Self { number, entered: Notify::new(), release: Notify::new() }
    }

    /// Resolves once a fetch is waiting at the gate.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl ChainReader for GatedReader {
    async fn get_block_number(&self) -> Result<u64> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.number)
    }

    async fn get_block(&self, tag: BlockNumberOrTag) -> Result<BlockSnapshot> {
        block_for(tag)
    }

    async fn call(&self, _to: Address, _input: Bytes) -> Result<Bytes> {
        Err(DashboardError::network("execution reverted", false))
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(1)
    }
}
