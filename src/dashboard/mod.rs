pub mod client;
pub mod contract;
pub mod poller;
pub mod sink;

#[cfg(test)]
mod mock;

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{DashboardError, Result};
use client::{ChainReader, Client};
use contract::ContractHandle;
use poller::Poller;
use sink::{RefreshSink, RefreshUpdate};

/// One dashboard session: a contract handle, the refresh sink the view reads,
/// and the single poller feeding it.
pub struct Dashboard<R: ChainReader> {
    contract: ContractHandle,
    sink: RefreshSink,
    poller: Poller<R>,
}

impl Dashboard<Client> {
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = Client::new(&config.endpoint);
        Self::with_reader(Arc::new(client), config).await
    }
}

impl<R: ChainReader> Dashboard<R> {
    /// Builds the session. Configuration problems fail here, before polling
    /// begins.
    pub async fn with_reader(reader: Arc<R>, config: &Config) -> Result<Self> {
        let endpoint = &config.endpoint;
        let contract = ContractHandle::new(endpoint.abi.clone(), &endpoint.contract_address)?;
        info!(
            network = %endpoint.network_name,
            address = %contract.address(),
            functions = contract.abi().functions().count(),
            "contract handle ready"
        );

        if let Some(expected) = endpoint.chain_id {
            match reader.chain_id().await {
                Ok(actual) if actual != expected => {
                    return Err(DashboardError::config(format!(
                        "node at {} reports chain id {actual}, network `{}` expects {expected}",
                        endpoint.provider_url, endpoint.network_name
                    )));
                }
                Ok(_) => {}
                Err(err) => warn!(%err, expected, "could not verify chain id"),
            }
        }

        let metadata = contract.metadata(reader.as_ref()).await;
        let sink = RefreshSink::new();
        sink.update(RefreshUpdate::contract(contract.clone()).with_metadata(metadata));

        let poller = Poller::new(reader, sink.clone(), config.poller.clone());
        Ok(Self { contract, sink, poller })
    }

    pub fn sink(&self) -> &RefreshSink {
        &self.sink
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    pub fn poller(&self) -> &Poller<R> {
        &self.poller
    }

    pub fn start(&mut self) -> Result<()> {
        self.poller.start()
    }

    pub fn stop(&mut self) {
        self.poller.stop();
    }
}
