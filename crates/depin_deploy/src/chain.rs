use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::Http;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ResolvedNetwork;
use crate::error::{DeployError, Result};

/// A contract creation that has been mined successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDeployment {
    pub contract: String,
    pub address: Address,
    pub tx_hash: TxHash,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

/// Everything the deployment procedure needs from a network.
///
/// Every state-changing call waits until the transaction is mined and fails
/// with [`DeployError::Reverted`] if the receipt reports failure.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the account that signs and pays for transactions.
    fn signer(&self) -> Address;

    async fn chain_id(&self) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// Submit a contract creation with `init_code` (bytecode followed by the
    /// ABI-encoded constructor arguments).
    async fn deploy(&self, contract: &str, init_code: Bytes) -> Result<ContractDeployment>;

    /// Submit a call to `to` with `calldata`. `action` names the call in
    /// logs and errors.
    async fn send(&self, action: &str, to: Address, calldata: Bytes) -> Result<TxHash>;
}

// ---------------------------------------------------------------------------
// JSON-RPC client
// ---------------------------------------------------------------------------

/// [`ChainClient`] backed by an HTTP JSON-RPC endpoint and a local
/// private-key signer.
pub struct EvmClient {
    provider: DynProvider,
    signer: Address,
    network: String,
}

impl std::fmt::Debug for EvmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmClient")
            .field("network", &self.network)
            .field("signer", &self.signer)
            .finish()
    }
}

impl EvmClient {
    /// Connect to the network's RPC endpoint with its signing key.
    ///
    /// No request is made here; the first RPC round-trip happens on the
    /// first query.
    pub fn connect(network: &ResolvedNetwork) -> Result<Self> {
        // The parse error can echo key material, so it is not forwarded.
        let signer: PrivateKeySigner = network.private_key.parse().map_err(|_| {
            DeployError::Config(format!("network '{}': invalid private key", network.name))
        })?;
        let address = signer.address();

        let http = reqwest::Client::builder()
            .timeout(network.timeout)
            .build()
            .map_err(|e| DeployError::Rpc(format!("failed to build HTTP client: {e}")))?;
        let transport = Http::with_client(http, network.url.clone());
        let client = RpcClient::new(transport, false);

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_client(client)
            .erased();

        debug!(network = %network.name, signer = %address, "RPC client ready");
        Ok(Self {
            provider,
            signer: address,
            network: network.name.clone(),
        })
    }

    async fn submit(&self, action: &str, tx: TransactionRequest) -> Result<TransactionReceipt> {
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| DeployError::Rpc(format!("{action}: {e}")))?;
        let tx_hash = *pending.tx_hash();
        info!(%tx_hash, action, "transaction submitted, waiting for inclusion");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| DeployError::Rpc(format!("{action}: {e}")))?;
        if !receipt.status() {
            return Err(DeployError::Reverted {
                action: action.to_string(),
                tx_hash,
            });
        }
        debug!(
            %tx_hash,
            action,
            gas_used = receipt.gas_used,
            block = ?receipt.block_number,
            "transaction mined"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| DeployError::Rpc(format!("eth_chainId: {e}")))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| DeployError::Rpc(format!("eth_getBalance: {e}")))
    }

    async fn deploy(&self, contract: &str, init_code: Bytes) -> Result<ContractDeployment> {
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_deploy_code(init_code);
        let action = format!("deploy {contract}");
        let receipt = self.submit(&action, tx).await?;

        let address = receipt.contract_address.ok_or_else(|| {
            DeployError::Rpc(format!(
                "{action}: receipt {} carries no contract address",
                receipt.transaction_hash
            ))
        })?;

        Ok(ContractDeployment {
            contract: contract.to_string(),
            address,
            tx_hash: receipt.transaction_hash,
            gas_used: receipt.gas_used,
            block_number: receipt.block_number,
        })
    }

    async fn send(&self, action: &str, to: Address, calldata: Bytes) -> Result<TxHash> {
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_to(to)
            .with_input(calldata);
        let receipt = self.submit(action, tx).await?;
        Ok(receipt.transaction_hash)
    }
}
