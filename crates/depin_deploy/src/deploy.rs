//! The deployment procedure: resolve the token, deploy the primary contract.

use std::path::{Path, PathBuf};

use alloy::primitives::utils::{format_ether, parse_units};
use alloy::primitives::{Address, Bytes, TxHash, U256, hex};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::chain::{ChainClient, ContractDeployment};
use crate::error::{DeployError, Result};

/// Environment variable holding a pre-existing token address.
pub const TOKEN_ADDRESS_ENV: &str = "USDC_ADDRESS";

pub const PRIMARY_CONTRACT: &str = "DePinVPN";
pub const MOCK_TOKEN_CONTRACT: &str = "MockERC20";
pub const MOCK_TOKEN_NAME: &str = "Mock USDC";
pub const MOCK_TOKEN_SYMBOL: &str = "mUSDC";
pub const MOCK_TOKEN_DECIMALS: u8 = 6;
/// Whole tokens minted to the deployer after a mock deployment.
pub const MOCK_MINT_TOKENS: u64 = 10_000;

sol! {
    function mint(address to, uint256 amount);
}

/// Where the token address comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Use a token that is already on chain.
    Existing(Address),
    /// Deploy a mock ERC-20 and mint a test balance to the deployer.
    DeployMock,
}

impl TokenSource {
    /// Interpret the raw `USDC_ADDRESS` value. Unset or blank selects the mock.
    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(Self::DeployMock),
            Some(raw) => raw.parse::<Address>().map(Self::Existing).map_err(|e| {
                DeployError::Config(format!("{TOKEN_ADDRESS_ENV} is not a valid address: {e}"))
            }),
        }
    }
}

/// How the token used by the primary contract was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum TokenDeployment {
    Existing {
        address: Address,
    },
    Mock {
        deployment: ContractDeployment,
        mint_tx: TxHash,
        minted: U256,
    },
}

impl TokenDeployment {
    pub fn address(&self) -> Address {
        match self {
            Self::Existing { address } => *address,
            Self::Mock { deployment, .. } => deployment.address,
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Self::Mock { .. })
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub chain_id: u64,
    pub deployer: Address,
    pub token: TokenDeployment,
    pub primary: ContractDeployment,
}

/// Amount minted by the mock token: 10000 whole tokens at 6 decimals.
pub fn mock_mint_amount() -> Result<U256> {
    parse_units(&MOCK_MINT_TOKENS.to_string(), MOCK_TOKEN_DECIMALS)
        .map(|units| units.get_absolute())
        .map_err(|e| DeployError::Config(format!("mint amount: {e}")))
}

/// Runs the deployment against `client`.
///
/// Steps run strictly in order and the first failure aborts the run; nothing
/// is retried or rolled back.
pub struct Deployer<'a, C: ChainClient + ?Sized> {
    client: &'a C,
    artifacts: &'a ArtifactStore,
    expected_chain_id: Option<u64>,
}

impl<'a, C: ChainClient + ?Sized> Deployer<'a, C> {
    pub fn new(client: &'a C, artifacts: &'a ArtifactStore) -> Self {
        Self {
            client,
            artifacts,
            expected_chain_id: None,
        }
    }

    /// Refuse to send anything if the endpoint reports a different chain.
    pub fn expect_chain_id(mut self, chain_id: Option<u64>) -> Self {
        self.expected_chain_id = chain_id;
        self
    }

    pub async fn run(&self, token: TokenSource) -> Result<DeploymentReport> {
        let deployer = self.client.signer();
        info!(%deployer, "deploying with account");

        let chain_id = self.check_chain().await?;
        let balance = self.client.balance(deployer).await?;
        if balance.is_zero() {
            warn!(%deployer, "deployer has no native balance, transactions will likely fail");
        } else {
            info!(balance = %format_ether(balance), "deployer balance");
        }

        // Look everything up before the first transaction goes out.
        let primary_artifact = self.artifacts.get(PRIMARY_CONTRACT)?;
        let primary_code = primary_artifact.creation_code()?;

        let token = match token {
            TokenSource::Existing(address) => {
                info!(%address, "using token address from {TOKEN_ADDRESS_ENV}");
                TokenDeployment::Existing { address }
            }
            TokenSource::DeployMock => {
                info!(
                    "no {TOKEN_ADDRESS_ENV} provided, deploying {MOCK_TOKEN_CONTRACT} as {MOCK_TOKEN_SYMBOL}"
                );
                self.deploy_mock_token(deployer).await?
            }
        };

        let args = primary_constructor_args(token.address());
        let init_code = with_constructor_args(&primary_code, &args);
        let primary = self.client.deploy(PRIMARY_CONTRACT, init_code).await?;
        info!(address = %primary.address, tx = %primary.tx_hash, "{PRIMARY_CONTRACT} deployed");

        Ok(DeploymentReport {
            chain_id,
            deployer,
            token,
            primary,
        })
    }

    async fn check_chain(&self) -> Result<u64> {
        let actual = self.client.chain_id().await?;
        if let Some(expected) = self.expected_chain_id {
            if expected != actual {
                return Err(DeployError::ChainMismatch { expected, actual });
            }
        }
        info!(chain_id = actual, "connected");
        Ok(actual)
    }

    async fn deploy_mock_token(&self, deployer: Address) -> Result<TokenDeployment> {
        let code = self.artifacts.get(MOCK_TOKEN_CONTRACT)?.creation_code()?;
        let args =
            (MOCK_TOKEN_NAME.to_string(), MOCK_TOKEN_SYMBOL.to_string()).abi_encode_params();
        let deployment = self
            .client
            .deploy(MOCK_TOKEN_CONTRACT, with_constructor_args(&code, &args))
            .await?;
        info!(address = %deployment.address, "{MOCK_TOKEN_CONTRACT} deployed");

        let minted = mock_mint_amount()?;
        let calldata = mintCall {
            to: deployer,
            amount: minted,
        }
        .abi_encode();
        let mint_tx = self
            .client
            .send("mint", deployment.address, calldata.into())
            .await?;
        info!(to = %deployer, amount = %minted, tx = %mint_tx, "minted test tokens");

        Ok(TokenDeployment::Mock {
            deployment,
            mint_tx,
            minted,
        })
    }
}

/// ABI encoding of the primary contract's single constructor argument.
pub fn primary_constructor_args(token: Address) -> Vec<u8> {
    token.abi_encode()
}

fn with_constructor_args(code: &[u8], args: &[u8]) -> Bytes {
    let mut init_code = Vec::with_capacity(code.len() + args.len());
    init_code.extend_from_slice(code);
    init_code.extend_from_slice(args);
    init_code.into()
}

/// Suggested command for verifying the primary contract on a block explorer.
pub fn verification_command(
    network: &str,
    solc_version: &str,
    source: &str,
    report: &DeploymentReport,
) -> String {
    format!(
        "forge verify-contract --chain {network} --compiler-version v{solc_version} \
         --constructor-args 0x{} {} {source}",
        hex::encode(primary_constructor_args(report.token.address())),
        report.primary.address,
    )
}

// ---------------------------------------------------------------------------
// Deployment record
// ---------------------------------------------------------------------------

/// A finished deployment as written to `deployments/<network>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub network: String,
    pub deployed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: DeploymentReport,
}

impl DeploymentRecord {
    pub fn new(network: &str, report: DeploymentReport) -> Self {
        Self {
            network: network.to_string(),
            deployed_at: Utc::now(),
            report,
        }
    }

    /// Write the record to `<dir>/<network>.json`, replacing any previous
    /// record for the same network. Returns the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.network));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "deployment record saved");
        Ok(path)
    }

    #[cfg(test)]
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
