pub mod artifacts;
pub mod chain;
pub mod compiler;
pub mod config;
pub mod deploy;
pub mod error;
pub mod logging;

// Re-export primary types for convenient access.
pub use artifacts::{ArtifactStore, ContractArtifact};
pub use chain::{ChainClient, ContractDeployment, EvmClient};
pub use compiler::SolcCompiler;
pub use config::{ProjectConfig, ResolvedNetwork, validate_url};
pub use deploy::{
    DeploymentRecord, DeploymentReport, Deployer, TokenDeployment, TokenSource,
    verification_command,
};
pub use error::DeployError;
