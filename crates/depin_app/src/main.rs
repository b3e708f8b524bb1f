use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use depin_deploy::config::{DEFAULT_CONFIG_FILE, DEFAULT_NETWORK};
use depin_deploy::deploy::{MOCK_TOKEN_CONTRACT, PRIMARY_CONTRACT, TOKEN_ADDRESS_ENV};
use depin_deploy::{
    ArtifactStore, ChainClient, DeploymentRecord, DeploymentReport, Deployer, EvmClient,
    ProjectConfig, SolcCompiler, TokenDeployment, TokenSource, logging, verification_command,
};

/// Compile the contracts and deploy DePinVPN, with a mock token if needed.
#[derive(Debug, Parser)]
#[command(name = "depin-deploy", version)]
struct Cli {
    /// Network entry from the config file to deploy to.
    #[arg(long, default_value = DEFAULT_NETWORK)]
    network: String,

    /// Project config file. Defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Reuse artifacts from the last compilation instead of running solc.
    #[arg(long)]
    skip_compile: bool,

    /// Do not write deployments/<network>.json.
    #[arg(long)]
    no_record: bool,

    /// Also write logs to daily files in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

const ENV_FILE: &str = ".env";

/// Load variables from a dotenv file. A missing file is fine since the
/// variables may come from the shell; a malformed one is an error.
fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to load {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_file = load_env_file(Path::new(ENV_FILE));

    let cli = Cli::parse();
    let _guard = match logging::init_logging(cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = env_file {
        error!("{e:#}");
        eprintln!("Error: {e:?}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = std::env::current_dir().context("cannot determine working directory")?;
    let config = ProjectConfig::load_or_default(&root.join(&cli.config))?;

    let artifacts = load_artifacts(&config, &root, cli.skip_compile).await?;

    let network = config.network(&cli.network, |key| std::env::var(key).ok())?;
    let token = TokenSource::from_env_value(std::env::var(TOKEN_ADDRESS_ENV).ok().as_deref())?;
    info!(network = %network.name, "network resolved");

    let client = EvmClient::connect(&network)?;
    println!("Deploying with: {}", client.signer());

    let report = Deployer::new(&client, &artifacts)
        .expect_chain_id(network.chain_id)
        .run(token)
        .await
        .with_context(|| format!("deployment to {} failed", network.name))?;
    info!(
        primary = %report.primary.address,
        token = %report.token.address(),
        mock_token = report.token.is_mock(),
        "deployment finished"
    );

    let source = artifacts.get(PRIMARY_CONTRACT)?.fully_qualified_name();
    print_summary(&report);
    println!();
    println!("To verify on Etherscan (optional):");
    println!(
        "{}",
        verification_command(&network.name, &config.solidity.version, &source, &report)
    );

    if !cli.no_record {
        let dir = root.join(&config.paths.deployments);
        let path = DeploymentRecord::new(&network.name, report)
            .save(&dir)
            .context("failed to write deployment record")?;
        println!();
        println!("Deployment record: {}", path.display());
    }
    Ok(())
}

async fn load_artifacts(
    config: &ProjectConfig,
    root: &Path,
    skip_compile: bool,
) -> Result<ArtifactStore> {
    let dir = root.join(&config.paths.artifacts);
    if skip_compile {
        let artifacts = ArtifactStore::load_dir(&dir).context("failed to load artifacts")?;
        let names: Vec<&str> = artifacts.names().collect();
        info!(contracts = ?names, "reusing compiled artifacts");
        return Ok(artifacts);
    }

    let artifacts = SolcCompiler::from_config(config, root)
        .compile()
        .await
        .context("failed to compile contracts")?;
    artifacts.write_dir(&dir)?;
    Ok(artifacts)
}

fn print_summary(report: &DeploymentReport) {
    match &report.token {
        TokenDeployment::Mock { deployment, .. } => {
            println!("{MOCK_TOKEN_CONTRACT} deployed at {}", deployment.address);
        }
        TokenDeployment::Existing { address } => {
            println!("Using USDC address from {TOKEN_ADDRESS_ENV}: {address}");
        }
    }
    println!("{PRIMARY_CONTRACT} deployed to: {}", report.primary.address);
    println!("USDC used: {}", report.token.address());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["depin-deploy"]).unwrap();
        assert_eq!(cli.network, "sepolia");
        assert_eq!(cli.config, PathBuf::from("deploy.toml"));
        assert!(!cli.skip_compile);
        assert!(!cli.no_record);
        assert!(cli.log_dir.is_none());
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::try_parse_from([
            "depin-deploy",
            "--network",
            "local",
            "--skip-compile",
            "--no-record",
            "--log-dir",
            "logs",
        ])
        .unwrap();
        assert_eq!(cli.network, "local");
        assert!(cli.skip_compile);
        assert!(cli.no_record);
        assert_eq!(cli.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_env_file(&tmp.path().join(".env")).is_ok());
    }

    #[test]
    fn malformed_env_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "PRIVATE_KEY='unterminated\n").unwrap();

        let err = load_env_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to load"), "got: {err:#}");
    }

    #[test]
    fn env_file_values_are_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "DEPIN_APP_ENV_FILE_CHECK=loaded\n").unwrap();

        load_env_file(&path).unwrap();
        assert_eq!(
            std::env::var("DEPIN_APP_ENV_FILE_CHECK").as_deref(),
            Ok("loaded")
        );
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
