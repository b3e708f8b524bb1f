//! Solidity compilation through `solc --standard-json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use ignore::WalkBuilder;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactStore, ContractArtifact};
use crate::config::{OptimizerConfig, ProjectConfig};
use crate::error::{DeployError, Result};

// ---------------------------------------------------------------------------
// solc standard-json output (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SolcOutput {
    #[serde(default)]
    errors: Vec<SolcDiagnostic>,
    #[serde(default)]
    contracts: BTreeMap<String, BTreeMap<String, SolcContract>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolcDiagnostic {
    severity: String,
    message: String,
    formatted_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SolcContract {
    #[serde(default)]
    abi: serde_json::Value,
    evm: Option<SolcEvm>,
}

#[derive(Debug, Deserialize)]
struct SolcEvm {
    bytecode: Option<SolcBytecode>,
}

#[derive(Debug, Deserialize)]
struct SolcBytecode {
    #[serde(default)]
    object: String,
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Runs the configured `solc` binary over the project's sources.
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    solc: PathBuf,
    version: String,
    optimizer: OptimizerConfig,
    evm_version: Option<String>,
    root: PathBuf,
    sources: PathBuf,
    include: Vec<PathBuf>,
}

impl SolcCompiler {
    /// Build a compiler for the project rooted at `root`. Relative paths in
    /// the config are taken relative to `root`.
    pub fn from_config(config: &ProjectConfig, root: &Path) -> Self {
        Self {
            solc: config.solidity.solc.clone(),
            version: config.solidity.version.clone(),
            optimizer: config.solidity.optimizer,
            evm_version: config.solidity.evm_version.clone(),
            root: root.to_path_buf(),
            sources: root.join(&config.paths.sources),
            include: config
                .paths
                .include
                .iter()
                .map(|p| root.join(p))
                .collect(),
        }
    }

    /// Compile every source file and return the resulting artifacts.
    pub async fn compile(&self) -> Result<ArtifactStore> {
        self.check_version().await?;

        let sources = self.discover_sources()?;
        info!(
            files = sources.len(),
            solc = %self.version,
            optimizer = self.optimizer.enabled,
            "compiling contracts"
        );

        let input = self.standard_json_input(&sources)?;
        let output = self.run_standard_json(&input).await?;
        let store = parse_output(&output)?;
        info!(contracts = store.len(), "compilation finished");
        Ok(store)
    }

    /// Collect `*.sol` files below the sources directory, keyed by their path
    /// relative to the project root.
    fn discover_sources(&self) -> Result<BTreeMap<String, String>> {
        if !self.sources.is_dir() {
            return Err(DeployError::Compile(format!(
                "sources directory {} does not exist",
                self.sources.display()
            )));
        }

        let mut sources = BTreeMap::new();
        // Every source under the directory is compiled; only dotfiles are
        // skipped, ignore files are not consulted.
        let walker = WalkBuilder::new(&self.sources)
            .standard_filters(false)
            .hidden(true)
            .build();
        for entry in walker {
            let entry = entry.map_err(|e| DeployError::Compile(e.to_string()))?;
            let path = entry.path();
            let is_file = entry.file_type().is_some_and(|t| t.is_file());
            if !is_file || path.extension().and_then(|e| e.to_str()) != Some("sol") {
                continue;
            }

            let key = source_key(&self.root, path);
            debug!(source = %key, "found source");
            sources.insert(key, std::fs::read_to_string(path)?);
        }

        if sources.is_empty() {
            return Err(DeployError::Compile(format!(
                "no Solidity sources found in {}",
                self.sources.display()
            )));
        }
        Ok(sources)
    }

    fn standard_json_input(&self, sources: &BTreeMap<String, String>) -> Result<String> {
        let sources: serde_json::Map<String, serde_json::Value> = sources
            .iter()
            .map(|(name, content)| (name.clone(), serde_json::json!({ "content": content })))
            .collect();

        let mut settings = serde_json::json!({
            "optimizer": {
                "enabled": self.optimizer.enabled,
                "runs": self.optimizer.runs,
            },
            "outputSelection": {
                "*": { "*": ["abi", "evm.bytecode.object"] }
            }
        });
        if let Some(evm_version) = &self.evm_version {
            settings["evmVersion"] = serde_json::Value::String(evm_version.clone());
        }

        let input = serde_json::json!({
            "language": "Solidity",
            "sources": sources,
            "settings": settings,
        });
        Ok(serde_json::to_string(&input)?)
    }

    /// Make sure the `solc` on hand is the version the sources target.
    async fn check_version(&self) -> Result<()> {
        let output = Command::new(&self.solc)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                DeployError::Compile(format!("cannot run {}: {e}", self.solc.display()))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let found = parse_solc_version(&stdout).ok_or_else(|| {
            DeployError::Compile(format!(
                "unrecognized `{} --version` output",
                self.solc.display()
            ))
        })?;

        if found != self.version {
            return Err(DeployError::Compile(format!(
                "solc {found} found, but the project requires {}",
                self.version
            )));
        }
        debug!(version = %found, "solc version ok");
        Ok(())
    }

    async fn run_standard_json(&self, input: &str) -> Result<String> {
        let mut cmd = Command::new(&self.solc);
        cmd.arg("--standard-json")
            .arg("--base-path")
            .arg(&self.root)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for path in self.include.iter().filter(|p| p.is_dir()) {
            cmd.arg("--include-path").arg(path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            DeployError::Compile(format!("cannot run {}: {e}", self.solc.display()))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(DeployError::Compile(format!(
                "solc exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Turn solc standard-json output into artifacts.
///
/// Any diagnostic with severity `error` fails the whole compilation; warnings
/// and infos are logged.
pub fn parse_output(output: &str) -> Result<ArtifactStore> {
    let parsed: SolcOutput = serde_json::from_str(output)
        .map_err(|e| DeployError::Compile(format!("unreadable solc output: {e}")))?;

    let mut errors = Vec::new();
    for diagnostic in &parsed.errors {
        let text = diagnostic
            .formatted_message
            .as_deref()
            .unwrap_or(&diagnostic.message)
            .trim();
        if diagnostic.severity.eq_ignore_ascii_case("error") {
            errors.push(text.to_string());
        } else {
            warn!("solc {}: {text}", diagnostic.severity);
        }
    }
    if !errors.is_empty() {
        return Err(DeployError::Compile(errors.join("\n")));
    }

    let mut store = ArtifactStore::new();
    for (source_name, contracts) in parsed.contracts {
        for (contract_name, contract) in contracts {
            let bytecode = contract
                .evm
                .and_then(|evm| evm.bytecode)
                .map(|b| b.object)
                .unwrap_or_default();
            store.insert(ContractArtifact {
                contract_name,
                source_name: source_name.clone(),
                abi: contract.abi,
                bytecode,
            });
        }
    }
    Ok(store)
}

/// Extract `0.8.20` from `solc --version` output such as
/// `Version: 0.8.20+commit.a1b79de6.Linux.g++`.
pub fn parse_solc_version(output: &str) -> Option<String> {
    let line = output.lines().find_map(|l| l.trim().strip_prefix("Version:"))?;
    let version = line.trim().split(['+', '-']).next()?.trim();
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Source unit name solc sees: the path relative to the project root, with
/// forward slashes.
fn source_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn compiler_for(root: &Path) -> SolcCompiler {
        SolcCompiler::from_config(&ProjectConfig::default(), root)
    }

    #[test]
    fn parse_version_from_solc_banner() {
        let banner = "solc, the solidity compiler commandline interface\n\
                      Version: 0.8.20+commit.a1b79de6.Linux.g++\n";
        assert_eq!(parse_solc_version(banner).as_deref(), Some("0.8.20"));
    }

    #[test]
    fn parse_version_rejects_unrelated_output() {
        assert_eq!(parse_solc_version("command not found"), None);
        assert_eq!(parse_solc_version("Version: "), None);
    }

    #[test]
    fn discover_sources_walks_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let contracts = tmp.path().join("contracts");
        fs::create_dir_all(contracts.join("mocks")).unwrap();
        fs::write(contracts.join("DePinVPN.sol"), "contract DePinVPN {}").unwrap();
        fs::write(contracts.join("mocks").join("MockERC20.sol"), "contract MockERC20 {}").unwrap();
        fs::write(contracts.join("notes.md"), "not solidity").unwrap();

        let sources = compiler_for(tmp.path()).discover_sources().unwrap();
        let keys: Vec<&str> = sources.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["contracts/DePinVPN.sol", "contracts/mocks/MockERC20.sol"]
        );
        assert_eq!(sources["contracts/DePinVPN.sol"], "contract DePinVPN {}");
    }

    #[test]
    fn discover_sources_disregards_ignore_files() {
        let tmp = tempfile::tempdir().unwrap();
        let contracts = tmp.path().join("contracts");
        fs::create_dir_all(contracts.join("mocks")).unwrap();
        fs::write(contracts.join(".ignore"), "mocks/\n").unwrap();
        fs::write(contracts.join(".gitignore"), "*.sol\n").unwrap();
        fs::write(contracts.join("DePinVPN.sol"), "contract DePinVPN {}").unwrap();
        fs::write(contracts.join("mocks").join("MockERC20.sol"), "contract MockERC20 {}").unwrap();

        let sources = compiler_for(tmp.path()).discover_sources().unwrap();
        let keys: Vec<&str> = sources.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["contracts/DePinVPN.sol", "contracts/mocks/MockERC20.sol"]
        );
    }

    #[test]
    fn discover_sources_requires_at_least_one_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("contracts")).unwrap();
        let err = compiler_for(tmp.path()).discover_sources().unwrap_err();
        assert!(err.to_string().contains("no Solidity sources"), "got: {err}");
    }

    #[test]
    fn discover_sources_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            compiler_for(tmp.path()).discover_sources(),
            Err(DeployError::Compile(_))
        ));
    }

    #[test]
    fn standard_json_input_carries_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ProjectConfig::default();
        config.solidity.optimizer.enabled = true;
        config.solidity.evm_version = Some("paris".into());
        let compiler = SolcCompiler::from_config(&config, tmp.path());

        let mut sources = BTreeMap::new();
        sources.insert("contracts/A.sol".to_string(), "contract A {}".to_string());
        let input: serde_json::Value =
            serde_json::from_str(&compiler.standard_json_input(&sources).unwrap()).unwrap();

        assert_eq!(input["language"], "Solidity");
        assert_eq!(input["sources"]["contracts/A.sol"]["content"], "contract A {}");
        assert_eq!(input["settings"]["optimizer"]["enabled"], true);
        assert_eq!(input["settings"]["optimizer"]["runs"], 200);
        assert_eq!(input["settings"]["evmVersion"], "paris");
        assert_eq!(
            input["settings"]["outputSelection"]["*"]["*"][1],
            "evm.bytecode.object"
        );
    }

    #[test]
    fn parse_output_collects_contracts() {
        let output = serde_json::json!({
            "errors": [
                { "severity": "warning", "message": "SPDX license identifier not provided" }
            ],
            "contracts": {
                "contracts/DePinVPN.sol": {
                    "DePinVPN": {
                        "abi": [{ "type": "constructor", "inputs": [{ "name": "token", "type": "address" }] }],
                        "evm": { "bytecode": { "object": "6080604052" } }
                    }
                },
                "contracts/IVault.sol": {
                    "IVault": { "abi": [], "evm": { "bytecode": { "object": "" } } }
                }
            }
        });

        let store = parse_output(&output.to_string()).unwrap();
        assert_eq!(store.len(), 2);
        let vpn = store.get("DePinVPN").unwrap();
        assert_eq!(vpn.source_name, "contracts/DePinVPN.sol");
        assert_eq!(vpn.bytecode, "6080604052");
        assert!(store.get("IVault").unwrap().creation_code().is_err());
    }

    #[test]
    fn parse_output_fails_on_errors() {
        let output = serde_json::json!({
            "errors": [
                {
                    "severity": "error",
                    "message": "Expected ';'",
                    "formattedMessage": "ParserError: Expected ';' but got '}'"
                },
                { "severity": "warning", "message": "unused variable" }
            ]
        });

        let err = parse_output(&output.to_string()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ParserError"), "got: {msg}");
        assert!(!msg.contains("unused variable"), "got: {msg}");
    }

    #[test]
    fn parse_output_rejects_garbage() {
        assert!(matches!(
            parse_output("Error: not json"),
            Err(DeployError::Compile(_))
        ));
    }

    #[test]
    fn source_key_is_root_relative() {
        let root = Path::new("/project");
        assert_eq!(
            source_key(root, Path::new("/project/contracts/mocks/MockERC20.sol")),
            "contracts/mocks/MockERC20.sol"
        );
    }
}
