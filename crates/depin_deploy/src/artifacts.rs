use std::collections::BTreeMap;
use std::path::Path;

use alloy::primitives::{Bytes, hex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};

/// Compiled output of a single contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    /// Source unit the contract was declared in, e.g. `contracts/DePinVPN.sol`.
    pub source_name: String,
    pub abi: serde_json::Value,
    /// Creation bytecode as emitted by solc (hex, no `0x` prefix).
    pub bytecode: String,
}

impl ContractArtifact {
    /// Decode the creation bytecode.
    ///
    /// Fails for abstract contracts and interfaces (no bytecode) and for
    /// bytecode that still contains library link placeholders.
    pub fn creation_code(&self) -> Result<Bytes> {
        let code = self.bytecode.trim();
        if code.is_empty() || code == "0x" {
            return Err(DeployError::Artifact(format!(
                "{} has no bytecode (abstract contract or interface?)",
                self.contract_name
            )));
        }
        if code.contains("__$") {
            return Err(DeployError::Artifact(format!(
                "{} references unlinked libraries",
                self.contract_name
            )));
        }
        hex::decode(code).map(Bytes::from).map_err(|e| {
            DeployError::Artifact(format!("{} has malformed bytecode: {e}", self.contract_name))
        })
    }

    /// `source:Name` identifier used by verification tooling.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }
}

/// Artifacts of one compilation, indexed by contract name.
#[derive(Debug, Default, Clone)]
pub struct ArtifactStore {
    artifacts: BTreeMap<String, ContractArtifact>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an artifact, replacing any previous one with the same name.
    pub fn insert(&mut self, artifact: ContractArtifact) {
        if let Some(previous) = self.artifacts.get(&artifact.contract_name) {
            if previous.source_name != artifact.source_name {
                warn!(
                    contract = %artifact.contract_name,
                    first = %previous.source_name,
                    second = %artifact.source_name,
                    "contract name declared in more than one source, keeping the last"
                );
            }
        }
        self.artifacts.insert(artifact.contract_name.clone(), artifact);
    }

    /// Look up an artifact by contract name.
    pub fn get(&self, name: &str) -> Result<&ContractArtifact> {
        self.artifacts.get(name).ok_or_else(|| {
            DeployError::Artifact(format!("no compiled artifact for contract {name}"))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Write every artifact as `<dir>/<ContractName>.json`.
    pub fn write_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for artifact in self.artifacts.values() {
            let path = dir.join(format!("{}.json", artifact.contract_name));
            let json = serde_json::to_string_pretty(artifact)?;
            std::fs::write(&path, json)?;
            debug!(path = %path.display(), "artifact written");
        }
        info!(count = self.artifacts.len(), dir = %dir.display(), "artifacts saved");
        Ok(())
    }

    /// Load every `*.json` artifact in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(DeployError::Artifact(format!(
                "artifacts directory {} does not exist (compile first)",
                dir.display()
            )));
        }

        let mut store = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            let artifact: ContractArtifact = serde_json::from_str(&data).map_err(|e| {
                DeployError::Artifact(format!("{}: {e}", path.display()))
            })?;
            store.insert(artifact);
        }
        info!(count = store.len(), dir = %dir.display(), "artifacts loaded");
        Ok(store)
    }
}
