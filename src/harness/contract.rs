//! This module contains the compiled contracts that the harness deploys, and
//! the loading of them from `forge` build artifacts.

use std::{collections::BTreeMap, fs, path::Path};

use serde::Deserialize;

use crate::{
    disassembly::Program,
    error::harness::{Error, Result},
    harness::abi::Abi,
};

/// A compiled contract: its creation code and, when known, its ABI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Contract {
    name:              String,
    abi:               Option<Abi>,
    bytecode:          Vec<u8>,
    deployed_bytecode: Vec<u8>,
}

impl Contract {
    /// Constructs a contract called `name` from its creation `bytecode`, with
    /// no ABI.
    #[must_use]
    pub fn from_bytecode(name: impl Into<String>, bytecode: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            abi: None,
            bytecode,
            deployed_bytecode: Vec::new(),
        }
    }

    /// Attaches `abi` to the contract.
    #[must_use]
    pub fn with_abi(mut self, abi: Abi) -> Self {
        self.abi = Some(abi);
        self
    }

    /// Reads a contract called `name` from the JSON of a `forge` artifact.
    ///
    /// Both the `forge` layout, where the bytecode is an object with an
    /// `object` field, and the plain `solc` layout, where it is a string, are
    /// accepted.
    ///
    /// # Errors
    ///
    /// If the JSON is not an artifact, or its bytecode is not valid hex.
    pub fn from_artifact_json(name: impl Into<String>, json: &str) -> Result<Self> {
        let artifact: Artifact =
            serde_json::from_str(json).map_err(|e| Error::InvalidArtifact(e.to_string()))?;
        Ok(Self {
            name:              name.into(),
            abi:               Some(artifact.abi),
            bytecode:          decode_hex(artifact.bytecode.object())?,
            deployed_bytecode: match &artifact.deployed_bytecode {
                Some(code) => decode_hex(code.object())?,
                None => Vec::new(),
            },
        })
    }

    /// Gets the name of the contract.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the ABI of the contract, if it is known.
    #[must_use]
    pub fn abi(&self) -> Option<&Abi> {
        self.abi.as_ref()
    }

    /// Gets the creation code of the contract.
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Gets the runtime code of the contract, which is empty if the artifact
    /// did not include it.
    #[must_use]
    pub fn deployed_bytecode(&self) -> &[u8] {
        &self.deployed_bytecode
    }
}

/// The contracts of a build, by name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Artifacts {
    contracts: BTreeMap<String, Contract>,
}

impl Artifacts {
    /// Constructs an empty set of artifacts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every artifact in a `forge` output directory, which holds one
    /// directory per source file with one JSON file per contract.
    ///
    /// # Errors
    ///
    /// If the directory cannot be read, or an artifact in it is malformed.
    pub fn from_forge_out(out: impl AsRef<Path>) -> Result<Self> {
        let io = |e: std::io::Error| Error::InvalidArtifact(e.to_string());
        let mut artifacts = Self::new();

        for source in fs::read_dir(out).map_err(io)? {
            let source = source.map_err(io)?.path();
            if !source.is_dir() {
                continue;
            }
            for file in fs::read_dir(&source).map_err(io)? {
                let file = file.map_err(io)?.path();
                if file.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = file.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let json = fs::read_to_string(&file).map_err(io)?;
                artifacts.insert(Contract::from_artifact_json(name, &json)?);
            }
        }

        tracing::debug!(contracts = artifacts.contracts.len(), "Loaded build artifacts");
        Ok(artifacts)
    }

    /// Adds `contract`, replacing any contract of the same name.
    pub fn insert(&mut self, contract: Contract) {
        self.contracts.insert(contract.name.clone(), contract);
    }

    /// Gets the contract called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Contract> {
        self.contracts.get(name)
    }

    /// Gets the names of every contract.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    #[serde(default)]
    abi:               Abi,
    bytecode:          Bytecode,
    #[serde(default)]
    deployed_bytecode: Option<Bytecode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Bytecode {
    Object { object: String },
    Hex(String),
}

impl Bytecode {
    fn object(&self) -> &str {
        match self {
            Self::Object { object } => object,
            Self::Hex(hex) => hex,
        }
    }
}

fn decode_hex(code: &str) -> Result<Vec<u8>> {
    Program::from_hex(code)
        .map(|p| p.bytes().to_vec())
        .map_err(|e| Error::InvalidArtifact(e.to_string()))
}

#[cfg(test)]
mod test {
    use crate::harness::contract::{Artifacts, Contract};

    const ARTIFACT: &str = r#"{
        "abi": [{"type": "function", "name": "ping", "inputs": [], "outputs": [],
                 "stateMutability": "nonpayable"}],
        "bytecode": {"object": "0x6000600055", "linkReferences": {}},
        "deployedBytecode": {"object": "0x00", "linkReferences": {}},
        "methodIdentifiers": {"ping()": "5c36b186"}
    }"#;

    #[test]
    fn reads_forge_artifacts() -> anyhow::Result<()> {
        let contract = Contract::from_artifact_json("Ping", ARTIFACT)?;

        assert_eq!(contract.name(), "Ping");
        assert_eq!(contract.bytecode(), &[0x60, 0x00, 0x60, 0x00, 0x55]);
        assert_eq!(contract.deployed_bytecode(), &[0x00]);
        let abi = contract.abi().ok_or_else(|| anyhow::anyhow!("No ABI"))?;
        assert_eq!(abi.function("ping")?.selector()?, [0x5c, 0x36, 0xb1, 0x86]);

        let mut artifacts = Artifacts::new();
        artifacts.insert(contract);
        assert!(artifacts.get("Ping").is_some());
        assert_eq!(artifacts.names().collect::<Vec<_>>(), vec!["Ping"]);

        Ok(())
    }

    #[test]
    fn rejects_malformed_artifacts() {
        assert!(Contract::from_artifact_json("Bad", "{}").is_err());
        assert!(Contract::from_artifact_json("Bad", r#"{"bytecode": "0xzz"}"#).is_err());
    }
}
