// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{anyhow, Result};
use por_consensus::{ParamKey, ParamRegistry, ProofOfRelayParams};
use por_types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Node-Konfiguration (TOML). Fehlende Felder fallen auf die empfohlenen Werte zurück.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub params: ProofOfRelayParams,
    /// Parametername → Adresse, die ihn ändern darf
    pub acl: BTreeMap<String, Address>,
    pub evidence_dir: PathBuf,
    pub fsync: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            params: ProofOfRelayParams::recommended(),
            acl: BTreeMap::new(),
            evidence_dir: PathBuf::from("por-data/evidence"),
            fsync: true,
        }
    }
}

impl NodeConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg: NodeConfig = toml::from_str(raw).map_err(|e| anyhow!("parse config: {e}"))?;
        cfg.params
            .validate()
            .map_err(|e| anyhow!("invalid params: {e}"))?;
        Ok(cfg)
    }

    /// Ohne Pfad: Defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| anyhow!("read config {}: {e}", p.display()))?;
                Self::from_toml(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn acl_map(&self) -> Result<BTreeMap<ParamKey, Address>> {
        self.acl
            .iter()
            .map(|(k, v)| {
                let key: ParamKey = k.parse().map_err(|_| anyhow!("unknown acl param: {k}"))?;
                Ok((key, *v))
            })
            .collect()
    }

    pub fn registry(&self) -> Result<ParamRegistry> {
        ParamRegistry::new(self.params.clone(), self.acl_map()?).map_err(|e| anyhow!("{e}"))
    }
}
