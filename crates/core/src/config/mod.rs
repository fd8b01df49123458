//! Scan configuration: network descriptors loaded from a TOML file.
//!
//! Malformed networks are skipped with a reported reason; the load fails
//! only when no network at all is usable.

mod network;

pub use network::{ControllerDescriptor, NetworkDescriptor, DEFAULT_CHUNK_SIZE};

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// A network dropped during validation, with the reason reported upstream.
#[derive(Debug, Clone)]
pub struct SkippedNetwork {
    pub name: String,
    pub reason: String,
}

/// The full set of scan targets after load and validation.
#[derive(Debug)]
pub struct ScanTargets {
    pub networks: Vec<NetworkDescriptor>,
    pub skipped: Vec<SkippedNetwork>,
}

#[derive(Debug, Deserialize)]
struct ScanTargetsFile {
    #[serde(default)]
    networks: Vec<NetworkDescriptor>,
}

impl ScanTargets {
    /// Load and validate scan targets from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let parsed: ScanTargetsFile =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Self::from_descriptors(parsed.networks)
    }

    /// Validate descriptors, expanding `${VAR}` endpoint URLs and dropping
    /// unusable networks with a reason.
    pub fn from_descriptors(descriptors: Vec<NetworkDescriptor>) -> Result<Self> {
        let mut networks = Vec::new();
        let mut skipped = Vec::new();

        for mut network in descriptors {
            network.rpc_endpoints = network
                .rpc_endpoints
                .iter()
                .map(|url| expand_env(url))
                .filter(|url| {
                    // An unexpanded ${VAR} means the env var is unset
                    !url.contains("${") && !url.is_empty()
                })
                .collect();

            let reason = if network.rpc_endpoints.is_empty() {
                Some("no usable RPC endpoints after env expansion".to_string())
            } else if network.controllers.is_empty() {
                Some("no controllers configured".to_string())
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    warn!(network = %network.name, reason = %reason, "Skipping network");
                    skipped.push(SkippedNetwork {
                        name: network.name,
                        reason,
                    });
                }
                None => {
                    for controller in &network.controllers {
                        if controller.creation_block == 0 {
                            warn!(
                                network = %network.name,
                                controller = %controller.address,
                                "creation_block is 0; treating as hint and clamping to block 1"
                            );
                        }
                    }
                    networks.push(network);
                }
            }
        }

        if networks.is_empty() {
            bail!(
                "no usable networks in configuration ({} skipped)",
                skipped.len()
            );
        }

        info!(
            usable = networks.len(),
            skipped = skipped.len(),
            "Loaded scan targets"
        );
        Ok(Self { networks, skipped })
    }
}

/// Expand ${VAR_NAME} patterns with environment variable values.
fn expand_env(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}
