use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub weights: WeightsConfig,
    pub router: RouterConfig,
    pub vm: VmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeightsConfig {
    /// JSON export or packed binary bundle
    pub path: PathBuf,
}

/// How the router chooses between the on-chain VM and local evaluation
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    /// Probe the VM, fall back to local evaluation when it is unavailable
    #[default]
    Auto,
    /// Never touch the VM
    Local,
    /// Require the VM; unavailability is an error
    Onchain,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    pub mode: RouterMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VmConfig {
    /// Executable providing `input-write`, `invoke` and `output`
    pub program: String,
    /// Arguments placed before the subcommand (e.g. a wrapper script)
    #[serde(default)]
    pub program_args: Vec<String>,
    pub manifest: PathBuf,
    pub accounts: PathBuf,
    /// Ledger JSON-RPC endpoint checked during the probe
    #[serde(default)]
    pub rpc_url: Option<String>,
    pub command_timeout_secs: u64,
    /// Reads of the output region before giving up
    pub poll_attempts: u32,
    /// Delay before the second read; doubles after each further attempt
    pub poll_backoff_ms: u64,
}

impl VmConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            program: "cauldron".to_string(),
            program_args: Vec::new(),
            manifest: PathBuf::from("cauldron.toml"),
            accounts: PathBuf::from("cauldron-accounts.json"),
            rpc_url: None,
            command_timeout_secs: 30,
            poll_attempts: 5,
            poll_backoff_ms: 200,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .set_default("weights.path", "models/price_predictor/weights.json")?
            .set_default("router.mode", "auto")?
            // VM collaborator defaults
            .set_default("vm.program", "cauldron")?
            .set_default("vm.manifest", "cauldron.toml")?
            .set_default("vm.accounts", "cauldron-accounts.json")?
            .set_default("vm.command_timeout_secs", 30)?
            .set_default("vm.poll_attempts", 5)?
            .set_default("vm.poll_backoff_ms", 200)?
            // Load from config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables
            // ORACLE__VM__RPC_URL, ORACLE__ROUTER__MODE, etc.
            .add_source(
                Environment::with_prefix("ORACLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
