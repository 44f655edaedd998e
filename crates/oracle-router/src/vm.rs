//! On-chain VM strategy
//!
//! Drives the VM command-line tool through three steps:
//!
//! 1. `input-write --data <base58>` stores the feature vector in the input
//!    account. Once this succeeds, on-chain state has changed.
//! 2. `invoke` runs the program; the last line of stdout is the transaction
//!    signature.
//! 3. `output` prints the output account as base58. The region is read once
//!    before step 1; after step 2 it is read again with backoff until it
//!    differs from that snapshot, so a previous call's result is never
//!    returned.
//!
//! Every step takes `--manifest` and `--accounts`. The tool counts as
//! available when it can be launched at all; its exit status is not part of
//! the availability check.

use std::process::Stdio;
use std::time::Duration;

use oracle_core::{
    encode_input_region, FeatureVector, OutputRegion, Probabilities, OUTPUT_REGION_LEN,
};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::config::VmConfig;
use crate::error::{Result, Stage, StrategyError};
use crate::strategy::{Execution, ExecutionStrategy, RemoteStrategy};

/// Longest pause between two reads of the output region
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Why a single tool invocation failed
#[derive(Debug)]
enum CommandFailure {
    Missing(String),
    TimedOut(Duration),
    Exited { code: Option<i32>, stderr: String },
    Io(std::io::Error),
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandFailure::Missing(program) => write!(f, "executable '{}' not found", program),
            CommandFailure::TimedOut(after) => write!(f, "timed out after {:?}", after),
            CommandFailure::Exited { code, stderr } => {
                write!(f, "exited with {:?}: {}", code, stderr.trim())
            }
            CommandFailure::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

/// Executes inference through the VM command-line tool
pub struct VmStrategy {
    config: VmConfig,
    http: Client,
}

impl VmStrategy {
    pub fn new(config: &VmConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.command_timeout()).build()?;

        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.program_args)
            .arg(subcommand)
            .arg("--manifest")
            .arg(&self.config.manifest)
            .arg("--accounts")
            .arg(&self.config.accounts);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run one tool invocation and return the last non-empty line of stdout
    async fn run(&self, mut cmd: Command) -> std::result::Result<String, CommandFailure> {
        let timeout = self.config.command_timeout();

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => return Err(CommandFailure::TimedOut(timeout)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CommandFailure::Missing(self.config.program.clone()));
            }
            Ok(Err(e)) => return Err(CommandFailure::Io(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(CommandFailure::Exited {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or_default()
            .to_string())
    }

    /// Whether the tool can be started. The child is killed straight away.
    async fn tool_present(&self) -> bool {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.program_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(mut child) => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "Presence check child already gone");
                }
                true
            }
            Err(e) => {
                tracing::info!(
                    program = %self.config.program,
                    reason = %e,
                    "VM tool cannot be launched"
                );
                false
            }
        }
    }

    /// Ask the ledger RPC node whether it is healthy
    async fn rpc_healthy(&self, url: &str) -> bool {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "getHealth" });

        let response = match self.http.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(rpc_url = %url, error = %e, "Ledger RPC unreachable");
                return false;
            }
        };

        match response.json::<Value>().await {
            Ok(value) => value["result"].as_str() == Some("ok"),
            Err(e) => {
                tracing::debug!(rpc_url = %url, error = %e, "Unexpected ledger RPC response");
                false
            }
        }
    }

    async fn write_input(&self, features: &FeatureVector) -> std::result::Result<(), StrategyError> {
        let data = bs58::encode(encode_input_region(features)).into_string();
        let mut cmd = self.command("input-write");
        cmd.arg("--data").arg(&data);

        self.run(cmd)
            .await
            .map(|_| ())
            .map_err(|e| StrategyError::before_commit(Stage::InputWrite, e.to_string()))
    }

    async fn invoke(&self) -> std::result::Result<String, StrategyError> {
        let signature = self
            .run(self.command("invoke"))
            .await
            .map_err(|e| StrategyError::after_commit(Stage::Invoke, e.to_string()))?;

        if signature.is_empty() {
            return Err(StrategyError::after_commit(
                Stage::Invoke,
                "no transaction signature printed",
            ));
        }
        Ok(signature)
    }

    /// Current contents of the output account
    async fn output_bytes(&self) -> std::result::Result<Vec<u8>, String> {
        let encoded = self
            .run(self.command("output"))
            .await
            .map_err(|e| e.to_string())?;

        bs58::decode(&encoded)
            .into_vec()
            .map_err(|e| format!("invalid base58: {}", e))
    }

    /// Read the output region until it moves away from `previous`, with
    /// bounded attempts
    async fn read_output(&self, previous: &[u8]) -> std::result::Result<OutputRegion, StrategyError> {
        let attempts = self.config.poll_attempts.max(1);
        let mut backoff = self.config.poll_backoff();

        for attempt in 1..=attempts {
            let bytes = self
                .output_bytes()
                .await
                .map_err(|e| StrategyError::after_commit(Stage::Output, e))?;

            let written = bytes.iter().any(|b| *b != 0);
            if written && bytes != previous {
                return OutputRegion::decode(&bytes)
                    .map_err(|e| StrategyError::after_commit(Stage::Output, e.to_string()));
            }

            tracing::debug!(attempt, attempts, "Output region not updated yet");
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_POLL_BACKOFF);
            }
        }

        Err(StrategyError::after_commit(
            Stage::Output,
            format!(
                "output region ({} bytes) still unchanged after {} reads",
                OUTPUT_REGION_LEN, attempts
            ),
        ))
    }
}

impl ExecutionStrategy for VmStrategy {
    fn name(&self) -> &'static str {
        "onchain"
    }

    async fn execute(&self, features: &FeatureVector) -> std::result::Result<Execution, StrategyError> {
        let previous = self
            .output_bytes()
            .await
            .map_err(|e| StrategyError::before_commit(Stage::Output, e))?;

        self.write_input(features).await?;
        tracing::debug!(program = %self.config.program, "Input region written");

        let signature = self.invoke().await?;
        tracing::debug!(tx_signature = %signature, "Program invoked");

        let region = self.read_output(&previous).await?;

        Ok(Execution {
            direction: region.direction,
            probabilities: Probabilities::from_array(region.probabilities.map(f64::from)),
            tx_signature: Some(signature),
        })
    }
}

impl RemoteStrategy for VmStrategy {
    async fn probe(&self) -> bool {
        if !self.tool_present().await {
            return false;
        }

        if let Some(url) = &self.config.rpc_url {
            if !self.rpc_healthy(url).await {
                tracing::info!(rpc_url = %url, "Ledger RPC unhealthy");
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::{Direction, FeatureVector};

    fn missing_tool() -> VmConfig {
        VmConfig {
            program: "oracle-test-no-such-vm-tool".to_string(),
            command_timeout_secs: 5,
            ..VmConfig::default()
        }
    }

    #[cfg(unix)]
    fn scripted_tool(name: &str, script: &str) -> VmConfig {
        let path = std::env::temp_dir().join(format!(
            "oracle-router-{}-{}.sh",
            std::process::id(),
            name
        ));
        std::fs::write(&path, script).unwrap();
        VmConfig {
            program: "sh".to_string(),
            program_args: vec![path.display().to_string()],
            command_timeout_secs: 5,
            poll_attempts: 3,
            poll_backoff_ms: 1,
            ..VmConfig::default()
        }
    }

    fn features() -> FeatureVector {
        FeatureVector::new([0.2, 0.4, 0.4, 0.6]).unwrap()
    }

    #[tokio::test]
    async fn test_probe_fails_without_tool() {
        let vm = VmStrategy::new(&missing_tool()).unwrap();
        assert!(!vm.probe().await);
    }

    #[tokio::test]
    async fn test_missing_tool_fails_before_commit() {
        let vm = VmStrategy::new(&missing_tool()).unwrap();
        let err = vm.execute(&features()).await.unwrap_err();
        assert!(!err.is_committed());
        assert!(matches!(err, StrategyError::Failed { stage: Stage::Output, .. }));
        assert!(err.to_string().contains("not found"), "{}", err);
    }

    #[cfg(unix)]
    fn state_file(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "oracle-router-{}-{}.out",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[cfg(unix)]
    fn encoded(direction: Direction, probabilities: [f32; 3]) -> String {
        bs58::encode(OutputRegion { direction, probabilities }.encode()).into_string()
    }

    /// Tool whose output account lives in `state`; `invoke` runs `on_invoke`
    #[cfg(unix)]
    fn account_script(state: &std::path::Path, on_invoke: &str) -> String {
        let empty = bs58::encode([0u8; OUTPUT_REGION_LEN]).into_string();
        format!(
            "state='{state}'\n\
             case \"$1\" in\n\
             input-write) echo written ;;\n\
             invoke) {on_invoke}\n\
             echo 'log line'; echo 'SIG123' ;;\n\
             output) if [ -s \"$state\" ]; then cat \"$state\"; else echo '{empty}'; fi ;;\n\
             *) exit 2 ;;\n\
             esac\n",
            state = state.display(),
            on_invoke = on_invoke,
            empty = empty,
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scripted_tool_full_protocol() {
        let state = state_file("full");
        let fresh = encoded(Direction::Up, [0.75, 0.15, 0.1]);
        let script = account_script(&state, &format!("echo '{}' > \"$state\"", fresh));
        let vm = VmStrategy::new(&scripted_tool("full", &script)).unwrap();

        assert!(vm.probe().await);
        let execution = vm.execute(&features()).await.unwrap();
        assert_eq!(execution.direction, Direction::Up);
        assert_eq!(execution.tx_signature.as_deref(), Some("SIG123"));
        assert!((execution.probabilities.up - 0.75).abs() < 1e-7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_previous_result_is_not_returned() {
        let state = state_file("stale");
        std::fs::write(&state, encoded(Direction::Down, [0.1, 0.8, 0.1])).unwrap();

        // The new result lands after invoke has already returned
        let fresh = encoded(Direction::Up, [0.7, 0.2, 0.1]);
        let on_invoke = format!(
            "(sleep 0.2; echo '{}' > \"$state\") >/dev/null 2>&1 &",
            fresh
        );
        let mut config = scripted_tool("stale", &account_script(&state, &on_invoke));
        config.poll_attempts = 8;
        config.poll_backoff_ms = 50;

        let vm = VmStrategy::new(&config).unwrap();
        let execution = vm.execute(&features()).await.unwrap();
        assert_eq!(execution.direction, Direction::Up);
        assert!((execution.probabilities.up - 0.7).abs() < 1e-6);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unchanged_output_exhausts_polling() {
        let state = state_file("unchanged");
        std::fs::write(&state, encoded(Direction::Down, [0.1, 0.8, 0.1])).unwrap();
        let vm = VmStrategy::new(&scripted_tool("unchanged", &account_script(&state, "true"))).unwrap();

        let err = vm.execute(&features()).await.unwrap_err();
        assert!(matches!(
            err,
            StrategyError::Failed { stage: Stage::Output, committed: true, .. }
        ));
        assert!(err.to_string().contains("unchanged after 3 reads"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_output_region_exhausts_polling() {
        let state = state_file("pending");
        let vm = VmStrategy::new(&scripted_tool("pending", &account_script(&state, "true"))).unwrap();

        let err = vm.execute(&features()).await.unwrap_err();
        assert!(err.is_committed());
        assert!(err.to_string().contains("after 3 reads"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_without_version_flag_is_available() {
        let state = state_file("no-version");
        let vm = VmStrategy::new(&scripted_tool("no-version", &account_script(&state, "true"))).unwrap();
        assert!(vm.probe().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_failure_is_committed() {
        let script = "case \"$1\" in\n\
                      input-write) echo ok ;;\n\
                      output) echo 1111111111111 ;;\n\
                      invoke) echo 'rpc timeout' >&2; exit 1 ;;\n\
                      *) exit 9 ;;\n\
                      esac\n";
        let vm = VmStrategy::new(&scripted_tool("invoke-fails", script)).unwrap();
        let err = vm.execute(&features()).await.unwrap_err();
        assert!(err.is_committed());
        assert!(err.to_string().contains("rpc timeout"));
    }
}
