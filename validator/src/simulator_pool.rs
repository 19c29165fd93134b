//! Bounded-concurrency pool of long-lived container workers (spec.md §4.1).
//!
//! Grounded on `original_source/neurons/simulator.py`'s `OrderSimulator`:
//! one idle `docker run --entrypoint /bin/bash ... tail -f /dev/null`
//! container per pool slot, round-robin selection, health-check + restart,
//! `docker exec -i <container> env -u SIM_INPUT_PATH <script> '' <rpc_url>`
//! with the JSON payload piped over stdin.
//!
//! Per spec.md §9 ("Per-loop async primitives"), concurrency is modeled as
//! a fixed-size channel of worker tokens instead of a semaphore: acquiring a
//! token is a receive, releasing is a send back into the channel. This has
//! no per-runtime lifetime concern.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::error::SimulatorError;

const SIMULATION_SCRIPT_PATH: &str = "/app/bin/run_simulation.sh";
const CONTAINER_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Worker {
    container_name: String,
}

#[derive(Debug, Deserialize)]
struct SimulatorOutput {
    #[serde(default)]
    success: bool,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

/// Outcome of simulating one order.
pub struct SimulationOutcome {
    pub success: bool,
    pub error_message: Option<String>,
}

/// A pool of `pool_size` long-lived simulator containers, bounded by a
/// channel of worker tokens rather than a semaphore (spec.md §9).
pub struct SimulatorPool {
    image: String,
    timeout_seconds: u64,
    failed_simulations_dir: PathBuf,
    workers: Mutex<Vec<Worker>>,
    tokens_tx: mpsc::Sender<usize>,
    tokens_rx: Mutex<mpsc::Receiver<usize>>,
}

impl SimulatorPool {
    /// Starts `pool_size` idle containers. Fails only if none could start
    /// (spec.md §4.1 "Pool-level startup failure... is fatal").
    pub async fn start(
        image: &str,
        pool_size: usize,
        timeout_seconds: u64,
        failed_simulations_dir: impl AsRef<Path>,
        auto_pull: bool,
    ) -> Result<Self, SimulatorError> {
        let failed_simulations_dir = failed_simulations_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&failed_simulations_dir)
            .await
            .map_err(|e| SimulatorError::Spawn(e.to_string()))?;

        if auto_pull {
            Self::pull_image(image).await;
        }

        let pool_size = pool_size.max(1);
        let mut workers = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let name = format!("mino-simulation-{}-{}", std::process::id(), i);
            match Self::start_container(image, &name).await {
                Ok(()) => {
                    info!(target: "simulator_pool", "started container {i}/{pool_size}: {name}");
                    workers.push(Worker {
                        container_name: name,
                    });
                }
                Err(e) => {
                    error!(target: "simulator_pool", "failed to start container {name}: {e}");
                }
            }
        }

        if workers.is_empty() {
            return Err(SimulatorError::PoolExhausted);
        }

        let (tokens_tx, tokens_rx) = mpsc::channel(workers.len());
        for i in 0..workers.len() {
            tokens_tx
                .send(i)
                .await
                .expect("channel just created, cannot be closed");
        }

        Ok(Self {
            image: image.to_owned(),
            timeout_seconds,
            failed_simulations_dir,
            workers: Mutex::new(workers),
            tokens_tx,
            tokens_rx: Mutex::new(tokens_rx),
        })
    }

    async fn pull_image(image: &str) {
        info!(target: "simulator_pool", "pulling simulator image {image}");
        let result = timeout(
            Duration::from_secs(600),
            Command::new("docker").args(["pull", image]).output(),
        )
        .await;
        match result {
            Ok(Ok(output)) if output.status.success() => {
                info!(target: "simulator_pool", "pulled simulator image {image}");
            }
            Ok(Ok(output)) => {
                warn!(
                    target: "simulator_pool",
                    "failed to pull {image}: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            Ok(Err(e)) => warn!(target: "simulator_pool", "docker pull failed: {e}"),
            Err(_) => warn!(target: "simulator_pool", "timed out pulling {image}"),
        }
    }

    async fn start_container(image: &str, name: &str) -> Result<(), SimulatorError> {
        let run = |name: &str| {
            Command::new("docker")
                .args([
                    "run",
                    "-d",
                    "--name",
                    name,
                    "--entrypoint",
                    "/bin/bash",
                    image,
                    "-c",
                    "tail -f /dev/null",
                ])
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
        };

        let output = timeout(CONTAINER_STARTUP_TIMEOUT, run(name))
            .await
            .map_err(|_| SimulatorError::Spawn("container startup timed out".to_owned()))?
            .map_err(|e| SimulatorError::Spawn(e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already in use") || stderr.contains("Conflict") {
            let _ = Command::new("docker")
                .args(["rm", "-f", name])
                .output()
                .await;
            let output = timeout(CONTAINER_STARTUP_TIMEOUT, run(name))
                .await
                .map_err(|_| SimulatorError::Spawn("container startup timed out".to_owned()))?
                .map_err(|e| SimulatorError::Spawn(e.to_string()))?;
            if output.status.success() {
                return Ok(());
            }
        }
        Err(SimulatorError::Spawn(stderr.into_owned()))
    }

    async fn is_healthy(name: &str) -> bool {
        let output = Command::new("docker")
            .args(["ps", "--filter", &format!("name={name}"), "--format", "{{.Names}}"])
            .output()
            .await;
        match output {
            Ok(o) => String::from_utf8_lossy(&o.stdout).lines().any(|l| l == name),
            Err(_) => false,
        }
    }

    async fn restart_worker(&self, index: usize) -> Result<(), SimulatorError> {
        let name = {
            let workers = self.workers.lock().await;
            workers[index].container_name.clone()
        };
        warn!(target: "simulator_pool", "restarting unhealthy container {name}");
        let _ = Command::new("docker").args(["rm", "-f", &name]).output().await;
        Self::start_container(&self.image, &name).await
    }

    /// Run one simulation. Acquires a worker token (a receive on the token
    /// channel), restarts the worker if unhealthy, pipes the payload over
    /// stdin, and parses the worker's JSON stdout. Never raises; failures
    /// are returned as `Ok(SimulationOutcome{success: false, ..})` or, for
    /// infrastructure failures, `Err(SimulatorError)`.
    pub async fn simulate(
        &self,
        order_id: &str,
        payload: &Value,
        rpc_url: &str,
    ) -> Result<SimulationOutcome, SimulatorError> {
        let index = {
            let mut rx = self.tokens_rx.lock().await;
            rx.recv().await.ok_or(SimulatorError::PoolExhausted)?
        };

        let result = self.simulate_on_worker(index, order_id, payload, rpc_url).await;

        let _ = self.tokens_tx.send(index).await;
        result
    }

    async fn simulate_on_worker(
        &self,
        index: usize,
        order_id: &str,
        payload: &Value,
        rpc_url: &str,
    ) -> Result<SimulationOutcome, SimulatorError> {
        let name = {
            let workers = self.workers.lock().await;
            workers[index].container_name.clone()
        };

        if !Self::is_healthy(&name).await {
            self.restart_worker(index)
                .await
                .map_err(|_| SimulatorError::WorkerUnavailable(name.clone()))?;
        }

        let json_input = serde_json::to_string(payload)
            .map_err(|e| SimulatorError::UnparseableOutput(e.to_string()))?;

        let mut child = Command::new("docker")
            .args([
                "exec",
                "-i",
                &name,
                "env",
                "-u",
                "SIM_INPUT_PATH",
                SIMULATION_SCRIPT_PATH,
                "",
                rpc_url,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SimulatorError::Spawn(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(json_input.as_bytes()).await;
        }

        let output = timeout(
            Duration::from_secs(self.timeout_seconds),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| SimulatorError::Timeout(self.timeout_seconds))?
        .map_err(|e| SimulatorError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let diagnostic = extract_diagnostic(&output.stderr, &output.stdout);
            self.save_failed_simulation(order_id, payload, &diagnostic)
                .await;
            return Err(SimulatorError::NonZeroExit(
                output.status.code().unwrap_or(-1),
                diagnostic,
            ));
        }

        let parsed: SimulatorOutput = match serde_json::from_slice(&output.stdout) {
            Ok(v) => v,
            Err(e) => {
                let diagnostic = format!("unparseable simulator output: {e}");
                self.save_failed_simulation(order_id, payload, &diagnostic)
                    .await;
                return Err(SimulatorError::UnparseableOutput(diagnostic));
            }
        };

        if !parsed.success {
            let diagnostic = parsed
                .error_message
                .clone()
                .unwrap_or_else(|| "simulation failed".to_owned());
            self.save_failed_simulation(order_id, payload, &diagnostic)
                .await;
            return Ok(SimulationOutcome {
                success: false,
                error_message: Some(diagnostic),
            });
        }

        debug!(target: "simulator_pool", "order {order_id} simulated successfully on {name}");
        Ok(SimulationOutcome {
            success: true,
            error_message: None,
        })
    }

    async fn save_failed_simulation(&self, order_id: &str, payload: &Value, diagnostic: &str) {
        let safe_order_id: String = order_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .take(50)
            .collect();
        let unix_ts = chrono::Utc::now().timestamp();
        let filename = format!("failed_{safe_order_id}_{unix_ts}.json");
        let path = self.failed_simulations_dir.join(filename);

        let record = serde_json::json!({
            "orderId": order_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "errorMessage": diagnostic,
            "payload": payload,
        });

        if let Ok(bytes) = serde_json::to_vec_pretty(&record) {
            if let Err(e) = tokio::fs::write(&path, bytes).await {
                warn!(target: "simulator_pool", "failed to write debug dump {}: {e}", path.display());
            }
        }
    }

    /// Stops and removes every container in the pool (spec.md §4.1 shutdown hook).
    pub async fn shutdown(&self) {
        let workers = self.workers.lock().await;
        info!(target: "simulator_pool", "cleaning up {} container(s)", workers.len());
        for worker in workers.iter() {
            let _ = Command::new("docker")
                .args(["rm", "-f", &worker.container_name])
                .output()
                .await;
        }
    }
}

/// Extracts a short diagnostic from stderr/stdout, mirroring
/// `simulator.py::_call_simulator`'s keyword-based line filter.
fn extract_diagnostic(stderr: &[u8], stdout: &[u8]) -> String {
    const KEYWORDS: &[&str] = &["error", "failed", "revert", "invalid", "mismatch"];
    let mut parts = Vec::new();

    let stderr_text = String::from_utf8_lossy(stderr);
    for line in stderr_text.lines() {
        if KEYWORDS.iter().any(|k| line.to_lowercase().contains(k)) {
            parts.push(line.trim().to_owned());
        }
    }
    if parts.is_empty() {
        if let Some(last) = stderr_text.lines().last() {
            parts.push(last.trim().to_owned());
        }
    }

    let stdout_text = String::from_utf8_lossy(stdout);
    for line in stdout_text.lines() {
        if KEYWORDS.iter().any(|k| line.to_lowercase().contains(k)) {
            parts.push(line.trim().to_owned());
        }
    }

    parts.truncate(3);
    if parts.is_empty() {
        "simulator exited with a non-zero status".to_owned()
    } else {
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_diagnostic_picks_keyword_lines() {
        let stderr = b"warning: ignored\nError: execution reverted\n";
        let diag = extract_diagnostic(stderr, b"");
        assert!(diag.contains("execution reverted"));
    }

    #[test]
    fn extract_diagnostic_falls_back_to_generic_message() {
        let diag = extract_diagnostic(b"", b"");
        assert_eq!(diag, "simulator exited with a non-zero status");
    }
}
