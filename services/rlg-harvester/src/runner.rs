//! Isolated crawl runner - every crawl gets its own worker process
//!
//! The crawl engine keeps process-wide scheduling state that cannot be
//! restarted once stopped, so a crawl never runs inside the caller's process.
//! The runner spawns a `rlg-crawl-worker` process per crawl, waits for it to
//! exit and then collects the records it flushed to the output channel.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel;
use crate::crawl::{CrawlJob, CrawlKind};
use crate::error::{HarvestError, Result};

/// Default time a worker gets to flush and exit after a termination request
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// What to do when the worker exits abnormally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Log the failure and return whatever was flushed
    #[default]
    Collect,
    /// Surface the failure; the channel is kept for inspection
    Fail,
}

/// How the worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Finished(ExitStatus),
    TimedOut(ExitStatus),
}

/// Unique output channel location for one crawl of `kind` under `dir`
pub fn unique_channel_path(dir: &Path, kind: CrawlKind) -> PathBuf {
    dir.join(format!("{}_data_{}.jl", kind, Uuid::new_v4()))
}

/// Runs one crawl per call in a fresh worker process
#[derive(Debug, Clone)]
pub struct IsolatedCrawlRunner {
    worker_bin: PathBuf,
    worker_args: Vec<String>,
    exit_policy: ExitPolicy,
    wait_timeout: Option<Duration>,
    shutdown_grace: Duration,
}

impl IsolatedCrawlRunner {
    pub fn new(worker_bin: impl Into<PathBuf>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
            worker_args: Vec::new(),
            exit_policy: ExitPolicy::default(),
            wait_timeout: None,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }

    /// Extra arguments for the worker program
    pub fn with_worker_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    /// Bound the wait on the worker. `None` waits until it exits.
    pub fn with_wait_timeout(mut self, limit: Option<Duration>) -> Self {
        self.wait_timeout = limit;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn worker_bin(&self) -> &Path {
        &self.worker_bin
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        self.exit_policy
    }

    /// Run `job` to completion in a new worker process and return its records.
    ///
    /// Returns only once the worker has exited. With `reclaim` the output
    /// channel is deleted after it was read successfully.
    pub async fn run<T: DeserializeOwned>(&self, job: &CrawlJob, reclaim: bool) -> Result<Vec<T>> {
        info!(
            "Creating new process for {} crawl (channel {})",
            job.kind,
            job.output.display()
        );

        let mut child = Command::new(&self.worker_bin)
            .args(&self.worker_args)
            .env(CrawlJob::ENV_VAR, job.to_env_value()?)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            // a caller that gives up on `run` takes the worker down with it
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarvestError::Spawn {
                program: self.worker_bin.clone(),
                source,
            })?;
        debug!("Crawl worker started: pid={:?}", child.id());

        match self.wait(&mut child).await? {
            WorkerExit::Finished(status) if status.success() => {
                info!("{} crawl finished running", job.kind);
            }
            WorkerExit::Finished(status) => match self.exit_policy {
                ExitPolicy::Collect => {
                    warn!(
                        "{} crawl worker exited abnormally ({}); collecting flushed records",
                        job.kind, status
                    );
                }
                ExitPolicy::Fail => {
                    error!("{} crawl worker exited abnormally ({})", job.kind, status);
                    return Err(HarvestError::ChildExecutionFailure { status });
                }
            },
            WorkerExit::TimedOut(status) => {
                let limit = self.wait_timeout.unwrap_or_default();
                match self.exit_policy {
                    ExitPolicy::Collect => {
                        warn!(
                            "{} crawl stopped after {:?} ({}); collecting flushed records",
                            job.kind, limit, status
                        );
                    }
                    ExitPolicy::Fail => return Err(HarvestError::Timeout(limit)),
                }
            }
        }

        let records: Vec<T> = channel::collect(&job.output, reclaim).await?;
        info!("{} {} records retrieved", records.len(), job.kind);
        Ok(records)
    }

    async fn wait(&self, child: &mut Child) -> Result<WorkerExit> {
        let Some(limit) = self.wait_timeout else {
            return Ok(WorkerExit::Finished(child.wait().await?));
        };

        if let Ok(status) = timeout(limit, child.wait()).await {
            return Ok(WorkerExit::Finished(status?));
        }

        warn!(
            "Crawl worker still running after {:?}, requesting shutdown",
            limit
        );
        request_termination(child);

        match timeout(self.shutdown_grace, child.wait()).await {
            Ok(status) => Ok(WorkerExit::TimedOut(status?)),
            Err(_) => {
                error!(
                    "Crawl worker ignored shutdown for {:?}, killing it",
                    self.shutdown_grace
                );
                child.kill().await?;
                Ok(WorkerExit::TimedOut(child.wait().await?))
            }
        }
    }
}

/// Ask the worker to stop after its current page
#[cfg(unix)]
fn request_termination(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory. `child.id()`
    // is `None` once the child has been reaped, and nothing else waits on it,
    // so the pid cannot have been recycled for an unrelated process here.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            "Failed to signal crawl worker {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop crawl worker: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::EngineSpec;
    use serde_json::Value;
    use tempfile::tempdir;

    fn job(output: &Path) -> CrawlJob {
        CrawlJob::new(
            CrawlKind::Items,
            EngineSpec::Replay {
                source: PathBuf::from("unused.jl"),
            },
            output,
        )
    }

    #[test]
    fn test_unique_channel_paths() {
        let dir = Path::new("/tmp/rlg");
        let a = unique_channel_path(dir, CrawlKind::Trades);
        let b = unique_channel_path(dir, CrawlKind::Trades);

        assert_ne!(a, b);
        assert!(a.starts_with(dir));
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("trade_data_"));
        assert!(name.ends_with(".jl"));
    }

    #[test]
    fn test_runner_defaults() {
        let runner = IsolatedCrawlRunner::new("/usr/local/bin/rlg-crawl-worker");
        assert_eq!(runner.exit_policy(), ExitPolicy::Collect);
        assert_eq!(runner.wait_timeout, None);
        assert_eq!(runner.shutdown_grace, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_worker_is_spawn_error() {
        let dir = tempdir().unwrap();
        let runner = IsolatedCrawlRunner::new(dir.path().join("no-such-worker"));

        let result = runner.run::<Value>(&job(&dir.path().join("out.jl")), true).await;
        assert!(matches!(result, Err(HarvestError::Spawn { .. })));
    }

    #[cfg(unix)]
    fn shell_runner(script: &str) -> IsolatedCrawlRunner {
        IsolatedCrawlRunner::new("/bin/sh")
            .with_worker_args(vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashed_worker_collects_flushed_records() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.jl");
        let script = format!(
            "printf '{{\"data_id\":1}}\\n{{\"data_id\":2}}\\n' > '{}'; exit 1",
            out.display()
        );

        let records: Vec<Value> = shell_runner(&script).run(&job(&out), true).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(!out.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashed_worker_fails_under_fail_policy() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.jl");
        let script = format!("printf '{{\"data_id\":1}}\\n' > '{}'; exit 1", out.display());

        let result = shell_runner(&script)
            .with_exit_policy(ExitPolicy::Fail)
            .run::<Value>(&job(&out), true)
            .await;

        assert!(matches!(result, Err(HarvestError::ChildExecutionFailure { .. })));
        assert!(out.exists(), "channel kept for inspection");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_worker_that_never_wrote_is_no_data() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.jl");

        let result = shell_runner("exit 2").run::<Value>(&job(&out), true).await;
        assert!(matches!(result, Err(HarvestError::NoData { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_run_kills_worker() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.jl");
        let script = format!("sleep 1; printf '{{\"data_id\":1}}\\n' > '{}'", out.display());
        let runner = shell_runner(&script);

        let abandoned = timeout(
            Duration::from_millis(200),
            runner.run::<Value>(&job(&out), true),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!out.exists(), "worker outlived its caller");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_worker_is_asked_to_stop() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.jl");
        let script = format!(
            "trap 'exit 0' TERM; printf '{{\"data_id\":1}}\\n' > '{}'; sleep 30 & wait",
            out.display()
        );

        let records: Vec<Value> = shell_runner(&script)
            .with_wait_timeout(Some(Duration::from_millis(300)))
            .run(&job(&out), true)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_worker_ignoring_shutdown_is_killed() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.jl");
        let script = format!(
            "printf '{{\"data_id\":1}}\\n' > '{}'; trap '' TERM; exec sleep 30",
            out.display()
        );

        let result = shell_runner(&script)
            .with_exit_policy(ExitPolicy::Fail)
            .with_wait_timeout(Some(Duration::from_millis(200)))
            .with_shutdown_grace(Duration::from_millis(200))
            .run::<Value>(&job(&out), true)
            .await;
        assert!(matches!(result, Err(HarvestError::Timeout(_))));
    }
}
