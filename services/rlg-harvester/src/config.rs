//! Harvester configuration
//!
//! Built-in defaults overridden by `RLG_`-prefixed environment variables:
//! - `RLG_CHANNEL_DIR` - directory for output channels (default: `<tmp>/rlg-harvester`)
//! - `RLG_WORKER_BIN` - crawl worker binary (default: `rlg-crawl-worker` next to this executable)
//! - `RLG_EXIT_POLICY` - `collect` or `fail`
//! - `RLG_RECLAIM_CHANNELS` - delete channels after reading (default: true)
//! - `RLG_WAIT_TIMEOUT_SECS` - bound on a single crawl (default: none)
//! - `RLG_SHUTDOWN_GRACE_SECS` - grace period after a termination request
//! - `RLG_ENGINE_PROGRAM` - external crawl engine program
//! - `RLG_ENGINE_ARGS` - space-separated arguments for the engine program
//! - `RLG_ENGINE_REPLAY_DIR` - directory of `<kind>.jl` page files, used when
//!   no engine program is set

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::crawl::{CrawlKind, EngineSpec};
use crate::error::{HarvestError, Result};
use crate::runner::{ExitPolicy, IsolatedCrawlRunner};

/// Name of the crawl worker binary
pub const WORKER_BIN_NAME: &str = "rlg-crawl-worker";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HarvesterSettings {
    #[serde(default = "default_channel_dir")]
    pub channel_dir: PathBuf,
    #[serde(default)]
    pub worker_bin: Option<PathBuf>,
    #[serde(default)]
    pub exit_policy: ExitPolicy,
    #[serde(default = "default_reclaim_channels")]
    pub reclaim_channels: bool,
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub engine_program: Option<PathBuf>,
    #[serde(default)]
    pub engine_args: Vec<String>,
    #[serde(default)]
    pub engine_replay_dir: Option<PathBuf>,
}

impl Default for HarvesterSettings {
    fn default() -> Self {
        Self {
            channel_dir: default_channel_dir(),
            worker_bin: None,
            exit_policy: ExitPolicy::default(),
            reclaim_channels: default_reclaim_channels(),
            wait_timeout_secs: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            engine_program: None,
            engine_args: Vec::new(),
            engine_replay_dir: None,
        }
    }
}

fn default_channel_dir() -> PathBuf { std::env::temp_dir().join("rlg-harvester") }
fn default_reclaim_channels() -> bool { true }
fn default_shutdown_grace_secs() -> u64 { 10 }

impl HarvesterSettings {
    /// Load from the environment on top of the defaults
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("RLG")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("engine_args"),
            )
            .build()?;
        let settings: Self = settings.try_deserialize()?;
        Ok(settings)
    }

    /// Worker binary to spawn; defaults to the sibling of the running executable
    pub fn worker_bin(&self) -> Result<PathBuf> {
        if let Some(bin) = &self.worker_bin {
            return Ok(bin.clone());
        }
        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            HarvestError::Config(format!("{} has no parent directory", exe.display()))
        })?;
        Ok(dir.join(format!("{}{}", WORKER_BIN_NAME, std::env::consts::EXE_SUFFIX)))
    }

    /// Engine adapter for a crawl of `kind`
    pub fn engine_for(&self, kind: CrawlKind) -> Result<EngineSpec> {
        if let Some(program) = &self.engine_program {
            return Ok(EngineSpec::Command {
                program: program.clone(),
                args: self.engine_args.clone(),
            });
        }
        if let Some(dir) = &self.engine_replay_dir {
            return Ok(EngineSpec::Replay {
                source: dir.join(format!("{}.jl", kind)),
            });
        }
        Err(HarvestError::Config(
            "no crawl engine configured: set RLG_ENGINE_PROGRAM or RLG_ENGINE_REPLAY_DIR"
                .to_string(),
        ))
    }

    pub fn runner(&self) -> Result<IsolatedCrawlRunner> {
        Ok(IsolatedCrawlRunner::new(self.worker_bin()?)
            .with_exit_policy(self.exit_policy)
            .with_wait_timeout(self.wait_timeout_secs.map(Duration::from_secs))
            .with_shutdown_grace(Duration::from_secs(self.shutdown_grace_secs)))
    }
}
