//! Crawl jobs and the in-worker crawl loop
//!
//! A `CrawlJob` is everything a crawl worker process needs: which record kind
//! to crawl, where the engine gets its pages from, caps, cache toggles and the
//! output channel location. The worker drives a `CrawlEngine` page by page,
//! runs every record through the kind's pipeline and writes kept records to
//! the channel.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::channel::ChannelWriter;
use crate::error::{HarvestError, Result};
use crate::pipeline::{DropReason, RecordPipeline, Verdict};

/// Record kind a crawl produces; selects the pipeline and start URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlKind {
    Items,
    Trades,
    Achievements,
}

impl CrawlKind {
    /// Singular name used in logs and channel file names
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlKind::Items => "item",
            CrawlKind::Trades => "trade",
            CrawlKind::Achievements => "achievement",
        }
    }

    pub fn default_start_urls(&self) -> Vec<String> {
        let url = match self {
            CrawlKind::Items => "https://rocket-league.com/items",
            CrawlKind::Trades => "https://rocket-league.com/trading?p=1",
            CrawlKind::Achievements => "https://rocket-league.com/trophies",
        };
        vec![url.to_string()]
    }

    pub fn default_limits(&self) -> CrawlLimits {
        match self {
            CrawlKind::Trades => CrawlLimits {
                concurrency: 5,
                max_records: Some(10_000),
                max_pages: Some(2),
            },
            CrawlKind::Items | CrawlKind::Achievements => CrawlLimits::default(),
        }
    }
}

impl fmt::Display for CrawlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds on a single crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlLimits {
    /// Max in-flight page fetches (enforced by the engine)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Stop after this many records were written
    #[serde(default)]
    pub max_records: Option<usize>,
    /// Stop after this many pages were visited
    #[serde(default)]
    pub max_pages: Option<usize>,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_records: None,
            max_pages: None,
        }
    }
}

fn default_concurrency() -> usize { 16 }

/// Page cache toggles forwarded to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Reuse previously fetched pages instead of re-fetching
    #[serde(default)]
    pub enabled: bool,
    /// Cached page lifetime; 0 never expires
    #[serde(default)]
    pub expiration_secs: u64,
}

/// Where the worker gets extracted pages from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum EngineSpec {
    /// External crawl-engine program printing pages on stdout
    Command {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// File of previously extracted pages
    Replay { source: PathBuf },
}

/// Everything one crawl worker needs to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub kind: CrawlKind,
    pub engine: EngineSpec,
    pub start_urls: Vec<String>,
    /// Output channel location, unique per invocation
    pub output: PathBuf,
    #[serde(default)]
    pub limits: CrawlLimits,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl CrawlJob {
    /// Environment variable carrying the JSON-encoded job into the worker
    pub const ENV_VAR: &'static str = "RLG_CRAWL_JOB";

    /// Job with the kind's default start URLs and limits
    pub fn new(kind: CrawlKind, engine: EngineSpec, output: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            engine,
            start_urls: kind.default_start_urls(),
            output: output.into(),
            limits: kind.default_limits(),
            cache: CacheSettings::default(),
        }
    }

    pub fn with_start_urls(mut self, urls: Vec<String>) -> Self {
        self.start_urls = urls;
        self
    }

    pub fn with_limits(mut self, limits: CrawlLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn to_env_value(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|source| HarvestError::Encode {
            what: "crawl job",
            source,
        })
    }

    pub fn from_env_value(value: &str) -> Result<Self> {
        serde_json::from_str(value)
            .map_err(|e| HarvestError::Config(format!("invalid {}: {}", Self::ENV_VAR, e)))
    }
}

/// One extracted page as handed over by the engine
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page {
    pub url: String,
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
}

/// Seam to the crawl engine collaborator.
///
/// Fetching, link following and selector extraction all happen behind this
/// trait; the worker only sees a stream of extracted pages.
#[async_trait]
pub trait CrawlEngine: Send {
    fn name(&self) -> &str;

    /// Next extracted page, `None` once the crawl is exhausted
    async fn next_page(&mut self) -> Result<Option<Page>>;

    /// Stop producing pages. Called once, whatever ended the crawl.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open the engine adapter described by `job`
pub async fn open_engine(job: &CrawlJob) -> Result<Box<dyn CrawlEngine>> {
    match &job.engine {
        EngineSpec::Replay { source } => Ok(Box::new(ReplayEngine::open(source).await?)),
        EngineSpec::Command { program, args } => {
            Ok(Box::new(CommandEngine::spawn(program, args, job)?))
        }
    }
}

fn parse_page(origin: &str, line_no: usize, line: &str) -> Result<Page> {
    serde_json::from_str(line).map_err(|e| {
        HarvestError::Engine(format!("{} line {}: malformed page: {}", origin, line_no, e))
    })
}

/// Reads pages from a newline-delimited JSON file
pub struct ReplayEngine {
    source: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ReplayEngine {
    pub async fn open(source: &Path) -> Result<Self> {
        let file = File::open(source).await.map_err(|e| {
            HarvestError::Engine(format!("cannot open replay source {}: {}", source.display(), e))
        })?;
        debug!("Replaying pages from {}", source.display());

        Ok(Self {
            source: source.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

#[async_trait]
impl CrawlEngine for ReplayEngine {
    fn name(&self) -> &str {
        "replay"
    }

    async fn next_page(&mut self) -> Result<Option<Page>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let origin = self.source.display().to_string();
            return parse_page(&origin, self.line_no, &line).map(Some);
        }
        Ok(None)
    }
}

/// Runs an external crawl-engine program and reads pages from its stdout.
///
/// The job is described to the program through environment variables:
/// - `RLG_CRAWL_KIND` - item / trade / achievement
/// - `RLG_START_URLS` - newline-separated start URLs
/// - `RLG_CONCURRENCY`, `RLG_MAX_PAGES`
/// - `RLG_HTTPCACHE_ENABLED`, `RLG_HTTPCACHE_EXPIRATION_SECS`
pub struct CommandEngine {
    program: PathBuf,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    line_no: usize,
}

impl CommandEngine {
    pub fn spawn(program: &Path, args: &[String], job: &CrawlJob) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("RLG_CRAWL_KIND", job.kind.as_str())
            .env("RLG_START_URLS", job.start_urls.join("\n"))
            .env("RLG_CONCURRENCY", job.limits.concurrency.to_string())
            .env("RLG_HTTPCACHE_ENABLED", job.cache.enabled.to_string())
            .env(
                "RLG_HTTPCACHE_EXPIRATION_SECS",
                job.cache.expiration_secs.to_string(),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(max_pages) = job.limits.max_pages {
            cmd.env("RLG_MAX_PAGES", max_pages.to_string());
        }

        let mut child = cmd.spawn().map_err(|e| {
            HarvestError::Engine(format!("cannot start {}: {}", program.display(), e))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarvestError::Engine("engine stdout not captured".to_string()))?;

        info!(
            "Started crawl engine {} (pid {:?})",
            program.display(),
            child.id()
        );

        Ok(Self {
            program: program.to_path_buf(),
            child,
            lines: BufReader::new(stdout).lines(),
            line_no: 0,
        })
    }
}

#[async_trait]
impl CrawlEngine for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn next_page(&mut self) -> Result<Option<Page>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let origin = self.program.display().to_string();
            return parse_page(&origin, self.line_no, &line).map(Some);
        }

        let status = self.child.wait().await?;
        if !status.success() {
            return Err(HarvestError::Engine(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }
        Ok(None)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            debug!("Stopping crawl engine {}", self.program.display());
            self.child.start_kill()?;
            self.child.wait().await?;
        }
        Ok(())
    }
}

/// Why a crawl stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    Exhausted,
    MaxRecords,
    MaxPages,
    Cancelled,
}

/// Counters for one crawl
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub pages: usize,
    pub scraped: usize,
    pub kept: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub stop: StopReason,
}

/// Drive `engine` until it is exhausted, a cap is hit or `shutdown` resolves.
///
/// Cancellation is only observed between pages, so the channel always ends on
/// a complete record.
pub async fn run_crawl<P, F>(
    engine: &mut dyn CrawlEngine,
    mut pipeline: P,
    writer: &mut ChannelWriter,
    limits: &CrawlLimits,
    shutdown: F,
) -> Result<CrawlStats>
where
    P: RecordPipeline,
    F: Future<Output = ()>,
{
    let mut stats = CrawlStats::default();
    tokio::pin!(shutdown);

    let capped = |n: usize, cap: Option<usize>| cap.map_or(false, |max| n >= max);

    let stop = 'crawl: loop {
        if capped(stats.kept, limits.max_records) {
            break StopReason::MaxRecords;
        }
        if capped(stats.pages, limits.max_pages) {
            break StopReason::MaxPages;
        }

        let next = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            page = engine.next_page() => Some(page),
        };
        let Some(page) = next else {
            break StopReason::Cancelled;
        };
        let Some(page) = page? else {
            break StopReason::Exhausted;
        };

        stats.pages += 1;
        info!("Crawler found {} page: {}", pipeline.name(), page.url);

        for raw in page.records {
            stats.scraped += 1;
            let scraped = match serde_json::from_value::<P::Scraped>(raw) {
                Ok(scraped) => scraped,
                Err(e) => {
                    warn!("Unreadable {} record on {}: {}", pipeline.name(), page.url, e);
                    stats.dropped += 1;
                    continue;
                }
            };

            match pipeline.process(scraped) {
                Verdict::Keep(record) => {
                    writer.write(&record)?;
                    stats.kept += 1;
                    if capped(stats.kept, limits.max_records) {
                        break 'crawl StopReason::MaxRecords;
                    }
                }
                Verdict::Drop(reason) => {
                    debug!("Dropped {} record: {}", pipeline.name(), reason);
                    if matches!(reason, DropReason::Duplicate(_)) {
                        stats.duplicates += 1;
                    }
                    stats.dropped += 1;
                }
            }
        }
    };

    if let Err(e) = engine.shutdown().await {
        warn!("Crawl engine {} did not shut down cleanly: {}", engine.name(), e);
    }

    stats.stop = stop;
    info!(
        "{} crawl stopped ({:?}): {} pages, {} scraped, {} kept, {} dropped ({} duplicates)",
        pipeline.name(),
        stats.stop,
        stats.pages,
        stats.scraped,
        stats.kept,
        stats.dropped,
        stats.duplicates
    );
    Ok(stats)
}
