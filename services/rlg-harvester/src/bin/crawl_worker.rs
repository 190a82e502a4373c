//! Crawl Worker - hosts exactly one crawl in its own process
//!
//! Spawned by `IsolatedCrawlRunner`. Reads the job from `RLG_CRAWL_JOB`,
//! runs it, and exits non-zero if the crawl failed. Records flushed to the
//! output channel before a failure stay there for the parent to collect.

use anyhow::Context;
use rlg_harvester::worker::{execute, termination_signal};
use rlg_harvester::CrawlJob;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout stays free; logs go to stderr, which the parent inherits
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let raw = std::env::var(CrawlJob::ENV_VAR)
        .with_context(|| format!("{} environment variable required", CrawlJob::ENV_VAR))?;
    let job = CrawlJob::from_env_value(&raw)?;

    info!(
        "Crawl worker {} starting {} crawl -> {}",
        std::process::id(),
        job.kind,
        job.output.display()
    );

    match execute(&job, termination_signal()).await {
        Ok(stats) => {
            info!("Crawl worker done: {:?}", stats);
            Ok(())
        }
        Err(e) => {
            error!("{} crawl failed: {}", job.kind, e);
            Err(e).context("crawl failed")
        }
    }
}
