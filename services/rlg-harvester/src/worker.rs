//! Crawl worker side: run one job inside the current process

use std::future::Future;

use tracing::info;

use crate::channel::ChannelWriter;
use crate::crawl::{open_engine, run_crawl, CrawlJob, CrawlKind, CrawlStats};
use crate::error::Result;
use crate::pipeline::{AchievementPipeline, ItemPipeline, TradePipeline};

/// Execute `job` until it completes or `shutdown` resolves.
///
/// The engine is opened before the output channel is created, so a job that
/// cannot start leaves no channel behind. Each call builds its own pipeline.
pub async fn execute<F>(job: &CrawlJob, shutdown: F) -> Result<CrawlStats>
where
    F: Future<Output = ()>,
{
    let mut engine = open_engine(job).await?;
    let mut writer = ChannelWriter::create(&job.output)?;
    info!(
        "Running {} crawl with {} engine from {:?}",
        job.kind,
        engine.name(),
        job.start_urls
    );

    let engine = engine.as_mut();
    let stats = match job.kind {
        CrawlKind::Items => {
            run_crawl(engine, ItemPipeline::new(), &mut writer, &job.limits, shutdown).await
        }
        CrawlKind::Trades => {
            run_crawl(engine, TradePipeline::new(), &mut writer, &job.limits, shutdown).await
        }
        CrawlKind::Achievements => {
            run_crawl(engine, AchievementPipeline::new(), &mut writer, &job.limits, shutdown).await
        }
    };

    let written = writer.finish()?;
    let stats = stats?;
    info!("Wrote {} records to {}", written, job.output.display());
    Ok(stats)
}

/// Resolves on SIGTERM or Ctrl-C
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Termination requested, finishing current page");
}
