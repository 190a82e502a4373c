//! Rocket League Garage client
//!
//! High-level operations composed from the isolated runner and the enrichment
//! merger. Every call runs its crawls in fresh worker processes, so calls can
//! be repeated or overlapped freely.

use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::HarvesterSettings;
use crate::crawl::{CacheSettings, CrawlJob, CrawlKind, CrawlLimits};
use crate::enrich::enrich;
use crate::error::Result;
use crate::records::{Achievement, Item, Trade};
use crate::runner::{unique_channel_path, IsolatedCrawlRunner};

/// Cached pages never expire; refresh by disabling the cache
const CACHE_NEVER_EXPIRES: u64 = 0;

/// Parameters for a trade crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeQuery {
    /// Custom start URL, e.g. a filtered trading page. Defaults to page 1.
    pub start_url: Option<String>,
    /// Maximum number of trades retrieved; 0 means no cap
    pub max_trades: usize,
    /// Maximum concurrent requests against the site
    pub concurrency: usize,
}

impl Default for TradeQuery {
    fn default() -> Self {
        Self {
            start_url: None,
            max_trades: 100,
            concurrency: 5,
        }
    }
}

/// Entry point for fetching items, trades and achievements
pub struct GarageClient {
    settings: HarvesterSettings,
    runner: IsolatedCrawlRunner,
}

impl GarageClient {
    pub fn new(settings: HarvesterSettings) -> Result<Self> {
        let runner = settings.runner()?;
        Ok(Self { settings, runner })
    }

    /// Client configured from `RLG_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(HarvesterSettings::load()?)
    }

    /// Create with a specific runner (for testing)
    pub fn with_runner(settings: HarvesterSettings, runner: IsolatedCrawlRunner) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &HarvesterSettings {
        &self.settings
    }

    /// Retrieve the item catalog.
    ///
    /// With `cache_enabled` the engine may answer from previously fetched
    /// pages instead of hitting the site again. Only disable it when the site
    /// has added new items.
    pub async fn get_items(&self, cache_enabled: bool) -> Result<Vec<Item>> {
        let job = self.job(CrawlKind::Items)?.with_cache(CacheSettings {
            enabled: cache_enabled,
            expiration_secs: CACHE_NEVER_EXPIRES,
        });
        self.run(&job).await
    }

    /// Retrieve trades, with item metadata attached to every tradeable item.
    ///
    /// Runs a trade crawl followed by a cached item crawl.
    pub async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<Trade>> {
        let job = self.trade_job(query)?;
        let trades: Vec<Trade> = self.run(&job).await?;
        let items = self.get_items(true).await?;

        info!(
            "Attaching item metadata to {} trades from {} items",
            trades.len(),
            items.len()
        );
        Ok(enrich(&trades, &items))
    }

    /// Retrieve achievement data
    pub async fn get_achievements(&self, cache_enabled: bool) -> Result<Vec<Achievement>> {
        let job = self.job(CrawlKind::Achievements)?.with_cache(CacheSettings {
            enabled: cache_enabled,
            expiration_secs: CACHE_NEVER_EXPIRES,
        });
        self.run(&job).await
    }

    /// Trade crawl with the query's start URL and caps; the page cap stays
    fn trade_job(&self, query: &TradeQuery) -> Result<CrawlJob> {
        let mut job = self.job(CrawlKind::Trades)?;
        if let Some(url) = &query.start_url {
            job = job.with_start_urls(vec![url.clone()]);
        }
        let limits = CrawlLimits {
            concurrency: query.concurrency,
            max_records: (query.max_trades > 0).then_some(query.max_trades),
            ..job.limits
        };
        Ok(job.with_limits(limits))
    }

    fn job(&self, kind: CrawlKind) -> Result<CrawlJob> {
        Ok(CrawlJob::new(
            kind,
            self.settings.engine_for(kind)?,
            unique_channel_path(&self.settings.channel_dir, kind),
        ))
    }

    async fn run<T: DeserializeOwned>(&self, job: &CrawlJob) -> Result<Vec<T>> {
        self.runner.run(job, self.settings.reclaim_channels).await
    }
}
