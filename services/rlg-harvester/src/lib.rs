//! RLG Harvester Library
//!
//! Process-isolated crawls of Rocket League Garage: each crawl runs in its own
//! worker process, records are normalized inline, handed back through a
//! newline-delimited JSON channel, and trades are enriched with item metadata.

pub mod api;
pub mod channel;
pub mod config;
pub mod crawl;
pub mod enrich;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod runner;
pub mod worker;


// Re-export main types for convenience
pub use api::{GarageClient, TradeQuery};
pub use config::HarvesterSettings;
pub use crawl::{
    CacheSettings, CrawlEngine, CrawlJob, CrawlKind, CrawlLimits, CrawlStats, EngineSpec, Page,
    StopReason,
};
pub use enrich::enrich;
pub use error::{HarvestError, Result};
pub use pipeline::{
    AchievementPipeline, DropReason, ItemPipeline, RecordPipeline, TradePipeline, Verdict,
};
pub use records::{Achievement, Item, ItemMetadata, Trade, TradeableItem};
pub use runner::{ExitPolicy, IsolatedCrawlRunner};
