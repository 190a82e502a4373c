//! Per-record pipelines
//!
//! Every crawl kind gets exactly one pipeline, built fresh for that crawl and
//! owned by the crawl loop. A pipeline turns each scraped record into a
//! normalized record, or drops it, before anything reaches the output channel.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::records::{
    Achievement, Item, ItemMetadata, ScrapedAchievement, ScrapedItem, ScrapedTrade,
    ScrapedTradeableItem, Trade, TradeableItem,
};

/// Outcome of running one record through a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    Keep(T),
    Drop(DropReason),
}

impl<T> Verdict<T> {
    pub fn kept(self) -> Option<T> {
        match self {
            Verdict::Keep(record) => Some(record),
            Verdict::Drop(_) => None,
        }
    }
}

/// Why a record never reached the output channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("item {0} already added")]
    Duplicate(i64),

    #[error("record has no usable data_id")]
    MissingKey,
}

/// A per-record transformation applied inline during a crawl
pub trait RecordPipeline: Send {
    /// Form handed over by the crawl engine
    type Scraped: DeserializeOwned;
    /// Normalized form written to the output channel
    type Record: Serialize;

    fn name(&self) -> &'static str;

    fn process(&mut self, scraped: Self::Scraped) -> Verdict<Self::Record>;
}

/// Deduplicates items by `data_id` and fills defaults.
///
/// The first record seen for an id wins; later ones are dropped, not merged.
#[derive(Debug, Default)]
pub struct ItemPipeline {
    seen: HashSet<i64>,
}

impl ItemPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct ids accepted so far
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

impl RecordPipeline for ItemPipeline {
    type Scraped = ScrapedItem;
    type Record = Item;

    fn name(&self) -> &'static str {
        "item"
    }

    fn process(&mut self, scraped: ScrapedItem) -> Verdict<Item> {
        let Some(data_id) = scraped.data_id else {
            return Verdict::Drop(DropReason::MissingKey);
        };
        if !self.seen.insert(data_id) {
            return Verdict::Drop(DropReason::Duplicate(data_id));
        }

        Verdict::Keep(Item {
            data_id,
            img_url: scraped.img_url.unwrap_or_default(),
            name: scraped.name.unwrap_or_default(),
            category: scraped.category.unwrap_or_default(),
            platform: scraped.platform.unwrap_or_default(),
            rarity: scraped.rarity.unwrap_or_default(),
            dlcpack: scraped.dlcpack.unwrap_or_default(),
        })
    }
}

/// Fills tradeable item defaults (`count` 1, empty certification and paint).
/// No deduplication.
#[derive(Debug, Default)]
pub struct TradePipeline;

impl TradePipeline {
    pub fn new() -> Self {
        Self
    }
}

impl RecordPipeline for TradePipeline {
    type Scraped = ScrapedTrade;
    type Record = Trade;

    fn name(&self) -> &'static str {
        "trade"
    }

    fn process(&mut self, scraped: ScrapedTrade) -> Verdict<Trade> {
        let data_id = scraped.data_id.unwrap_or_default();
        let have = normalize_side(&data_id, scraped.have);
        let want = normalize_side(&data_id, scraped.want);

        Verdict::Keep(Trade {
            url: scraped.url.unwrap_or_default(),
            rlg_username: scraped.rlg_username.unwrap_or_default(),
            platform: scraped.platform.unwrap_or_default().trim().to_uppercase(),
            have,
            want,
            data_id,
        })
    }
}

fn normalize_side(trade_id: &str, side: Vec<ScrapedTradeableItem>) -> Vec<TradeableItem> {
    side.into_iter()
        .filter_map(|scraped| {
            let entry = normalize_tradeable(scraped);
            if entry.is_none() {
                warn!("Trade {}: skipping tradeable item without data_id", trade_id);
            }
            entry
        })
        .collect()
}

fn normalize_tradeable(scraped: ScrapedTradeableItem) -> Option<TradeableItem> {
    Some(TradeableItem {
        data_id: scraped.data_id?,
        count: scraped
            .count
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(1),
        certification: scraped.certification.unwrap_or_default(),
        paint: scraped.paint.unwrap_or_default(),
        metadata: ItemMetadata::default(),
    })
}

/// Fills achievement defaults and uppercases the trophy type
#[derive(Debug, Default)]
pub struct AchievementPipeline;

impl AchievementPipeline {
    pub fn new() -> Self {
        Self
    }
}

impl RecordPipeline for AchievementPipeline {
    type Scraped = ScrapedAchievement;
    type Record = Achievement;

    fn name(&self) -> &'static str {
        "achievement"
    }

    fn process(&mut self, scraped: ScrapedAchievement) -> Verdict<Achievement> {
        Verdict::Keep(Achievement {
            name: scraped.name.unwrap_or_default(),
            img_url: scraped.img_url.unwrap_or_default(),
            gamerscore: scraped.gamerscore.unwrap_or_default(),
            trophy_type: scraped.trophy_type.unwrap_or_default().trim().to_uppercase(),
            description: scraped.description.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scraped_item(data_id: i64, name: &str) -> ScrapedItem {
        ScrapedItem {
            data_id: Some(data_id),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn scraped_tradeable(data_id: i64) -> ScrapedTradeableItem {
        ScrapedTradeableItem {
            data_id: Some(data_id),
            ..Default::default()
        }
    }

    #[test]
    fn test_item_pipeline_keeps_first_duplicate() {
        let mut pipeline = ItemPipeline::new();

        let first = pipeline.process(scraped_item(5, "Octane"));
        let second = pipeline.process(scraped_item(5, "Octane ZSR"));

        assert_eq!(first.kept().map(|i| i.name), Some("Octane".to_string()));
        assert_eq!(second, Verdict::Drop(DropReason::Duplicate(5)));
        assert_eq!(pipeline.seen_count(), 1);
    }

    #[test]
    fn test_item_pipeline_output_is_unique_and_complete() {
        let mut pipeline = ItemPipeline::new();
        let ids = [3, 1, 3, 2, 1, 4, 4, 4];

        let kept: Vec<Item> = ids
            .iter()
            .filter_map(|id| pipeline.process(scraped_item(*id, "x")).kept())
            .collect();

        let unique: HashSet<i64> = kept.iter().map(|i| i.data_id).collect();
        assert_eq!(kept.len(), unique.len());
        assert_eq!(kept.iter().map(|i| i.data_id).collect::<Vec<_>>(), vec![3, 1, 2, 4]);

        // Every declared field is present once serialized
        for item in &kept {
            let value = serde_json::to_value(item).unwrap();
            let fields = [
                "data_id", "img_url", "name", "category", "platform", "rarity", "dlcpack",
            ];
            for field in fields {
                assert!(value.get(field).is_some(), "missing {}", field);
            }
            assert_eq!(item.dlcpack, "");
        }
    }

    #[test]
    fn test_item_pipeline_drops_missing_key() {
        let mut pipeline = ItemPipeline::new();
        let verdict = pipeline.process(ScrapedItem::default());
        assert_eq!(verdict, Verdict::Drop(DropReason::MissingKey));
        assert_eq!(pipeline.seen_count(), 0);
    }

    #[test]
    fn test_fresh_pipeline_does_not_remember_previous_crawl() {
        let mut first_crawl = ItemPipeline::new();
        assert!(first_crawl.process(scraped_item(9, "Breakout")).kept().is_some());

        let mut second_crawl = ItemPipeline::new();
        assert!(second_crawl.process(scraped_item(9, "Breakout")).kept().is_some());
    }

    #[test]
    fn test_trade_pipeline_fills_defaults() {
        let mut pipeline = TradePipeline::new();
        let scraped = ScrapedTrade {
            data_id: Some("abc123".to_string()),
            platform: Some("steam".to_string()),
            have: vec![scraped_tradeable(7)],
            want: vec![ScrapedTradeableItem {
                data_id: Some(8),
                count: Some(4),
                certification: Some("Sniper".to_string()),
                paint: Some("Black".to_string()),
            }],
            ..Default::default()
        };

        let trade = pipeline.process(scraped).kept().unwrap();

        assert_eq!(trade.platform, "STEAM");
        assert_eq!(trade.have[0].count, 1);
        assert_eq!(trade.have[0].certification, "");
        assert_eq!(trade.have[0].paint, "");
        assert_eq!(trade.want[0].count, 4);
        assert_eq!(trade.want[0].certification, "Sniper");
        assert_eq!(trade.want[0].paint, "Black");
        assert_eq!(trade.url, "");
        assert_eq!(trade.rlg_username, "");
    }

    #[test]
    fn test_trade_pipeline_is_idempotent() {
        let mut pipeline = TradePipeline::new();
        let raw = json!({
            "data_id": "t-1",
            "url": "/trade/t-1",
            "rlg_username": "kuxir97",
            "platform": "ps4",
            "have": [{"data_id": "7"}, {"data_id": 12, "count": "2", "paint": "Lime"}],
            "want": [{"data_id": 30, "certification": "Goalkeeper"}]
        });
        let once = pipeline
            .process(serde_json::from_value(raw).unwrap())
            .kept()
            .unwrap();

        let again = pipeline
            .process(serde_json::from_value(serde_json::to_value(&once).unwrap()).unwrap())
            .kept()
            .unwrap();

        assert_eq!(once, again);
        assert_eq!(once.have[1].count, 2);
    }

    #[test]
    fn test_trade_pipeline_skips_unreadable_tradeable_items() {
        let mut pipeline = TradePipeline::new();
        let scraped = ScrapedTrade {
            have: vec![ScrapedTradeableItem::default(), scraped_tradeable(7)],
            ..Default::default()
        };
        let trade = pipeline.process(scraped).kept().unwrap();
        assert_eq!(trade.have.len(), 1);
        assert_eq!(trade.have[0].data_id, 7);
    }

    #[test]
    fn test_achievement_pipeline_uppercases_trophy_type() {
        let mut pipeline = AchievementPipeline::new();
        let scraped: ScrapedAchievement = serde_json::from_value(json!({
            "name": "Rocket Scientist",
            "gamerscore": "15",
            "trophy_type": "bronze"
        }))
        .unwrap();

        let achievement = pipeline.process(scraped).kept().unwrap();
        assert_eq!(achievement.trophy_type, "BRONZE");
        assert_eq!(achievement.gamerscore, 15);
        assert_eq!(achievement.description, "");
    }
}
