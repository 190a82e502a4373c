//! Record schema
//!
//! Two shapes per record kind:
//! - `Scraped*` - what the crawl engine hands over. Any field may be missing and
//!   integer fields may arrive as numeric strings.
//! - Normalized records (`Item`, `Trade`, ...) - every field present, produced
//!   by the per-record pipeline and written to the output channel.

use serde::{Deserialize, Deserializer, Serialize};

/// Rocket League item from the item catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Associated ID on Rocket League Garage
    pub data_id: i64,
    /// Relative URL of the item image
    pub img_url: String,
    pub name: String,
    pub category: String,
    /// "All" when the item exists on every platform
    pub platform: String,
    pub rarity: String,
    /// DLC pack the item ships with, if any
    pub dlcpack: String,
}

/// Item metadata attached to a tradeable item by enrichment.
///
/// Fields stay `None` until a matching `Item` is found, and `None` fields are
/// left out of the serialized record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlcpack: Option<String>,
}

impl ItemMetadata {
    pub fn is_empty(&self) -> bool {
        *self == ItemMetadata::default()
    }
}

impl From<&Item> for ItemMetadata {
    fn from(item: &Item) -> Self {
        Self {
            img_url: Some(item.img_url.clone()),
            name: Some(item.name.clone()),
            category: Some(item.category.clone()),
            platform: Some(item.platform.clone()),
            rarity: Some(item.rarity.clone()),
            dlcpack: Some(item.dlcpack.clone()),
        }
    }
}

/// An item offered or requested inside a trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeableItem {
    /// Reference into the item catalog; may not resolve
    pub data_id: i64,
    pub count: u32,
    pub certification: String,
    pub paint: String,
    #[serde(flatten)]
    pub metadata: ItemMetadata,
}

impl TradeableItem {
    /// Copy the catalog fields of `item` onto this entry.
    ///
    /// `count`, `certification` and `paint` belong to the trade and are kept.
    pub fn overlay(&mut self, item: &Item) {
        self.metadata = ItemMetadata::from(item);
    }
}

/// A trade post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique alias of the trade on RLG
    pub data_id: String,
    /// Relative URL of the trade
    pub url: String,
    pub rlg_username: String,
    /// Uppercased platform name
    pub platform: String,
    pub have: Vec<TradeableItem>,
    pub want: Vec<TradeableItem>,
}

impl Trade {
    /// Iterate over every tradeable item, `have` first.
    pub fn tradeable_items(&self) -> impl Iterator<Item = &TradeableItem> {
        self.have.iter().chain(self.want.iter())
    }

    pub fn tradeable_items_mut(&mut self) -> impl Iterator<Item = &mut TradeableItem> {
        self.have.iter_mut().chain(self.want.iter_mut())
    }
}

/// Rocket League achievement / trophy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub name: String,
    pub img_url: String,
    /// Gamerscore on the XBOX platform
    pub gamerscore: i64,
    /// Uppercased trophy tier on PSN (BRONZE, SILVER, ...)
    pub trophy_type: String,
    pub description: String,
}

// --- Scraped forms ---

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrapedItem {
    #[serde(default, deserialize_with = "loose_int")]
    pub data_id: Option<i64>,
    #[serde(default)]
    pub img_url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub dlcpack: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrapedTradeableItem {
    #[serde(default, deserialize_with = "loose_int")]
    pub data_id: Option<i64>,
    #[serde(default, deserialize_with = "loose_int")]
    pub count: Option<i64>,
    #[serde(default)]
    pub certification: Option<String>,
    #[serde(default)]
    pub paint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrapedTrade {
    #[serde(default)]
    pub data_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rlg_username: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub have: Vec<ScrapedTradeableItem>,
    #[serde(default)]
    pub want: Vec<ScrapedTradeableItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrapedAchievement {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub img_url: Option<String>,
    #[serde(default, deserialize_with = "loose_int")]
    pub gamerscore: Option<i64>,
    #[serde(default)]
    pub trophy_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseInt {
    Int(i64),
    Text(String),
}

/// Accept `5`, `"5"` or `" 5 "`. Non-numeric text reads as absent.
fn loose_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LooseInt>::deserialize(deserializer)? {
        Some(LooseInt::Int(v)) => Some(v),
        Some(LooseInt::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
