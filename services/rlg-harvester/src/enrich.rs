//! Trade enrichment with item catalog metadata

use std::collections::HashMap;

use tracing::debug;

use crate::records::{Item, Trade};

/// Attach item metadata to every tradeable item referenced by `trades`.
///
/// Entries whose `data_id` is not in `items` pass through unchanged. When
/// `items` repeats an id the last one wins. Neither input is modified.
pub fn enrich(trades: &[Trade], items: &[Item]) -> Vec<Trade> {
    let catalog: HashMap<i64, &Item> = items.iter().map(|item| (item.data_id, item)).collect();

    let mut misses = 0usize;
    let enriched: Vec<Trade> = trades
        .iter()
        .cloned()
        .map(|mut trade| {
            for entry in trade.tradeable_items_mut() {
                match catalog.get(&entry.data_id) {
                    Some(item) => entry.overlay(item),
                    None => misses += 1,
                }
            }
            trade
        })
        .collect();

    debug!(
        "Enriched {} trades against {} catalog items ({} unresolved entries)",
        trades.len(),
        catalog.len(),
        misses
    );

    enriched
}
