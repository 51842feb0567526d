// src/domain/diff.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::event::{Event, EventKind};
use crate::domain::item::{Item, Platform};

/// One item as the state store remembers it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub item: Item,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The complete set of items believed current for one wishlist,
/// keyed by item_id.
pub type Snapshot = HashMap<String, StoredItem>;

/// Compute the next snapshot and the change events between the stored
/// snapshot and a freshly fetched item list.
///
/// Pure function of its inputs; `now` is passed in so a cycle can be
/// replayed deterministically. The caller must commit the returned pair
/// as one atomic unit or not at all.
///
/// An empty `fresh` list against a non-empty snapshot is a legitimate
/// "everything removed"; guarding against scrape failures happens in the
/// fetchers, which never surface an unparseable page as an empty success.
pub fn diff_snapshot(
    platform: Platform,
    wishlist_id: &str,
    stored: &Snapshot,
    fresh: &[Item],
    threshold_percent: f64,
    now: DateTime<Utc>,
) -> (Snapshot, Vec<Event>) {
    let mut next: Snapshot = HashMap::with_capacity(fresh.len());
    let mut events: Vec<Event> = Vec::new();

    for item in fresh {
        if next.contains_key(&item.item_id) {
            // Fetchers dedupe per attempt; first occurrence wins.
            continue;
        }
        match stored.get(&item.item_id) {
            None => {
                events.push(Event {
                    kind: EventKind::Added,
                    platform,
                    wishlist_id: wishlist_id.to_string(),
                    item_id: item.item_id.clone(),
                    name: item.name.clone(),
                    price_before: None,
                    price_after: item.price_cents,
                    percent_change: None,
                    occurred_at: now,
                });
                next.insert(
                    item.item_id.clone(),
                    StoredItem {
                        item: item.clone(),
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
            Some(prev) => {
                if let Some(change) =
                    price_change(prev.item.price_cents, item.price_cents, threshold_percent)
                {
                    events.push(Event {
                        kind: EventKind::PriceChange,
                        platform,
                        wishlist_id: wishlist_id.to_string(),
                        item_id: item.item_id.clone(),
                        name: item.name.clone(),
                        price_before: prev.item.price_cents,
                        price_after: item.price_cents,
                        percent_change: change,
                        occurred_at: now,
                    });
                }
                next.insert(
                    item.item_id.clone(),
                    StoredItem {
                        item: item.clone(),
                        first_seen: prev.first_seen,
                        last_seen: now,
                    },
                );
            }
        }
    }

    // Anything left only in the stored snapshot was removed upstream.
    // Sorted so the event order is deterministic for a given input pair.
    let mut removed_ids: Vec<&String> = stored
        .keys()
        .filter(|id| !next.contains_key(*id))
        .collect();
    removed_ids.sort();
    for id in removed_ids {
        let prev = &stored[id];
        events.push(Event {
            kind: EventKind::Removed,
            platform,
            wishlist_id: wishlist_id.to_string(),
            item_id: id.clone(),
            name: prev.item.name.clone(),
            price_before: prev.item.price_cents,
            price_after: None,
            percent_change: None,
            occurred_at: now,
        });
    }

    (next, events)
}

/// Decide whether a price move is worth an event.
///
/// Returns `None` for no event, `Some(pct)` for an event where `pct` is the
/// signed percent change, itself `None` when either side had no known price
/// (a transition to or from "unavailable" is always reported, but no
/// percentage can be computed for it).
fn price_change(
    before: Option<i64>,
    after: Option<i64>,
    threshold_percent: f64,
) -> Option<Option<f64>> {
    match (before, after) {
        (None, None) => None,
        (Some(b), Some(a)) => {
            if b == a {
                return None;
            }
            // A price appearing from 0 has no meaningful baseline; treat it
            // as a full move so it always clears the threshold.
            let pct = if b == 0 {
                100.0
            } else {
                (a - b) as f64 * 100.0 / b as f64
            };
            if pct.abs() >= threshold_percent {
                Some(Some(pct))
            } else {
                None
            }
        }
        // Known -> unavailable or unavailable -> known.
        _ => Some(None),
    }
}
