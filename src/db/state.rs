// src/db/state.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{Database, StoreError};
use crate::domain::{Event, EventKind, Item, Platform, Snapshot, StoredItem};

/// Load the last committed snapshot for one wishlist.
pub fn get_snapshot(
    db: &Database,
    platform: Platform,
    wishlist_id: &str,
) -> Result<Snapshot, StoreError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT item_id, name, price_cents, currency, product_url, image_url,
                    available, first_seen, last_seen
             FROM items
             WHERE platform = ?1 AND wishlist_id = ?2",
        )?;
        let rows = stmt.query_map(params![platform.as_str(), wishlist_id], |row| {
            Ok(StoredItem {
                item: Item {
                    item_id: row.get(0)?,
                    name: row.get(1)?,
                    price_cents: row.get(2)?,
                    currency: row.get(3)?,
                    product_url: row.get(4)?,
                    image_url: row.get(5)?,
                    available: row.get::<_, i64>(6)? != 0,
                },
                first_seen: row.get(7)?,
                last_seen: row.get(8)?,
            })
        })?;

        let mut out: Snapshot = HashMap::new();
        for row in rows {
            let entry = row?;
            out.insert(entry.item.item_id.clone(), entry);
        }
        Ok(out)
    })
}

/// Persist the outcome of one diff cycle: the new snapshot and its events,
/// as one transaction.
///
/// All-or-nothing: a crash or error mid-commit rolls everything back, so
/// the stored snapshot can never advance without its events nor the other
/// way around. Removed items are deleted outright; their `removed` event
/// is the only trace left.
pub fn commit_cycle(
    db: &Database,
    platform: Platform,
    wishlist_id: &str,
    snapshot: &Snapshot,
    events: &[Event],
) -> Result<(), StoreError> {
    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO items (
                    platform, wishlist_id, item_id, name, price_cents, currency,
                    product_url, image_url, available, first_seen, last_seen
                )
                VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
                ON CONFLICT(platform, wishlist_id, item_id) DO UPDATE SET
                    name = excluded.name,
                    price_cents = excluded.price_cents,
                    currency = excluded.currency,
                    product_url = excluded.product_url,
                    image_url = excluded.image_url,
                    available = excluded.available,
                    last_seen = excluded.last_seen",
            )?;
            for entry in snapshot.values() {
                upsert.execute(params![
                    platform.as_str(),
                    wishlist_id,
                    entry.item.item_id,
                    entry.item.name,
                    entry.item.price_cents,
                    entry.item.currency,
                    entry.item.product_url,
                    entry.item.image_url,
                    entry.item.available as i64,
                    entry.first_seen,
                    entry.last_seen,
                ])?;
            }

            let mut insert_event = tx.prepare_cached(
                "INSERT INTO events (
                    occurred_at, platform, wishlist_id, kind,
                    item_id, name, price_before, price_after
                )
                VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?;
            let mut delete_item = tx.prepare_cached(
                "DELETE FROM items WHERE platform = ?1 AND wishlist_id = ?2 AND item_id = ?3",
            )?;
            for event in events {
                insert_event.execute(params![
                    event.occurred_at,
                    event.platform.as_str(),
                    event.wishlist_id,
                    event.kind.as_str(),
                    event.item_id,
                    event.name,
                    event.price_before,
                    event.price_after,
                ])?;
                if event.kind == EventKind::Removed {
                    delete_item.execute(params![platform.as_str(), wishlist_id, event.item_id])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    })
}

/// Read back the newest events for one wishlist, oldest first.
/// `percent_change` is not persisted, so it is absent here.
#[allow(dead_code)]
pub fn recent_events(
    db: &Database,
    platform: Platform,
    wishlist_id: &str,
    limit: usize,
) -> Result<Vec<Event>, StoreError> {
    let raw: Vec<(String, String, String, Option<i64>, Option<i64>, DateTime<Utc>)> = db
        .with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, item_id, name, price_before, price_after, occurred_at
                 FROM events
                 WHERE platform = ?1 AND wishlist_id = ?2
                 ORDER BY id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![platform.as_str(), wishlist_id, limit as i64],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;

    let mut events = Vec::with_capacity(raw.len());
    for (kind, item_id, name, price_before, price_after, occurred_at) in raw.into_iter().rev() {
        let kind = EventKind::parse(&kind)
            .ok_or_else(|| StoreError::Sql(format!("unknown event kind '{kind}'")))?;
        events.push(Event {
            kind,
            platform,
            wishlist_id: wishlist_id.to_string(),
            item_id,
            name,
            price_before,
            price_after,
            percent_change: None,
            occurred_at,
        });
    }
    Ok(events)
}
