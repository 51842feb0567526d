// src/domain/event.rs

use chrono::{DateTime, Utc};

use crate::domain::item::Platform;

/// What kind of change a diff cycle detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Removed,
    PriceChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Removed => "removed",
            EventKind::PriceChange => "price_change",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        match s {
            "added" => Some(EventKind::Added),
            "removed" => Some(EventKind::Removed),
            "price_change" => Some(EventKind::PriceChange),
            _ => None,
        }
    }
}

/// One detected change. Append-only: once committed, an event is never
/// updated or deleted by the watcher. These rows are the audit trail and
/// the sole input to notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub platform: Platform,
    pub wishlist_id: String,
    pub item_id: String,
    pub name: String,
    pub price_before: Option<i64>,
    pub price_after: Option<i64>,
    /// Signed percent move. Only present when both sides had a known price.
    pub percent_change: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}
