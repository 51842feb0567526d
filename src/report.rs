// src/report.rs
//
// Renders one diff cycle's events into the email bodies. Pure string
// building; nothing here touches the store or the network.

use maud::{html, Markup};

use crate::domain::{Event, EventKind, Platform, Snapshot};

pub fn format_cents(cents: Option<i64>, currency: &str) -> String {
    let Some(c) = cents else {
        return "Unavailable".to_string();
    };
    let sym = match currency {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        _ => "",
    };
    if sym.is_empty() {
        format!("{:.2} {}", c as f64 / 100.0, currency)
    } else {
        format!("{sym}{:.2}", c as f64 / 100.0)
    }
}

fn format_delta(event: &Event) -> Option<String> {
    let pct = event.percent_change?;
    let sign = if pct >= 0.0 { "+" } else { "-" };
    Some(format!("{sign}{:.1}%", pct.abs()))
}

fn partition(events: &[Event]) -> (Vec<&Event>, Vec<&Event>, Vec<&Event>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut price_changes = Vec::new();
    for e in events {
        match e.kind {
            EventKind::Added => added.push(e),
            EventKind::Removed => removed.push(e),
            EventKind::PriceChange => price_changes.push(e),
        }
    }
    (added, removed, price_changes)
}

fn currency_for<'a>(event: &Event, snapshot: &'a Snapshot) -> &'a str {
    snapshot
        .get(&event.item_id)
        .map(|s| s.item.currency.as_str())
        .unwrap_or("USD")
}

fn url_for<'a>(event: &Event, snapshot: &'a Snapshot) -> Option<&'a str> {
    snapshot
        .get(&event.item_id)
        .map(|s| s.item.product_url.as_str())
        .filter(|u| !u.is_empty())
}

fn item_line(event: &Event, snapshot: &Snapshot) -> Markup {
    html! {
        @match url_for(event, snapshot) {
            Some(url) => a href=(url) { (event.name) },
            None => (event.name),
        }
    }
}

pub fn build_html_report(
    platform: Platform,
    wishlist_name: &str,
    wishlist_id: &str,
    events: &[Event],
    snapshot: &Snapshot,
    previous_count: usize,
    new_count: usize,
) -> String {
    let (added, removed, price_changes) = partition(events);
    let unchanged = previous_count
        .saturating_sub(removed.len())
        .saturating_sub(price_changes.len());

    let markup = html! {
        div {
            h2 { (platform.display_name()) " wishlist: " (wishlist_name) }
            p { small { "Wishlist: " (wishlist_id) } }
            p {
                "Summary: " strong { (added.len()) } " added, "
                strong { (removed.len()) } " removed, "
                strong { (price_changes.len()) } " price changes, "
                (unchanged) " unchanged ("
                (previous_count) " → " (new_count) " items)"
            }

            @if !added.is_empty() {
                h3 { "Added" }
                ul {
                    @for e in &added {
                        li {
                            (item_line(e, snapshot))
                            " — " (format_cents(e.price_after, currency_for(e, snapshot)))
                        }
                    }
                }
            }

            @if !price_changes.is_empty() {
                h3 { "Price changes" }
                ul {
                    @for e in &price_changes {
                        li {
                            (item_line(e, snapshot))
                            " — " (format_cents(e.price_before, currency_for(e, snapshot)))
                            " → " (format_cents(e.price_after, currency_for(e, snapshot)))
                            @if let Some(delta) = format_delta(e) {
                                " (" (delta) ")"
                            }
                        }
                    }
                }
            }

            @if !removed.is_empty() {
                h3 { "Removed" }
                ul {
                    @for e in &removed {
                        li { (e.name) }
                    }
                }
            }
        }
    };
    markup.into_string()
}

pub fn build_plaintext_report(
    platform: Platform,
    wishlist_name: &str,
    wishlist_id: &str,
    events: &[Event],
    snapshot: &Snapshot,
    previous_count: usize,
    new_count: usize,
) -> String {
    let (added, removed, price_changes) = partition(events);
    let unchanged = previous_count
        .saturating_sub(removed.len())
        .saturating_sub(price_changes.len());

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("Platform: {}", platform.display_name()));
    lines.push(format!("Wishlist: {wishlist_name} ({wishlist_id})"));
    lines.push(format!(
        "Summary: {} added, {} removed, {} price changes, {} unchanged ({} -> {} items)",
        added.len(),
        removed.len(),
        price_changes.len(),
        unchanged,
        previous_count,
        new_count,
    ));

    if !added.is_empty() {
        lines.push(String::new());
        lines.push("Added:".to_string());
        for e in &added {
            lines.push(format!(
                "  + {} ({})",
                e.name,
                format_cents(e.price_after, currency_for(e, snapshot))
            ));
        }
    }

    if !price_changes.is_empty() {
        lines.push(String::new());
        lines.push("Price changes:".to_string());
        for e in &price_changes {
            let delta = format_delta(e)
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            lines.push(format!(
                "  ~ {}: {} -> {}{delta}",
                e.name,
                format_cents(e.price_before, currency_for(e, snapshot)),
                format_cents(e.price_after, currency_for(e, snapshot)),
            ));
        }
    }

    if !removed.is_empty() {
        lines.push(String::new());
        lines.push("Removed:".to_string());
        for e in &removed {
            lines.push(format!("  - {}", e.name));
        }
    }

    lines.join("\n")
}
