//! End-to-end cycles against a mock platform: fetch → diff → commit → notify.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{Settings, WishlistConfig};
use crate::db::{state, Database};
use crate::domain::{EventKind, Platform};
use crate::fetchers::{AmazonFetcher, Fetcher, RateLimiter};
use crate::scheduler::run_cycle;
use crate::shutdown::Shutdown;
use crate::tests::utils::{init_test_db, test_settings, RecordingNotifier};

fn books_wishlist() -> WishlistConfig {
    WishlistConfig {
        platform: "amazon".to_string(),
        name: "Books".to_string(),
        identifier: "LIST1".to_string(),
        recipients: Vec::new(),
        poll_minutes: None,
        enabled: true,
    }
}

fn amazon_fetcher(base_url: &str, settings: &Settings) -> AmazonFetcher {
    AmazonFetcher::new(
        settings.fetch_constraints(),
        Arc::new(RateLimiter::new(Duration::ZERO)),
        Shutdown::new(),
    )
    .unwrap()
    .with_base_url(base_url)
}

fn list_page(items: &[(&str, &str, &str)]) -> String {
    let mut body = String::from("<html><body><div id=\"g-items\"><ul>");
    for (i, (dp, title, price)) in items.iter().enumerate() {
        body.push_str(&format!(
            "<li id=\"itemWrapper_{i}\"><a href=\"/dp/{dp}\">\
             <span class=\"awl-item-title\">{title}</span></a>\
             <span class=\"a-price-whole\">{price}.</span></li>"
        ));
    }
    body.push_str("</ul></div></body></html>");
    body
}

fn run_one_cycle(
    db: &Database,
    base_url: &str,
    settings: &Settings,
    notifier: &RecordingNotifier,
) {
    let fetcher = amazon_fetcher(base_url, settings);
    run_cycle(
        db,
        &books_wishlist(),
        Platform::Amazon,
        &fetcher as &dyn Fetcher,
        notifier,
        settings,
    );
}

#[tokio::test]
async fn changes_are_detected_across_cycles() {
    let (db, _tmp) = init_test_db();
    let settings = test_settings();
    let notifier = Arc::new(RecordingNotifier::default());

    let server = MockServer::start().await;
    // First cycle sees one book at $20; second sees it at $25 (a +25%
    // move over the 20% threshold) plus a new arrival.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_page(&[(
            "B0001", "Dune", "20",
        )])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_page(&[
            ("B0001", "Dune", "25"),
            ("B0002", "Hyperion", "10"),
        ])))
        .mount(&server)
        .await;

    let uri = server.uri();
    {
        let db = db.clone();
        let settings = settings.clone();
        let notifier = Arc::clone(&notifier);
        tokio::task::spawn_blocking(move || {
            run_one_cycle(&db, &uri, &settings, &notifier);
            run_one_cycle(&db, &uri, &settings, &notifier);
        })
        .await
        .unwrap();
    }

    let snapshot = state::get_snapshot(&db, Platform::Amazon, "LIST1").unwrap();
    assert_eq!(snapshot.len(), 2);
    let dune = snapshot
        .values()
        .find(|s| s.item.name == "Dune")
        .expect("Dune still tracked");
    assert_eq!(dune.item.price_cents, Some(2500));

    let events = state::recent_events(&db, Platform::Amazon, "LIST1", 10).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Added, EventKind::PriceChange, EventKind::Added]
    );
    assert_eq!(events[1].price_before, Some(2000));
    assert_eq!(events[1].price_after, Some(2500));

    let cycles = notifier.cycles.lock().unwrap();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0].wishlist, "Books");
    assert_eq!(cycles[0].previous_count, 0);
    assert_eq!(cycles[0].new_count, 1);
    assert_eq!(cycles[1].previous_count, 1);
    assert_eq!(cycles[1].new_count, 2);
    assert_eq!(cycles[1].events.len(), 2);
}

#[tokio::test]
async fn a_quiet_cycle_notifies_nobody() {
    let (db, _tmp) = init_test_db();
    let settings = test_settings();
    let notifier = Arc::new(RecordingNotifier::default());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_page(&[(
            "B0001", "Dune", "20",
        )])))
        .mount(&server)
        .await;

    let uri = server.uri();
    {
        let db = db.clone();
        let settings = settings.clone();
        let notifier = Arc::clone(&notifier);
        tokio::task::spawn_blocking(move || {
            run_one_cycle(&db, &uri, &settings, &notifier);
            // Identical content: last_seen moves, nothing else.
            run_one_cycle(&db, &uri, &settings, &notifier);
        })
        .await
        .unwrap();
    }

    let events = state::recent_events(&db, Platform::Amazon, "LIST1", 10).unwrap();
    assert_eq!(events.len(), 1); // just the initial add

    let cycles = notifier.cycles.lock().unwrap();
    assert_eq!(cycles.len(), 1);
}

#[tokio::test]
async fn a_failed_fetch_mutates_nothing() {
    let (db, _tmp) = init_test_db();
    let settings = test_settings();
    let notifier = Arc::new(RecordingNotifier::default());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_page(&[(
            "B0001", "Dune", "20",
        )])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Second cycle gets an unrecognizable page: a FatalParseError must
    // short-circuit before the diff ever runs.
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><h1>Interstitial</h1></body></html>"),
        )
        .mount(&server)
        .await;

    let uri = server.uri();
    {
        let db = db.clone();
        let settings = settings.clone();
        let notifier = Arc::clone(&notifier);
        tokio::task::spawn_blocking(move || {
            run_one_cycle(&db, &uri, &settings, &notifier);
            run_one_cycle(&db, &uri, &settings, &notifier);
        })
        .await
        .unwrap();
    }

    // Snapshot still reflects the first, successful cycle.
    let snapshot = state::get_snapshot(&db, Platform::Amazon, "LIST1").unwrap();
    assert_eq!(snapshot.len(), 1);
    let events = state::recent_events(&db, Platform::Amazon, "LIST1", 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(notifier.cycles.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn an_emptied_wishlist_removes_everything() {
    let (db, _tmp) = init_test_db();
    let settings = test_settings();
    let notifier = Arc::new(RecordingNotifier::default());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_page(&[
            ("B0001", "Dune", "20"),
            ("B0002", "Hyperion", "10"),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Still a recognizable wishlist page, just with nothing on it.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_page(&[])))
        .mount(&server)
        .await;

    let uri = server.uri();
    {
        let db = db.clone();
        let settings = settings.clone();
        let notifier = Arc::clone(&notifier);
        tokio::task::spawn_blocking(move || {
            run_one_cycle(&db, &uri, &settings, &notifier);
            run_one_cycle(&db, &uri, &settings, &notifier);
        })
        .await
        .unwrap();
    }

    let snapshot = state::get_snapshot(&db, Platform::Amazon, "LIST1").unwrap();
    assert!(snapshot.is_empty());

    let events = state::recent_events(&db, Platform::Amazon, "LIST1", 10).unwrap();
    let removed: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Removed)
        .collect();
    assert_eq!(removed.len(), 2);
}
