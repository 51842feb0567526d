use std::sync::Mutex;

use tempfile::TempDir;

use crate::config::{Mode, Settings, WishlistConfig};
use crate::db::{init_db, Database};
use crate::domain::{Event, Platform, Snapshot};
use crate::mailer::{MailerError, Notifier};

/// Initialize a fresh test DB in a temp directory using the production schema.
pub fn init_test_db() -> (Database, TempDir) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("watcher_test.sqlite3");
    let db = Database::new(path.to_str().unwrap());
    init_db(&db).unwrap_or_else(|e| panic!("Database initialization failed: {e}"));
    (db, tmp)
}

/// Settings with all sleeps zeroed so fetch loops run instantly.
pub fn test_settings() -> Settings {
    Settings {
        mode: Mode::Once,
        config_path: "config.json".to_string(),
        db_path: String::new(),
        poll_minutes: 10,
        price_threshold_percent: 20.0,
        page_sleep_secs: 0,
        retry_sleep_secs: 0,
        fail_sleep_secs: 0,
        captcha_sleep_secs: 0,
        retry_count: 3,
        max_pages: 10,
        min_fetch_spacing_secs: 0,
        request_timeout_secs: 5,
        debug_dump_html: false,
        debug_html_dir: String::new(),
        global_recipients: Vec::new(),
        brevo_api_key: String::new(),
        email_from: String::new(),
        email_from_name: "Test".to_string(),
    }
}

pub struct NotifiedCycle {
    pub wishlist: String,
    pub events: Vec<Event>,
    pub previous_count: usize,
    pub new_count: usize,
}

/// Notifier that records what it was handed instead of sending anything.
#[derive(Default)]
pub struct RecordingNotifier {
    pub cycles: Mutex<Vec<NotifiedCycle>>,
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        wishlist: &WishlistConfig,
        _platform: Platform,
        events: &[Event],
        _snapshot: &Snapshot,
        previous_count: usize,
        new_count: usize,
    ) -> Result<(), MailerError> {
        self.cycles.lock().unwrap().push(NotifiedCycle {
            wishlist: wishlist.name.clone(),
            events: events.to_vec(),
            previous_count,
            new_count,
        });
        Ok(())
    }
}
