// src/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{Settings, WishlistConfig};
use crate::db::{state, Database};
use crate::domain::{diff_snapshot, Platform};
use crate::fetchers::{fetcher_for, FetchOutcome, Fetcher, RateLimiter};
use crate::mailer::Notifier;
use crate::shutdown::Shutdown;

/// Drives one fetch→diff→commit cycle per wishlist on independent timers.
///
/// Every enabled wishlist gets its own thread, so one slow or failing
/// wishlist never stalls another; the only cross-thread rendezvous is the
/// per-platform rate limiter all fetchers of that platform share.
pub struct Scheduler {
    db: Database,
    settings: Settings,
    notifier: Arc<dyn Notifier>,
    shutdown: Arc<Shutdown>,
    limiters: HashMap<Platform, Arc<RateLimiter>>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        settings: Settings,
        notifier: Arc<dyn Notifier>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        let spacing = Duration::from_secs(settings.min_fetch_spacing_secs);
        let limiters = [Platform::Amazon, Platform::Throne]
            .into_iter()
            .map(|p| (p, Arc::new(RateLimiter::new(spacing))))
            .collect();
        Self {
            db,
            settings,
            notifier,
            shutdown,
            limiters,
        }
    }

    /// Continuous mode: every wishlist loops forever on its own cadence
    /// until shutdown.
    pub fn run_daemon(&self, wishlists: Vec<WishlistConfig>) {
        let mut handles = Vec::new();
        for wl in wishlists {
            if let Some(platform) = validated_platform(&wl) {
                handles.push(self.spawn_wishlist_thread(wl, platform, true));
            }
        }
        if handles.is_empty() {
            log::error!("No enabled wishlists to watch; exiting");
            return;
        }
        log::info!(
            "Watching {} wishlists (global poll every {} minutes)",
            handles.len(),
            self.settings.poll_minutes
        );
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Single-pass mode: every enabled wishlist runs exactly one cycle,
    /// concurrently, and we return when all are done.
    pub fn run_once(&self, mut wishlists: Vec<WishlistConfig>) {
        // Shuffle so repeated single-pass runs don't always hit the
        // platforms in config order.
        wishlists.shuffle(&mut rand::thread_rng());

        let mut handles = Vec::new();
        for wl in wishlists {
            if let Some(platform) = validated_platform(&wl) {
                handles.push(self.spawn_wishlist_thread(wl, platform, false));
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
        log::info!("Single pass complete");
    }

    fn spawn_wishlist_thread(
        &self,
        wl: WishlistConfig,
        platform: Platform,
        continuous: bool,
    ) -> thread::JoinHandle<()> {
        let db = self.db.clone();
        let settings = self.settings.clone();
        let notifier = Arc::clone(&self.notifier);
        let shutdown = Arc::clone(&self.shutdown);
        let limiter = Arc::clone(&self.limiters[&platform]);

        thread::spawn(move || {
            let fetcher = match fetcher_for(
                platform,
                settings.fetch_constraints(),
                limiter,
                Arc::clone(&shutdown),
            ) {
                Ok(f) => f,
                Err(e) => {
                    log::error!("Fetcher init failed for '{}': {e}", wl.name);
                    return;
                }
            };

            if !continuous {
                run_cycle(&db, &wl, platform, fetcher.as_ref(), notifier.as_ref(), &settings);
                return;
            }

            let interval = effective_interval(wl.poll_minutes, settings.poll_minutes);
            loop {
                if shutdown.is_triggered() {
                    break;
                }
                run_cycle(&db, &wl, platform, fetcher.as_ref(), notifier.as_ref(), &settings);
                if shutdown.sleep(jittered_interval(interval)) {
                    break;
                }
            }
            log::info!("Wishlist thread for '{}' stopped", wl.name);
        })
    }
}

/// One fetch→diff→commit cycle. Any failure is contained here: it is
/// logged, the store is left untouched, and the next cycle retries from
/// scratch.
pub(crate) fn run_cycle(
    db: &Database,
    wl: &WishlistConfig,
    platform: Platform,
    fetcher: &dyn Fetcher,
    notifier: &dyn Notifier,
    settings: &Settings,
) {
    log::info!(
        "Processing wishlist: platform={platform}, name={}, identifier={}",
        wl.name,
        wl.identifier
    );

    match fetcher.fetch(&wl.identifier) {
        FetchOutcome::Success(items) => {
            let stored = match state::get_snapshot(db, platform, &wl.identifier) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Snapshot load failed for '{}': {e}; skipping cycle", wl.name);
                    return;
                }
            };
            let previous_count = stored.len();

            let (snapshot, events) = diff_snapshot(
                platform,
                &wl.identifier,
                &stored,
                &items,
                settings.price_threshold_percent,
                Utc::now(),
            );

            if let Err(e) = state::commit_cycle(db, platform, &wl.identifier, &snapshot, &events)
            {
                log::error!(
                    "Commit failed for '{}': {e}; state unchanged, retrying next cycle",
                    wl.name
                );
                return;
            }

            if events.is_empty() {
                log::info!("No changes for {platform} '{}' ({})", wl.name, wl.identifier);
                return;
            }
            log::info!(
                "{} events for {platform} '{}' ({previous_count} -> {} items)",
                events.len(),
                wl.name,
                items.len()
            );
            if let Err(e) =
                notifier.notify(wl, platform, &events, &snapshot, previous_count, items.len())
            {
                log::error!("Notification failed for '{}': {e}", wl.name);
            }
        }
        FetchOutcome::RateLimited => {
            log::warn!("Rate limited fetching '{}'; skipping cycle", wl.name);
        }
        FetchOutcome::CaptchaDetected => {
            log::warn!("CAPTCHA blocked '{}'; skipping cycle", wl.name);
        }
        FetchOutcome::TransientError(e) => {
            log::warn!("Transient failure for '{}': {e}; skipping cycle", wl.name);
        }
        FetchOutcome::FatalParseError(e) => {
            log::error!("Unparseable response for '{}': {e}; skipping cycle", wl.name);
        }
    }
}

/// Validate a config entry down to a platform, or log why it is skipped.
fn validated_platform(wl: &WishlistConfig) -> Option<Platform> {
    if wl.name.trim().is_empty() || wl.identifier.trim().is_empty() {
        log::error!("Invalid wishlist entry (missing name/identifier): {wl:?}");
        return None;
    }
    let Some(platform) = Platform::parse(&wl.platform) else {
        log::error!(
            "No fetcher registered for platform '{}'; skipping wishlist '{}'",
            wl.platform,
            wl.name
        );
        return None;
    };
    if !wl.enabled {
        log::info!("Wishlist '{}' ({platform}) is disabled; skipping", wl.name);
        return None;
    }
    Some(platform)
}

/// The wishlist's own interval when configured, else the global default;
/// nothing ever polls faster than once a minute.
pub fn effective_interval(poll_minutes: Option<i64>, global_minutes: u64) -> Duration {
    let minutes = match poll_minutes {
        Some(m) if m >= 1 => m as u64,
        Some(_) => 1,
        None => global_minutes.max(1),
    };
    Duration::from_secs(minutes * 60)
}

/// ±10% so wishlists sharing an interval drift apart over time.
fn jittered_interval(base: Duration) -> Duration {
    let secs = base.as_secs_f64();
    if secs <= 0.0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(-0.1 * secs..=0.1 * secs);
    Duration::from_secs_f64(secs + jitter)
}
