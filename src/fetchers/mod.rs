mod amazon;
mod rate_limit;
mod throne;

pub use amazon::AmazonFetcher;
pub use rate_limit::RateLimiter;
pub use throne::ThroneFetcher;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::domain::{Item, Platform};
use crate::shutdown::Shutdown;

/// Result of one fetch attempt against one wishlist.
///
/// Callers branch on the kind explicitly; an unparseable page is never
/// coerced into an empty `Success`, because an empty-but-understood page
/// must be allowed to diff to "everything removed" while garbage must not.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(Vec<Item>),
    /// The platform is throttling us (HTTP 429/503) and kept doing so
    /// through the bounded wait.
    RateLimited,
    /// An anti-bot challenge page kept coming back through the bounded
    /// backoff.
    CaptchaDetected,
    /// Network/HTTP failure that exhausted its retry budget. The next
    /// scheduled cycle is the retry.
    TransientError(String),
    /// A response arrived but was structurally unrecognizable. Retrying
    /// within this cycle will not fix a markup mismatch.
    FatalParseError(String),
}

/// Numeric budgets and pacing knobs, handed down from configuration.
/// The fetchers treat these as opaque values.
#[derive(Debug, Clone)]
pub struct FetchConstraints {
    pub max_pages: usize,
    /// Per-page retry budget for non-200/network failures; also bounds the
    /// separate captcha and throttle counters.
    pub retry_count: u32,
    /// Courtesy delay between successive pages of one attempt.
    pub page_sleep: Duration,
    /// Backoff after a retriable page failure.
    pub retry_sleep: Duration,
    /// Final backoff before abandoning an attempt as transient.
    pub fail_sleep: Duration,
    /// Long backoff after an anti-bot challenge.
    pub captcha_sleep: Duration,
    pub request_timeout: Duration,
    pub debug_dump_html: bool,
    pub debug_html_dir: String,
}

/// Retrieves the current item set for one wishlist identifier.
pub trait Fetcher {
    fn fetch(&self, identifier: &str) -> FetchOutcome;
}

/// Build the fetcher for a platform. Selection is by configuration value,
/// never by inspecting anything at runtime.
pub fn fetcher_for(
    platform: Platform,
    constraints: FetchConstraints,
    limiter: Arc<RateLimiter>,
    shutdown: Arc<Shutdown>,
) -> Result<Box<dyn Fetcher>, String> {
    match platform {
        Platform::Amazon => {
            AmazonFetcher::new(constraints, limiter, shutdown).map(|f| Box::new(f) as Box<dyn Fetcher>)
        }
        Platform::Throne => {
            ThroneFetcher::new(constraints, limiter, shutdown).map(|f| Box::new(f) as Box<dyn Fetcher>)
        }
    }
}

/// Sleep duration with the original 0.5x..1.5x spread, so retries from many
/// wishlists don't land in lockstep.
pub(crate) fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let secs = base.as_secs_f64();
    let jittered = rand::thread_rng().gen_range(secs * 0.5..=secs * 1.5);
    Duration::from_secs_f64(jittered)
}

/// Side channel: dump a raw response body for offline inspection. Never a
/// fetch failure; problems here are only logged.
pub(crate) fn dump_debug_html(
    constraints: &FetchConstraints,
    label: &str,
    suffix: &str,
    body: &str,
) {
    if !constraints.debug_dump_html {
        return;
    }
    let safe: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let safe = if safe.is_empty() { "wishlist".to_string() } else { safe };
    let dir = Path::new(&constraints.debug_html_dir);
    let path = dir.join(format!("{safe}_{suffix}.html"));
    let result = fs::create_dir_all(dir).and_then(|_| fs::write(&path, body));
    match result {
        Ok(()) => log::info!("Debug HTML written: {}", path.display()),
        Err(e) => log::warn!("Failed to write debug HTML to {}: {e}", path.display()),
    }
}
