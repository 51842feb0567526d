// src/fetchers/amazon.rs

use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use scraper::{Html, Selector};

use crate::domain::Item;
use crate::fetchers::{
    dump_debug_html, jittered, FetchConstraints, FetchOutcome, Fetcher, RateLimiter,
};
use crate::shutdown::Shutdown;

const DEFAULT_BASE_URL: &str = "https://www.amazon.com";

// The mobile list view is far lighter on anti-bot defenses than the
// desktop one, so every request pretends to be a phone.
const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Mobile Safari/537.3",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_3_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.3.1 Mobile/15E148 Safari/604.",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_3_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) GSA/360.1.737798518 Mobile/15E148 Safari/604.",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_3_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/134.0.6998.99 Mobile/15E148 Safari/604.",
    "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) SamsungBrowser/27.0 Chrome/125.0.0.0 Mobile Safari/537.3",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_3_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.3 Mobile/15E148 Safari/604.",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_1_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1.1 Mobile/15E148 Safari/604.",
    "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Mobile Safari/537.3",
    "Mozilla/5.0 (Android 14; Mobile; rv:136.0) Gecko/136.0 Firefox/136.0",
];

lazy_static! {
    static ref LIST_ID_RE: Regex =
        Regex::new(r"/(?:hz/wishlist/ls|gp/registry/(?:wishlist|list))/([A-Za-z0-9]+)")
            .expect("static pattern");
    static ref BARE_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9]+$").expect("static pattern");
}

pub struct AmazonFetcher {
    client: Client,
    base_url: String,
    constraints: FetchConstraints,
    limiter: Arc<RateLimiter>,
    shutdown: Arc<Shutdown>,
}

struct ParsedPage {
    items: Vec<Item>,
    next_url: Option<String>,
}

enum PageFetch {
    Parsed(ParsedPage),
    Abort(FetchOutcome),
}

enum PageError {
    /// HTTP 429/503: the platform is asking us to slow down. Waited out
    /// separately from the ordinary retry budget.
    Throttled(u16),
    Failed(String),
}

impl AmazonFetcher {
    pub fn new(
        constraints: FetchConstraints,
        limiter: Arc<RateLimiter>,
        shutdown: Arc<Shutdown>,
    ) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(constraints.request_timeout)
            .build()
            .map_err(|e| format!("HTTP client init failed: {e}"))?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            constraints,
            limiter,
            shutdown,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Accepts a bare wishlist id, a desktop wishlist/registry URL, or any
    /// other URL verbatim, and points it at the mobile list view.
    fn normalize_identifier(&self, raw: &str) -> String {
        let s = raw.trim();
        if BARE_ID_RE.is_match(s) {
            return self.mobile_list_url(s);
        }
        if let Some(caps) = LIST_ID_RE.captures(s) {
            return self.mobile_list_url(&caps[1]);
        }
        s.to_string()
    }

    fn mobile_list_url(&self, list_id: &str) -> String {
        format!("{}/gp/aw/ls?lid={}&ty=wishlist", self.base_url, list_id)
    }

    /// One page request with classification. Retries and backoffs for this
    /// page happen here; a returned `Abort` ends the whole attempt.
    fn fetch_page(&self, url: &str, ua: &str, page: usize, wishlist: &str) -> PageFetch {
        let mut retry_attempts = 0u32;
        let mut captcha_attempts = 0u32;
        let mut throttle_attempts = 0u32;

        loop {
            if self.shutdown.is_triggered() {
                return PageFetch::Abort(FetchOutcome::TransientError(
                    "shutdown requested".to_string(),
                ));
            }

            let failure = match self.request_page(url, ua) {
                Ok(body) => {
                    if is_captcha_page(&body) {
                        captcha_attempts += 1;
                        if captcha_attempts >= self.constraints.retry_count {
                            log::error!(
                                "Max CAPTCHA retries reached on Amazon page {page} for {wishlist}; abandoning attempt"
                            );
                            return PageFetch::Abort(FetchOutcome::CaptchaDetected);
                        }
                        log::warn!(
                            "Amazon CAPTCHA on page {page} (attempt {captcha_attempts}/{}); backing off",
                            self.constraints.retry_count
                        );
                        if self.shutdown.sleep(jittered(self.constraints.captcha_sleep)) {
                            return PageFetch::Abort(FetchOutcome::TransientError(
                                "shutdown during captcha backoff".to_string(),
                            ));
                        }
                        continue;
                    }
                    return match self.parse_page(&body) {
                        Ok(parsed) => {
                            if parsed.items.is_empty() {
                                dump_debug_html(
                                    &self.constraints,
                                    wishlist,
                                    &format!("page{page}_no_items"),
                                    &body,
                                );
                            }
                            PageFetch::Parsed(parsed)
                        }
                        Err(why) => {
                            dump_debug_html(
                                &self.constraints,
                                wishlist,
                                &format!("page{page}_unparsed"),
                                &body,
                            );
                            PageFetch::Abort(FetchOutcome::FatalParseError(format!(
                                "page {page}: {why}"
                            )))
                        }
                    };
                }
                Err(PageError::Throttled(status)) => {
                    throttle_attempts += 1;
                    if throttle_attempts >= self.constraints.retry_count {
                        log::error!(
                            "Amazon keeps throttling (HTTP {status}) on page {page} for {wishlist}; abandoning attempt"
                        );
                        return PageFetch::Abort(FetchOutcome::RateLimited);
                    }
                    log::warn!(
                        "Amazon HTTP {status} on page {page}; waiting out the throttle ({throttle_attempts}/{})",
                        self.constraints.retry_count
                    );
                    if self.shutdown.sleep(jittered(self.constraints.retry_sleep)) {
                        return PageFetch::Abort(FetchOutcome::TransientError(
                            "shutdown during throttle wait".to_string(),
                        ));
                    }
                    continue;
                }
                Err(PageError::Failed(msg)) => msg,
            };

            retry_attempts += 1;
            if retry_attempts >= self.constraints.retry_count {
                log::error!(
                    "Amazon page {page} failed after {retry_attempts} attempts for {wishlist}: {failure}"
                );
                // One long sleep before giving the cycle up, so a struggling
                // site isn't immediately hammered by the next wishlist.
                self.shutdown.sleep(jittered(self.constraints.fail_sleep));
                return PageFetch::Abort(FetchOutcome::TransientError(format!(
                    "page {page}: {failure}"
                )));
            }
            log::warn!(
                "Amazon page {page} attempt {retry_attempts}/{} failed: {failure}",
                self.constraints.retry_count
            );
            if self.shutdown.sleep(jittered(self.constraints.retry_sleep)) {
                return PageFetch::Abort(FetchOutcome::TransientError(
                    "shutdown during retry backoff".to_string(),
                ));
            }
        }
    }

    fn request_page(&self, url: &str, ua: &str) -> Result<String, PageError> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, ua)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(REFERER, "https://www.amazon.com/")
            .send()
            .map_err(|e| PageError::Failed(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(PageError::Throttled(status.as_u16()));
        }
        if !status.is_success() {
            return Err(PageError::Failed(format!("HTTP {status}")));
        }
        resp.text()
            .map_err(|e| PageError::Failed(format!("read body failed: {e}")))
    }

    fn parse_page(&self, html: &str) -> Result<ParsedPage, String> {
        let document = Html::parse_document(html);
        let item_sel = Selector::parse("li[id^='itemWrapper_']").map_err(|e| e.to_string())?;
        let link_sel = Selector::parse("a[href^='/dp']").map_err(|e| e.to_string())?;
        let title_sel = Selector::parse(".awl-item-title").map_err(|e| e.to_string())?;
        let price_sel = Selector::parse("span.a-price-whole").map_err(|e| e.to_string())?;
        let token_sel =
            Selector::parse("form.scroll-state input.showMoreUrl").map_err(|e| e.to_string())?;

        let mut items = Vec::new();
        for li in document.select(&item_sel) {
            let link = match li.select(&link_sel).next() {
                Some(l) => l,
                None => continue,
            };
            let href_raw = match link.value().attr("href") {
                Some(h) => h,
                None => continue,
            };
            let href = href_raw.split('?').next().unwrap_or(href_raw);
            let product_url = if href.starts_with("http") {
                href.to_string()
            } else {
                format!("{}{}", self.base_url, href)
            };

            let name = li
                .select(&title_sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(no name)".to_string());

            let price_cents = li
                .select(&price_sel)
                .next()
                .map(|el| el.text().collect::<String>())
                .and_then(|raw| parse_price_cents(&raw));

            let available = price_cents.is_some();
            items.push(Item {
                item_id: product_url.clone(),
                name,
                price_cents,
                currency: "USD".to_string(),
                product_url,
                image_url: String::new(),
                available,
            });
        }

        let next_url = document
            .select(&token_sel)
            .next()
            .and_then(|el| el.value().attr("value"))
            .filter(|v| !v.is_empty())
            .map(|v| format!("{}{}", self.base_url, v));

        if items.is_empty() && next_url.is_none() && !looks_like_wishlist_page(html) {
            return Err("no item markup and no recognizable wishlist shell".to_string());
        }
        Ok(ParsedPage { items, next_url })
    }
}

impl Fetcher for AmazonFetcher {
    fn fetch(&self, identifier: &str) -> FetchOutcome {
        if !self.limiter.admit(&self.shutdown) {
            return FetchOutcome::TransientError("shutdown during rate limit wait".to_string());
        }

        let ua = MOBILE_USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(MOBILE_USER_AGENTS[0]);

        let mut items: Vec<Item> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut next_url = Some(self.normalize_identifier(identifier));
        let mut page = 1usize;

        log::info!("Checking Amazon wishlist {identifier}");

        while let Some(url) = next_url.take() {
            let parsed = match self.fetch_page(&url, ua, page, identifier) {
                PageFetch::Parsed(p) => p,
                PageFetch::Abort(outcome) => return outcome,
            };

            let mut new_on_page = 0usize;
            for item in parsed.items {
                if seen.insert(item.item_id.clone()) {
                    items.push(item);
                    new_on_page += 1;
                }
            }
            log::info!(
                "Amazon page {page}: {new_on_page} new items (total {})",
                items.len()
            );

            match parsed.next_url {
                Some(_) if page >= self.constraints.max_pages => {
                    // The site is effectively unbounded; the cap is a scope
                    // limit, not a failure.
                    log::warn!(
                        "Amazon page cap ({}) reached for {identifier}; keeping {} items",
                        self.constraints.max_pages,
                        items.len()
                    );
                }
                Some(next) => {
                    page += 1;
                    if self.shutdown.sleep(jittered(self.constraints.page_sleep)) {
                        return FetchOutcome::TransientError(
                            "shutdown during page delay".to_string(),
                        );
                    }
                    next_url = Some(next);
                }
                None => {
                    log::info!("Amazon pagination complete for {identifier}");
                }
            }
        }

        FetchOutcome::Success(items)
    }
}

fn is_captcha_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("captcha") || lower.contains("enter the characters you see")
}

/// A page with no items is only trustworthy if it still looks like the
/// wishlist view; anything else is treated as unparseable.
fn looks_like_wishlist_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("wishlist") || lower.contains("wish list") || lower.contains("g-items")
}

/// "1,234." as rendered by the whole-price node -> 123400 cents.
fn parse_price_cents(raw: &str) -> Option<i64> {
    let cleaned = raw.replace("US$", "").replace('$', "").replace(',', "");
    let cleaned = cleaned.trim().trim_end_matches('.');
    if cleaned.is_empty() {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * 100.0).round() as i64)
}
