// src/fetchers/throne.rs

use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::Item;
use crate::fetchers::{dump_debug_html, FetchConstraints, FetchOutcome, Fetcher, RateLimiter};
use crate::shutdown::Shutdown;

const DEFAULT_BASE_URL: &str = "https://throne.com";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

lazy_static! {
    static ref PRICE_RE: Regex =
        Regex::new(r"([$€£])\s?([0-9]+(?:[.,][0-9]{2})?)").expect("static pattern");
}

// Link text that is site chrome, not an item.
const NAV_KEYWORDS: &[&str] = &[
    "login",
    "sign up",
    "about",
    "contact",
    "faq",
    "feature requests",
    "how it works",
    "follow",
    "wishlist",
    "gifters",
];

/// Single-page fetcher with a layered parsing ladder: the embedded
/// `__NEXT_DATA__` blob is the highest-fidelity source, JSON-LD the
/// structured fallback, and a layout scrape the last resort. There is no
/// retry loop here; one network failure is a `TransientError` and the
/// scheduler's next cycle is the retry.
pub struct ThroneFetcher {
    client: Client,
    base_url: String,
    constraints: FetchConstraints,
    limiter: Arc<RateLimiter>,
    shutdown: Arc<Shutdown>,
}

impl ThroneFetcher {
    pub fn new(
        constraints: FetchConstraints,
        limiter: Arc<RateLimiter>,
        shutdown: Arc<Shutdown>,
    ) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
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

    /// A bare username becomes a profile URL; full URLs pass through.
    fn normalize_identifier(&self, raw: &str) -> String {
        let s = raw.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            s.to_string()
        } else {
            format!("{}/{}", self.base_url, s)
        }
    }
}

impl Fetcher for ThroneFetcher {
    fn fetch(&self, identifier: &str) -> FetchOutcome {
        if !self.limiter.admit(&self.shutdown) {
            return FetchOutcome::TransientError("shutdown during rate limit wait".to_string());
        }

        let url = self.normalize_identifier(identifier);
        log::info!("Checking Throne wishlist at {url}");

        let resp = match self.client.get(&url).send() {
            Ok(r) => r,
            Err(e) => return FetchOutcome::TransientError(format!("request failed: {e}")),
        };
        if !resp.status().is_success() {
            return FetchOutcome::TransientError(format!("HTTP {}", resp.status()));
        }
        let html = match resp.text() {
            Ok(t) => t,
            Err(e) => return FetchOutcome::TransientError(format!("read body failed: {e}")),
        };

        if let Some(items) = extract_next_data_items(&html) {
            log::info!("Throne: {} items via NEXT_DATA for {url}", items.len());
            return FetchOutcome::Success(items);
        }

        log::debug!("Throne NEXT_DATA extraction failed or empty; trying JSON-LD");
        let mut understood_empty = false;
        match extract_jsonld_items(&html) {
            Some(items) if !items.is_empty() => {
                log::info!("Throne: {} items via JSON-LD for {url}", items.len());
                return FetchOutcome::Success(items);
            }
            Some(_) => {
                // An ItemList that parses but holds nothing is an
                // empty-but-understood wishlist, not a parse failure.
                understood_empty = true;
            }
            None => {}
        }

        log::debug!("Throne JSON-LD extraction failed or empty; trying layout scrape");
        if let Some(items) = extract_grid_items(&html, &self.base_url) {
            log::info!("Throne: {} items via layout scrape for {url}", items.len());
            return FetchOutcome::Success(items);
        }

        if understood_empty {
            log::info!("Throne: wishlist at {url} is empty");
            return FetchOutcome::Success(Vec::new());
        }

        dump_debug_html(&self.constraints, identifier, "unparsed", &html);
        FetchOutcome::FatalParseError(format!("no recognizable item data at {url}"))
    }
}

fn sha256_hex(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Stage 1: the `__NEXT_DATA__` blob. Deep-searches the JSON for the first
/// array whose elements look like items. Yields `None` when the blob is
/// missing, unparseable, or holds no such array.
fn extract_next_data_items(html: &str) -> Option<Vec<Item>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[id="__NEXT_DATA__"]"#).ok()?;
    let script = document.select(&selector).next()?;
    let json_text: String = script.text().collect();
    let data: Value = serde_json::from_str(&json_text).ok()?;

    let list = find_item_array(&data)?;
    let items: Vec<Item> = list.iter().filter_map(value_to_item).collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn find_item_array(node: &Value) -> Option<&Vec<Value>> {
    match node {
        Value::Array(arr) => {
            if is_item_array(arr) {
                return Some(arr);
            }
            arr.iter().find_map(find_item_array)
        }
        Value::Object(map) => map.values().find_map(find_item_array),
        _ => None,
    }
}

fn is_item_array(arr: &[Value]) -> bool {
    arr.iter().any(|v| {
        v.as_object().is_some_and(|obj| {
            (obj.contains_key("name") || obj.contains_key("title"))
                && (obj.contains_key("price")
                    || obj.contains_key("price_cents")
                    || obj.contains_key("priceCents"))
        })
    })
}

fn value_to_item(v: &Value) -> Option<Item> {
    let obj = v.as_object()?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| obj.get("title").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(no name)")
        .to_string();

    let mut price_cents = None;
    for key in ["price", "price_cents", "priceCents"] {
        if let Some(value) = obj.get(key) {
            price_cents = coerce_price_cents(value, key);
            break;
        }
    }

    let currency = obj
        .get("currency")
        .and_then(Value::as_str)
        .or_else(|| obj.get("currencyCode").and_then(Value::as_str))
        .unwrap_or("USD")
        .to_string();

    let product_url = obj
        .get("url")
        .and_then(Value::as_str)
        .or_else(|| obj.get("productUrl").and_then(Value::as_str))
        .or_else(|| obj.get("url_path").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();

    let image_url = obj
        .get("image")
        .and_then(Value::as_str)
        .or_else(|| obj.get("imageUrl").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();

    let item_id = obj
        .get("id")
        .or_else(|| obj.get("uuid"))
        .and_then(json_id_string)
        .unwrap_or_else(|| {
            if product_url.is_empty() {
                sha256_hex(&format!("{name}{product_url}"))
            } else {
                sha256_hex(&product_url)
            }
        });

    let available = obj
        .get("available")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    Some(Item {
        item_id,
        name,
        price_cents,
        currency,
        product_url,
        image_url,
        available,
    })
}

fn json_id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Platforms disagree on whether a "price" is cents or fractional units;
/// field names and magnitudes disambiguate.
fn coerce_price_cents(value: &Value, field: &str) -> Option<i64> {
    if field.to_lowercase().contains("cent") {
        return value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()));
    }
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(if i > 1000 { i } else { i * 100 })
            } else {
                let f = n.as_f64()?;
                Some(if f < 1000.0 {
                    (f * 100.0).round() as i64
                } else {
                    f as i64
                })
            }
        }
        Value::String(s) => {
            let cleaned = s
                .trim()
                .replace(['$', '€', '£', ','], "");
            if cleaned.is_empty() {
                return None;
            }
            if cleaned.chars().all(|c| c.is_ascii_digit()) {
                let v: i64 = cleaned.parse().ok()?;
                Some(if v > 1000 { v } else { v * 100 })
            } else {
                let f: f64 = cleaned.parse().ok()?;
                Some((f * 100.0).round() as i64)
            }
        }
        _ => None,
    }
}

/// Stage 2: JSON-LD `ItemList` blocks. `Some(vec![])` means an ItemList was
/// present but empty: an understood empty wishlist, which the caller must
/// not confuse with a parse failure.
fn extract_jsonld_items(html: &str) -> Option<Vec<Item>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    let mut out: Vec<Item> = Vec::new();
    let mut saw_item_list = false;

    for script in document.select(&selector) {
        let text: String = script.text().collect();
        let data: Value = match serde_json::from_str(&text) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let blocks: Vec<&Value> = match &data {
            Value::Array(arr) => arr.iter().collect(),
            other => vec![other],
        };
        for block in blocks {
            if block.get("@type").and_then(Value::as_str) != Some("ItemList") {
                continue;
            }
            let Some(elements) = block.get("itemListElement").and_then(Value::as_array) else {
                continue;
            };
            saw_item_list = true;
            for el in elements {
                let entry = el.get("item").unwrap_or(el);
                let Some(obj) = entry.as_object() else { continue };

                let name = obj
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("(no name)")
                    .to_string();
                let product_url = obj
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();

                let mut price_cents = None;
                let mut currency = "USD".to_string();
                let offer = match obj.get("offers") {
                    Some(Value::Object(o)) => Some(o),
                    Some(Value::Array(a)) => a.first().and_then(Value::as_object),
                    _ => None,
                };
                if let Some(offer) = offer {
                    if let Some(c) = offer.get("priceCurrency").and_then(Value::as_str) {
                        currency = c.to_string();
                    }
                    price_cents = offer.get("price").and_then(jsonld_price_cents);
                }

                let item_id = obj
                    .get("@id")
                    .and_then(json_id_string)
                    .unwrap_or_else(|| {
                        if product_url.is_empty() {
                            sha256_hex(&format!("{name}{product_url}"))
                        } else {
                            sha256_hex(&product_url)
                        }
                    });

                let image_url = obj
                    .get("image")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();

                out.push(Item {
                    item_id,
                    name,
                    price_cents,
                    currency,
                    product_url,
                    image_url,
                    available: true,
                });
            }
        }
    }

    if !saw_item_list {
        return None;
    }
    Some(dedup_by_id(out))
}

fn jsonld_price_cents(v: &Value) -> Option<i64> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some((f * 100.0).round() as i64)
}

/// Stage 3: layout scrape. Any link with a currency-symbol price in a
/// nearby ancestor is taken to be an item card.
fn extract_grid_items(html: &str, base_url: &str) -> Option<Vec<Item>> {
    let document = Html::parse_document(html);
    let anchor_sel = Selector::parse("a[href]").ok()?;

    let mut items: Vec<Item> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for a in document.select(&anchor_sel) {
        let text = element_text(a);
        if text.len() < 3 {
            continue;
        }
        let lower = text.to_lowercase();
        if NAV_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }

        // Walk up a few ancestors looking for a price near the link.
        let mut found: Option<(String, String)> = None;
        let mut container = Some(a);
        for _ in 0..4 {
            let Some(el) = container else { break };
            let block = element_text(el);
            if let Some(caps) = PRICE_RE.captures(&block) {
                found = Some((caps[1].to_string(), caps[2].to_string()));
                break;
            }
            container = el.parent().and_then(ElementRef::wrap);
        }
        let Some((symbol, number)) = found else { continue };

        let currency = match symbol.as_str() {
            "€" => "EUR",
            "£" => "GBP",
            _ => "USD",
        }
        .to_string();
        let price_cents = number
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .map(|f| (f * 100.0).round() as i64);

        let href = match a.value().attr("href") {
            Some(h) => h,
            None => continue,
        };
        let product_url = if href.starts_with('/') {
            format!("{base_url}{href}")
        } else {
            href.to_string()
        };

        let item_id = sha256_hex(&product_url);
        if !seen.insert(item_id.clone()) {
            continue;
        }
        items.push(Item {
            item_id,
            name: text,
            price_cents,
            currency,
            product_url,
            image_url: String::new(),
            available: true,
        });
    }

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn element_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedup_by_id(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|it| seen.insert(it.item_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_constraints() -> FetchConstraints {
        FetchConstraints {
            max_pages: 10,
            retry_count: 3,
            page_sleep: Duration::ZERO,
            retry_sleep: Duration::ZERO,
            fail_sleep: Duration::ZERO,
            captcha_sleep: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            debug_dump_html: false,
            debug_html_dir: String::new(),
        }
    }

    fn fetcher(base_url: &str) -> ThroneFetcher {
        ThroneFetcher::new(
            test_constraints(),
            Arc::new(RateLimiter::new(Duration::ZERO)),
            Shutdown::new(),
        )
        .unwrap()
        .with_base_url(base_url)
    }

    fn next_data_page(items_json: &str) -> String {
        format!(
            "<html><body><script id=\"__NEXT_DATA__\" type=\"application/json\">\
             {{\"props\":{{\"pageProps\":{{\"wishlist\":{{\"items\":{items_json}}}}}}}}}\
             </script></body></html>"
        )
    }

    fn jsonld_page(list_json: &str) -> String {
        format!(
            "<html><body><script type=\"application/ld+json\">\
             {{\"@type\":\"ItemList\",\"itemListElement\":{list_json}}}\
             </script></body></html>"
        )
    }

    #[test]
    fn normalize_turns_usernames_into_profile_urls() {
        let f = fetcher("https://throne.com");
        assert_eq!(
            f.normalize_identifier("somecreator"),
            "https://throne.com/somecreator"
        );
        assert_eq!(
            f.normalize_identifier("https://throne.com/u/somecreator/wishlist"),
            "https://throne.com/u/somecreator/wishlist"
        );
    }

    #[test]
    fn next_data_items_are_extracted_with_price_coercion() {
        let html = next_data_page(
            r#"[
                {"id":"i1","name":"Plushie","priceCents":2599,"currency":"USD","url":"https://t.example/p/1"},
                {"uuid":"i2","title":"Poster","price":12.5,"currencyCode":"EUR","productUrl":"https://t.example/p/2"},
                {"name":"Mystery","price":null}
            ]"#,
        );
        let items = extract_next_data_items(&html).unwrap();
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].item_id, "i1");
        assert_eq!(items[0].price_cents, Some(2599));

        assert_eq!(items[1].item_id, "i2");
        assert_eq!(items[1].price_cents, Some(1250));
        assert_eq!(items[1].currency, "EUR");

        // Null price -> unavailable, and the id falls back to a digest.
        assert_eq!(items[2].price_cents, None);
        assert_eq!(items[2].item_id.len(), 64);
    }

    #[test]
    fn next_data_without_item_arrays_yields_nothing() {
        let html = next_data_page(r#"[{"somethingElse":true}]"#);
        assert!(extract_next_data_items(&html).is_none());
        assert!(extract_next_data_items("<html><body>plain</body></html>").is_none());
    }

    #[test]
    fn price_coercion_handles_the_wild_forms() {
        let cents = |v: Value, f: &str| coerce_price_cents(&v, f);
        assert_eq!(cents(serde_json::json!(2599), "priceCents"), Some(2599));
        assert_eq!(cents(serde_json::json!(25), "price"), Some(2500));
        assert_eq!(cents(serde_json::json!(2599), "price"), Some(2599));
        assert_eq!(cents(serde_json::json!(12.5), "price"), Some(1250));
        assert_eq!(cents(serde_json::json!("$19.99"), "price"), Some(1999));
        assert_eq!(cents(serde_json::json!("42"), "price"), Some(4200));
        assert_eq!(cents(serde_json::json!(null), "price"), None);
        assert_eq!(cents(serde_json::json!("gift"), "price"), None);
    }

    #[test]
    fn jsonld_item_list_is_parsed() {
        let html = jsonld_page(
            r#"[
                {"item":{"@id":"p1","name":"Plushie","url":"https://t.example/p/1",
                         "offers":{"price":"25.99","priceCurrency":"USD"}}},
                {"item":{"name":"Poster","url":"https://t.example/p/2",
                         "offers":[{"price":9,"priceCurrency":"GBP"}]}}
            ]"#,
        );
        let items = extract_jsonld_items(&html).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, "p1");
        assert_eq!(items[0].price_cents, Some(2599));
        assert_eq!(items[1].price_cents, Some(900));
        assert_eq!(items[1].currency, "GBP");
    }

    #[test]
    fn empty_jsonld_item_list_is_understood_as_empty() {
        let html = jsonld_page("[]");
        let items = extract_jsonld_items(&html).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn missing_jsonld_is_a_stage_failure_not_empty() {
        assert!(extract_jsonld_items("<html><body>nope</body></html>").is_none());
    }

    #[test]
    fn grid_scrape_finds_priced_cards() {
        // The unpriced card sits in its own subtree so no ancestor within
        // reach of the walk carries a sibling's price.
        let html = r#"<html><body>
            <nav><a href="/login">Login</a><a href="/faq">FAQ</a></nav>
            <div class="page"><div class="grid">
                <div class="card"><a href="/item/abc">Fancy Headset</a><span>$129.99</span></div>
                <div class="card"><a href="/item/def">Tea Sampler</a><span>€15,00</span></div>
            </div></div>
            <div class="page"><div class="grid">
                <div class="card"><a href="/item/unpriced">No price here</a></div>
            </div></div>
        </body></html>"#;
        let items = extract_grid_items(html, "https://throne.com").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Fancy Headset");
        assert_eq!(items[0].price_cents, Some(12999));
        assert_eq!(items[0].product_url, "https://throne.com/item/abc");
        assert_eq!(items[1].price_cents, Some(1500));
        assert_eq!(items[1].currency, "EUR");
    }

    #[test]
    fn next_data_wins_over_jsonld() {
        let html = r#"<html><body>
            <script id="__NEXT_DATA__" type="application/json">
            {"items":[{"id":"nd","name":"FromNextData","price":10}]}
            </script>
            <script type="application/ld+json">
            {"@type":"ItemList","itemListElement":[{"item":{"@id":"ld","name":"FromJsonLd","url":"u"}}]}
            </script></body></html>"#;
        let items = extract_next_data_items(html).unwrap();
        assert_eq!(items[0].name, "FromNextData");
        // JSON-LD is still parseable on its own; the ladder just never
        // reaches it when NEXT_DATA yields items.
        assert!(extract_jsonld_items(&html).is_some());
    }

    #[tokio::test]
    async fn network_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let uri = server.uri();
        let outcome = tokio::task::spawn_blocking(move || fetcher(&uri).fetch("creator"))
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::TransientError(_)));
    }

    #[tokio::test]
    async fn unrecognizable_page_is_a_fatal_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><h1>Maintenance</h1></body></html>"),
            )
            .mount(&server)
            .await;

        let uri = server.uri();
        let outcome = tokio::task::spawn_blocking(move || fetcher(&uri).fetch("creator"))
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::FatalParseError(_)));
    }

    #[tokio::test]
    async fn next_data_page_fetches_successfully() {
        let server = MockServer::start().await;
        let body = next_data_page(
            r#"[{"id":"i1","name":"Plushie","priceCents":2599,"url":"https://t.example/p/1"}]"#,
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let uri = server.uri();
        let outcome = tokio::task::spawn_blocking(move || fetcher(&uri).fetch("creator"))
            .await
            .unwrap();
        match outcome {
            FetchOutcome::Success(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].item_id, "i1");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicitly_empty_wishlist_is_an_empty_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(jsonld_page("[]")))
            .mount(&server)
            .await;

        let uri = server.uri();
        let outcome = tokio::task::spawn_blocking(move || fetcher(&uri).fetch("creator"))
            .await
            .unwrap();
        match outcome {
            FetchOutcome::Success(items) => assert!(items.is_empty()),
            other => panic!("expected empty success, got {other:?}"),
        }
    }
}
