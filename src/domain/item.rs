// src/domain/item.rs

use std::fmt;

/// Platforms a wishlist can live on. Config selects the fetcher by this,
/// and it is part of every persisted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Amazon,
    Throne,
}

impl Platform {
    pub fn parse(s: &str) -> Option<Platform> {
        match s.trim().to_lowercase().as_str() {
            "amazon" => Some(Platform::Amazon),
            "throne" => Some(Platform::Throne),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Amazon => "amazon",
            Platform::Throne => "throne",
        }
    }

    /// Capitalized form for email subjects and reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Amazon => "Amazon",
            Platform::Throne => "Throne",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized representation of one wishlist entry, whichever platform it
/// came from. Prices are cents; `None` means the platform shows no price
/// (out of stock, gift-only, hidden) which is distinct from a price of 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Stable key within (platform, wishlist). Amazon: canonical product URL.
    /// Throne: platform id when present, else a digest of the product URL.
    pub item_id: String,
    pub name: String,
    pub price_cents: Option<i64>,
    pub currency: String,
    pub product_url: String,
    pub image_url: String,
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_is_case_insensitive() {
        assert_eq!(Platform::parse("amazon"), Some(Platform::Amazon));
        assert_eq!(Platform::parse("  Amazon "), Some(Platform::Amazon));
        assert_eq!(Platform::parse("THRONE"), Some(Platform::Throne));
        assert_eq!(Platform::parse("ebay"), None);
        assert_eq!(Platform::parse(""), None);
    }

    #[test]
    fn platform_round_trips_through_as_str() {
        for p in [Platform::Amazon, Platform::Throne] {
            assert_eq!(Platform::parse(p.as_str()), Some(p));
        }
    }
}
