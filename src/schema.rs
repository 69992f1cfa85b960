//! Listing records and the column contract shared by the collector and the trainer.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Column order written by the collector.
pub const LISTING_COLUMNS: &[&str] = &[
    "suburb",
    "address",
    "price",
    "bedrooms",
    "bathrooms",
    "car_spaces",
    "land_size",
    "building_size",
    "property_type",
    "sale_date",
    "postcode",
    "agency",
    "year_built",
    "listing_id",
    "url",
];

/// Columns every training CSV must carry.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "suburb",
    "address",
    "price",
    "bedrooms",
    "bathrooms",
    "land_size",
    "property_type",
    "sale_date",
];

/// Header aliases accepted from older exports, mapped onto canonical names.
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("sold_price", "price"),
    ("land_size_sqm", "land_size"),
    ("building_size_sqm", "building_size"),
    ("address_display", "address"),
    ("id", "listing_id"),
    ("lat", "latitude"),
    ("lng", "longitude"),
    ("lon", "longitude"),
    ("nearby_schools", "nearby_schools_count"),
    ("distance_to_cbd", "distance_to_cbd_km"),
    ("lot_frontage", "lot_frontage_m"),
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %b %Y", "%d %B %Y", "%d/%m/%Y"];

/// One scraped property, serialized as a CSV row in [`LISTING_COLUMNS`] order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingRow {
    /// Suburb name as displayed on the listing.
    pub suburb: String,
    /// Street address; identifies the property but is never a model feature.
    pub address: String,
    /// Sold price in dollars.
    pub price: Option<f64>,
    /// Bedroom count.
    pub bedrooms: Option<u32>,
    /// Bathroom count.
    pub bathrooms: Option<u32>,
    /// Car spaces.
    pub car_spaces: Option<u32>,
    /// Land size in square metres.
    pub land_size: Option<f64>,
    /// Building size in square metres.
    pub building_size: Option<f64>,
    /// Property type label, e.g. `House` or `Unit`.
    pub property_type: String,
    /// Sale date exactly as extracted.
    pub sale_date: String,
    /// Postcode.
    pub postcode: String,
    /// Selling agency.
    pub agency: String,
    /// Year the dwelling was built.
    pub year_built: Option<u32>,
    /// Site listing identifier when one is known.
    pub listing_id: String,
    /// Detail page URL.
    pub url: String,
}

impl ListingRow {
    /// Natural key used to drop duplicate listings.
    pub fn key(&self) -> ListingKey {
        let id = self.listing_id.trim();
        if !id.is_empty() {
            return ListingKey::Id(id.to_string());
        }
        ListingKey::AddressDate {
            address: normalize_address(&self.address),
            sale_date: self.sale_date.trim().to_ascii_lowercase(),
        }
    }
}

/// Deduplication key for a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListingKey {
    /// Site-assigned listing id.
    Id(String),
    /// Fallback when no id is available.
    AddressDate {
        /// Lower-cased address with collapsed whitespace.
        address: String,
        /// Lower-cased raw sale date.
        sale_date: String,
    },
}

fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Trims, lower-cases and resolves aliases for a CSV header cell.
pub fn canonical_column(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

/// Extracts the first number in `text`, ignoring thousands separators.
pub fn extract_number(text: &str) -> Option<f64> {
    find_number(text).map(|(value, _)| value)
}

/// First number in `text` plus the byte offset just past its last digit.
/// Commas and a decimal point only count when a digit follows them.
fn find_number(text: &str) -> Option<(f64, usize)> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(u8::is_ascii_digit)?;
    let mut digits = String::new();
    let mut end = start;
    let mut seen_dot = false;
    for idx in start..bytes.len() {
        let next_is_digit = bytes.get(idx + 1).is_some_and(u8::is_ascii_digit);
        match bytes[idx] {
            b @ b'0'..=b'9' => {
                digits.push(char::from(b));
                end = idx + 1;
            }
            b',' if next_is_digit => {}
            b'.' if next_is_digit && !seen_dot => {
                seen_dot = true;
                digits.push('.');
            }
            _ => break,
        }
    }
    digits.parse().ok().map(|value| (value, end))
}

/// Parses display prices such as `$1,250,000`, `$865k` or `$1.2m`. The
/// `k`/`m` suffix must directly follow the matched number.
pub fn parse_price(text: &str) -> Option<f64> {
    let (value, end) = find_number(text)?;
    let suffix: String = text[end..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_lowercase();
    let multiplier = match suffix.as_str() {
        "k" => 1_000.0,
        "m" | "mil" | "million" => 1_000_000.0,
        _ => 1.0,
    };
    let price = value * multiplier;
    (price > 0.0).then_some(price)
}

/// Like [`parse_price`], but only for text carrying a `$` amount. Auction
/// banners and "Contact agent" labels yield `None`.
pub fn parse_dollar_price(text: &str) -> Option<f64> {
    let dollar = text.find('$')?;
    parse_price(&text[dollar..])
}

/// Parses the sale-date spellings seen in exports and on listing pages.
pub fn parse_sale_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Timestamps such as 2024-08-15T00:00:00 keep only the date part.
    let candidate = trimmed.split('T').next().unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
}

/// Splits a sale date into `(year, month)` features.
pub fn sale_year_month(text: &str) -> (Option<f64>, Option<f64>) {
    match parse_sale_date(text) {
        Some(date) => (Some(date.year() as f64), Some(date.month() as f64)),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_and_case() {
        assert_eq!(canonical_column(" Sold_Price "), "price");
        assert_eq!(canonical_column("LAND_SIZE_SQM"), "land_size");
        assert_eq!(canonical_column("Bedrooms"), "bedrooms");
    }

    #[test]
    fn parses_display_prices() {
        assert_eq!(parse_price("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_price("Sold $865k"), Some(865_000.0));
        assert_eq!(parse_price("$1.2m"), Some(1_200_000.0));
        assert_eq!(parse_price("Contact agent"), None);
    }

    #[test]
    fn price_suffix_belongs_to_the_matched_number() {
        assert_eq!(parse_price("$865k (3 bids)"), Some(865_000.0));
        assert_eq!(parse_price("$1.2m, sold 2024"), Some(1_200_000.0));
        assert_eq!(parse_price("$1,250,000 more info"), Some(1_250_000.0));
        assert_eq!(parse_price("$2.1 million"), Some(2_100_000.0));
    }

    #[test]
    fn dollar_price_requires_an_amount() {
        assert_eq!(parse_dollar_price("Auction Sat 12 Oct"), None);
        assert_eq!(parse_dollar_price("Contact agent"), None);
        assert_eq!(parse_dollar_price("Sold for $960k on 12 Oct"), Some(960_000.0));
    }

    #[test]
    fn extracts_first_number() {
        assert_eq!(extract_number("Land size: 450 m²"), Some(450.0));
        assert_eq!(extract_number("1,024.5sqm"), Some(1024.5));
        assert_eq!(extract_number("none"), None);
        assert_eq!(extract_number("Sold 2024."), Some(2024.0));
    }

    #[test]
    fn parses_known_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 8, 15);
        assert_eq!(parse_sale_date("2024-08-15"), expected);
        assert_eq!(parse_sale_date("15 Aug 2024"), expected);
        assert_eq!(parse_sale_date("15 August 2024"), expected);
        assert_eq!(parse_sale_date("15/08/2024"), expected);
        assert_eq!(parse_sale_date("2024-08-15T10:00:00"), expected);
        assert_eq!(parse_sale_date("last week"), None);
        assert_eq!(sale_year_month("15 Aug 2024"), (Some(2024.0), Some(8.0)));
    }

    #[test]
    fn key_prefers_listing_id() {
        let mut row = ListingRow {
            address: "12  Smith St, Essendon".into(),
            sale_date: "15 Aug 2024".into(),
            ..ListingRow::default()
        };
        assert_eq!(
            row.key(),
            ListingKey::AddressDate {
                address: "12 smith st, essendon".into(),
                sale_date: "15 aug 2024".into(),
            }
        );
        row.listing_id = "143160680".into();
        assert_eq!(row.key(), ListingKey::Id("143160680".into()));
    }
}
