//! Listing extraction from sold-search and detail pages, built on `scraper`.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::schema::{extract_number, parse_dollar_price};

const CARD: &str = "[data-testid='listing-card']";
const CARD_ADDRESS: &str = "[data-testid='listing-card-address']";
const CARD_LINK: &str = "a[data-testid='listing-card-link']";
const CARD_FEATURES: &str = "[data-testid='property-features']";
const CARD_PRICE: &str = "[data-testid='listing-card-price']";
const DETAIL_PRICE: &str = "[data-testid='listing-summary-property-price']";
const DETAIL_AGENCY: &str = "[data-testid='listing-details__agent-brand-name']";

/// Fields visible on a search-results card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingCard {
    /// Display address, e.g. `12 Smith St, Essendon, Vic 3040`.
    pub address: String,
    /// Suburb parsed from the address, empty when it cannot be inferred.
    pub suburb: String,
    /// Bedroom count from the feature strip.
    pub bedrooms: Option<u32>,
    /// Bathroom count from the feature strip.
    pub bathrooms: Option<u32>,
    /// Car spaces from the feature strip.
    pub car_spaces: Option<u32>,
    /// Price shown on the card, if any.
    pub price: Option<f64>,
    /// Absolute detail page URL.
    pub detail_url: Option<Url>,
    /// Listing id taken from the detail URL.
    pub listing_id: Option<String>,
}

/// Cards parsed from one search page.
#[derive(Debug, Default)]
pub struct SearchPage {
    /// Cards with at least an address.
    pub cards: Vec<ListingCard>,
    /// Card elements skipped because no address could be read.
    pub rejected: usize,
}

/// Fields read from a listing detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetail {
    /// Sold price.
    pub price: Option<f64>,
    /// Raw sale date text following `Sold on`.
    pub sale_date: Option<String>,
    /// Property type label.
    pub property_type: Option<String>,
    /// Land size in square metres.
    pub land_size: Option<f64>,
    /// Building size in square metres.
    pub building_size: Option<f64>,
    /// Selling agency.
    pub agency: Option<String>,
}

/// Parses every listing card on a sold-search page. Relative links resolve against `base`.
pub fn parse_search_page(html: &str, base: &Url) -> SearchPage {
    let document = Html::parse_document(html);
    let card_sel = selector(CARD);
    let address_sel = selector(CARD_ADDRESS);
    let link_sel = selector(CARD_LINK);
    let features_sel = selector(CARD_FEATURES);
    let price_sel = selector(CARD_PRICE);

    let mut page = SearchPage::default();
    for card in document.select(&card_sel) {
        let address = first_text(card, &address_sel).unwrap_or_default();
        if address.is_empty() {
            page.rejected += 1;
            continue;
        }
        let detail_url = card
            .select(&link_sel)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| base.join(href).ok());
        let listing_id = detail_url.as_ref().and_then(listing_id_from_url);
        let (bedrooms, bathrooms, car_spaces) = first_text(card, &features_sel)
            .map(|text| parse_features(&text))
            .unwrap_or_default();
        let price = first_text(card, &price_sel).and_then(|text| parse_dollar_price(&text));

        page.cards.push(ListingCard {
            suburb: suburb_from_address(&address).unwrap_or_default(),
            address,
            bedrooms,
            bathrooms,
            car_spaces,
            price,
            detail_url,
            listing_id,
        });
    }
    page
}

/// Parses sold price, sale date and the property attribute block from a detail page.
pub fn parse_detail_page(html: &str) -> ListingDetail {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let lines: Vec<String> = root
        .text()
        .map(|chunk| chunk.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|chunk| !chunk.is_empty())
        .collect();

    let price = first_text(root, &selector(DETAIL_PRICE)).and_then(|text| parse_dollar_price(&text));
    let sale_date = lines.iter().find_map(|line| {
        let idx = line.find("Sold on")?;
        let rest = line[idx + "Sold on".len()..].trim();
        (!rest.is_empty()).then(|| rest.to_string())
    });
    let agency = first_text(root, &selector(DETAIL_AGENCY));

    ListingDetail {
        price,
        sale_date,
        property_type: labelled_value(&lines, "property type"),
        land_size: labelled_value(&lines, "land size").and_then(|v| extract_number(&v)),
        building_size: labelled_value(&lines, "building size")
            .and_then(|v| extract_number(&v)),
        agency,
    }
}

/// Reads `3 bed 2 bath 1 car` style feature strips.
pub fn parse_features(text: &str) -> (Option<u32>, Option<u32>, Option<u32>) {
    let tokens: Vec<String> = text
        .split(|c: char| c.is_whitespace() || c == '·' || c == '|' || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    let mut beds = None;
    let mut baths = None;
    let mut cars = None;
    for (idx, token) in tokens.iter().enumerate() {
        let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
        let Ok(value) = digits.parse::<u32>() else {
            continue;
        };
        let inline_label = &token[digits.len()..];
        let label = if inline_label.is_empty() {
            tokens.get(idx + 1).map(String::as_str).unwrap_or("")
        } else {
            inline_label
        };
        if label.starts_with("bed") {
            beds = beds.or(Some(value));
        } else if label.starts_with("bath") {
            baths = baths.or(Some(value));
        } else if label.starts_with("car") || label.starts_with("park") {
            cars = cars.or(Some(value));
        }
    }
    (beds, baths, cars)
}

/// Suburb from `12 Smith St, Tarneit, Vic 3029`: the second-to-last comma part.
pub fn suburb_from_address(address: &str) -> Option<String> {
    let parts: Vec<&str> = address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 3 {
        return Some(parts[parts.len() - 2].to_string());
    }
    None
}

/// Trailing numeric id of listing URLs such as `/sold/property-house-vic-essendon-143160680`.
pub fn listing_id_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let id = segment.rsplit('-').next()?;
    (id.len() >= 5 && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

fn labelled_value(lines: &[String], label: &str) -> Option<String> {
    for (idx, line) in lines.iter().enumerate() {
        let lowered = line.to_ascii_lowercase();
        let Some(pos) = lowered.find(label) else {
            continue;
        };
        let after = line[pos + label.len()..].trim_start_matches([':', ' ']).trim();
        if !after.is_empty() {
            return Some(after.to_string());
        }
        if let Some(next) = lines.get(idx + 1) {
            let next = next.trim_start_matches([':', ' ']).trim();
            if !next.is_empty() {
                return Some(next.to_string());
            }
        }
    }
    None
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).next().map(|el| {
        el.text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn selector(css: &str) -> Selector {
    // Selectors are compile-time constants in this module.
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector {css}: {err:?}"))
}
