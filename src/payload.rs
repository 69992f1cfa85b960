//! Offline import of saved search-API JSON payloads.
//!
//! Sold-search pages are backed by a JSON API whose responses can be saved
//! from a browser session. Each file holds one response; result lists live
//! under one of several operation names depending on the API revision.

use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::{parse_price, ListingRow};

const RESULT_NODES: &[&str] = &[
    "soldSearchByQuery",
    "searchResults",
    "search",
    "listingsSearch",
    "residentialSearch",
];

/// Failures while reading a payload directory.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Directory or file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Returns the list of listing objects inside one API response.
pub fn find_results_block(payload: &Value) -> Vec<&Value> {
    let Some(data) = payload.get("data") else {
        return Vec::new();
    };
    let node = RESULT_NODES
        .iter()
        .find_map(|name| data.get(*name).filter(|v| !v.is_null()));
    if let Some(node) = node.filter(|n| n.is_object()) {
        if let Some(items) = node.pointer("/results/items").and_then(Value::as_array) {
            return items.iter().collect();
        }
        if let Some(items) = node.get("results").and_then(Value::as_array) {
            return items.iter().collect();
        }
        if let Some(edges) = node.get("edges").and_then(Value::as_array) {
            return edges
                .iter()
                .map(|edge| edge.get("node").unwrap_or(edge))
                .collect();
        }
    }
    data.as_object()
        .into_iter()
        .flat_map(|map| map.values())
        .filter_map(Value::as_array)
        .find(|list| list.first().is_some_and(Value::is_object))
        .map(|list| list.iter().collect())
        .unwrap_or_default()
}

/// Flattens one API listing object into a CSV row.
pub fn flatten_listing(item: &Value) -> ListingRow {
    let price_text = first_string(item, &["/price/display", "/soldDetails/displayPrice", "/priceText"]);
    ListingRow {
        suburb: first_string(item, &["/address/suburb", "/location/suburb"]).unwrap_or_default(),
        address: first_string(item, &["/address/display", "/displayAddress"]).unwrap_or_default(),
        price: price_text.as_deref().and_then(parse_price),
        bedrooms: first_number(item, &["/bedrooms", "/features/beds"]).map(|v| v as u32),
        bathrooms: first_number(item, &["/bathrooms", "/features/baths"]).map(|v| v as u32),
        car_spaces: first_number(item, &["/carspaces", "/features/cars"]).map(|v| v as u32),
        land_size: first_number(item, &["/land/size/value", "/landSize"]),
        building_size: first_number(item, &["/building/size/value", "/buildingSize"]),
        property_type: first_string(item, &["/propertyType", "/listing/propertyType"])
            .unwrap_or_default(),
        sale_date: first_string(item, &["/soldDetails/soldDate", "/soldOn", "/soldDate"])
            .unwrap_or_default(),
        postcode: first_string(item, &["/address/postcode", "/location/postcode"])
            .unwrap_or_default(),
        agency: first_string(item, &["/agency/name", "/listingCompany/name"]).unwrap_or_default(),
        year_built: first_number(item, &["/yearBuilt"]).map(|v| v as u32),
        listing_id: first_string(item, &["/id", "/listingId"]).unwrap_or_default(),
        url: first_string(item, &["/url", "/href"]).unwrap_or_default(),
    }
}

/// Reads every `*.json` file in `dir` (sorted by name) and flattens their results.
///
/// Files that fail to parse are logged and skipped, matching the per-page policy
/// of live collection.
pub fn load_payload_dir(dir: &Path) -> Result<Vec<ListingRow>, PayloadError> {
    let io_err = |path: &Path, source| PayloadError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut files: Vec<_> = fs::read_dir(dir)
        .map_err(|err| io_err(dir, err))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut rows = Vec::new();
    for path in files {
        let raw = fs::read_to_string(&path).map_err(|err| io_err(&path, err))?;
        let payload: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unparseable payload");
                continue;
            }
        };
        let items = find_results_block(&payload);
        debug!(path = %path.display(), items = items.len(), "payload parsed");
        rows.extend(items.into_iter().map(flatten_listing));
    }
    Ok(rows)
}

fn first_string(item: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|ptr| match item.pointer(ptr)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_number(item: &Value, pointers: &[&str]) -> Option<f64> {
    pointers.iter().find_map(|ptr| match item.pointer(ptr)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => crate::schema::extract_number(s),
        _ => None,
    })
}
