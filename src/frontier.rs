//! Visit plan for sold-search pages plus listing deduplication.

use std::collections::HashSet;

use crate::controls::{CollectControls, Suburb};
use crate::schema::{ListingKey, ListingRow};

/// One sold-search page scheduled for a visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTask {
    /// Suburb the page belongs to.
    pub suburb: Suburb,
    /// 1-based result page.
    pub page: usize,
    /// Absolute page URL.
    pub url: String,
}

/// Expands controls into the ordered list of search pages to visit.
pub fn plan_search_pages(controls: &CollectControls) -> Vec<SearchTask> {
    controls
        .suburbs()
        .iter()
        .flat_map(|suburb| {
            (1..=controls.pages_per_suburb()).map(move |page| SearchTask {
                suburb: suburb.clone(),
                page,
                url: suburb.search_url(controls.base_url(), page),
            })
        })
        .collect()
}

/// Keeps the first occurrence of every listing key.
#[derive(Debug, Default)]
pub struct SeenListings {
    keys: HashSet<ListingKey>,
    ids: HashSet<String>,
    duplicates: usize,
}

impl SeenListings {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a listing id was already accepted; lets callers skip a detail fetch.
    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Records `row` and returns `true` when it has not been seen before.
    pub fn insert(&mut self, row: &ListingRow) -> bool {
        let key = row.key();
        if !self.keys.insert(key) {
            self.duplicates += 1;
            return false;
        }
        let id = row.listing_id.trim();
        if !id.is_empty() {
            self.ids.insert(id.to_string());
        }
        true
    }

    /// Counts an id-level duplicate detected before the row was built.
    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    /// Number of rejected duplicates.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Number of accepted listings.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when nothing has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Drops duplicate rows in place, preserving first-seen order. Returns the number removed.
pub fn dedupe_rows(rows: &mut Vec<ListingRow>) -> usize {
    let mut seen = SeenListings::new();
    rows.retain(|row| seen.insert(row));
    seen.duplicates()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn plans_pages_per_suburb_in_order() {
        let controls = CollectControls::new(
            vec![
                "Essendon:vic:3040".parse().unwrap(),
                "Burwood:vic:3125".parse().unwrap(),
            ],
            2,
            Duration::ZERO,
            Duration::from_secs(1),
            true,
            "http://localhost",
        );
        let urls: Vec<String> = plan_search_pages(&controls)
            .into_iter()
            .map(|task| task.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost/sold/in-essendon,+vic+3040/list-1",
                "http://localhost/sold/in-essendon,+vic+3040/list-2",
                "http://localhost/sold/in-burwood,+vic+3125/list-1",
                "http://localhost/sold/in-burwood,+vic+3125/list-2",
            ]
        );
    }

    #[test]
    fn dedupes_by_id_then_address_and_date() {
        let row = |id: &str, address: &str, date: &str| ListingRow {
            listing_id: id.into(),
            address: address.into(),
            sale_date: date.into(),
            ..ListingRow::default()
        };
        let mut rows = vec![
            row("1", "1 A St", "2024-01-01"),
            row("1", "1 A St (dup)", "2024-01-01"),
            row("", "2 B St", "2024-02-01"),
            row("", "2  b st", "2024-02-01"),
            row("", "2 B St", "2024-03-01"),
        ];
        assert_eq!(dedupe_rows(&mut rows), 2);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].sale_date, "2024-03-01");
    }
}
