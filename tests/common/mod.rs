#![allow(dead_code)]

use std::path::Path;

use homeprice::models::{BoostingParams, Candidate, ForestParams};
use homeprice::runtime::write_listings_csv;
use homeprice::{ListingRow, TrainConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PROPERTY_TYPES: &[&str] = &["House", "Unit", "Townhouse"];

/// Synthetic Essendon sales with a known price structure plus seeded noise.
pub fn essendon_rows(n: usize, seed: u64) -> Vec<ListingRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let bedrooms: u32 = rng.random_range(1..=5);
            let bathrooms: u32 = rng.random_range(1..=3);
            let land: f64 = rng.random_range(120.0..900.0_f64).round();
            let kind = PROPERTY_TYPES[i % PROPERTY_TYPES.len()];
            let premium = match kind {
                "House" => 250_000.0,
                "Townhouse" => 120_000.0,
                _ => 0.0,
            };
            let noise: f64 = rng.random_range(-40_000.0..40_000.0);
            let price = 350_000.0
                + 110_000.0 * bedrooms as f64
                + 60_000.0 * bathrooms as f64
                + 650.0 * land
                + premium
                + noise;
            let month = (i % 12) + 1;
            ListingRow {
                suburb: "Essendon".into(),
                address: format!("{} Example St, Essendon, Vic 3040", i + 1),
                price: Some(price.round()),
                bedrooms: Some(bedrooms),
                bathrooms: Some(bathrooms),
                car_spaces: if i % 7 == 0 { None } else { Some(1 + (i % 2) as u32) },
                land_size: if i % 11 == 0 { None } else { Some(land) },
                property_type: kind.into(),
                sale_date: format!("2024-{month:02}-15"),
                postcode: "3040".into(),
                listing_id: format!("{}", 140_000_000 + i),
                ..ListingRow::default()
            }
        })
        .collect()
}

/// Writes `n` synthetic rows to `path` in collector format.
pub fn write_essendon_csv(path: &Path, n: usize) {
    write_listings_csv(path, &essendon_rows(n, 7)).unwrap();
}

/// A roster small enough for debug-mode test runs.
pub fn quick_roster() -> Vec<Candidate> {
    vec![
        Candidate::LinearRegression { alpha: 1e-3 },
        Candidate::RandomForest(ForestParams {
            n_trees: 12,
            ..ForestParams::default()
        }),
        Candidate::GradientBoosting(BoostingParams {
            n_rounds: 40,
            learning_rate: 0.1,
            ..BoostingParams::default()
        }),
    ]
}

/// Trainer settings pointed at `csv` and `out` with the quick roster.
pub fn quick_config(csv: &Path, out: &Path) -> TrainConfig {
    TrainConfig {
        csv_path: csv.to_path_buf(),
        output_dir: out.to_path_buf(),
        cv_folds: 3,
        candidates: quick_roster(),
        ..TrainConfig::default()
    }
}
