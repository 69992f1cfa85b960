//! Training data: CSV loading against the listing schema, feature rows and splits.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{canonical_column, sale_year_month, REQUIRED_COLUMNS};

/// Numeric features always present (sale year/month derive from `sale_date`).
pub const CORE_NUMERIC_FEATURES: &[&str] =
    &["bedrooms", "bathrooms", "land_size", "sale_year", "sale_month"];
/// Numeric features used when their column exists in the CSV.
pub const OPTIONAL_NUMERIC_FEATURES: &[&str] = &[
    "car_spaces",
    "building_size",
    "year_built",
    "latitude",
    "longitude",
    "nearby_schools_count",
    "distance_to_cbd_km",
    "lot_frontage_m",
];
/// Categorical features always present.
pub const CORE_CATEGORICAL_FEATURES: &[&str] = &["suburb", "property_type"];
/// Categorical features used when their column exists in the CSV.
pub const OPTIONAL_CATEGORICAL_FEATURES: &[&str] =
    &["postcode", "agency", "has_garage", "has_aircon", "has_heating"];
/// Yes/no amenity columns, encoded as the categories `1` and `0`.
pub const FLAG_FEATURES: &[&str] = &["has_garage", "has_aircon", "has_heating"];

/// Errors that make a CSV unusable for training.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Input file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// CSV path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The CSV itself is malformed.
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    /// Required columns are absent from the header.
    #[error("csv is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    /// Fewer usable rows than the configured minimum.
    #[error("insufficient data: {found} usable rows, at least {required} required")]
    InsufficientData {
        /// Rows with a positive price.
        found: usize,
        /// Configured minimum.
        required: usize,
    },
    /// A non-empty numeric cell could not be parsed (strict mode only).
    #[error("malformed value {value:?} in column {column} at data row {row}")]
    MalformedValue {
        /// 1-based data row number.
        row: usize,
        /// Column name.
        column: String,
        /// Raw cell text.
        value: String,
    },
    /// Split or fold settings are impossible for the row count.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Ordered numeric and categorical feature names used by a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Numeric feature names.
    pub numeric: Vec<String>,
    /// Categorical feature names.
    pub categorical: Vec<String>,
}

impl FeatureSchema {
    /// Core features plus the optional ones present in `columns`.
    pub fn for_columns(columns: &[String]) -> Self {
        let has = |name: &str| columns.iter().any(|c| c == name);
        let numeric = CORE_NUMERIC_FEATURES
            .iter()
            .chain(OPTIONAL_NUMERIC_FEATURES.iter().filter(|name| has(name)))
            .map(|s| s.to_string())
            .collect();
        let categorical = CORE_CATEGORICAL_FEATURES
            .iter()
            .chain(OPTIONAL_CATEGORICAL_FEATURES.iter().filter(|name| has(name)))
            .map(|s| s.to_string())
            .collect();
        Self {
            numeric,
            categorical,
        }
    }

    /// Position of a numeric feature.
    pub fn numeric_index(&self, name: &str) -> Option<usize> {
        self.numeric.iter().position(|n| n == name)
    }
}

/// One feature row aligned with a [`FeatureSchema`]. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureRow {
    /// Numeric values in schema order.
    pub numeric: Vec<Option<f64>>,
    /// Categorical values in schema order, already normalized.
    pub categorical: Vec<Option<String>>,
}

/// Row accounting for a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    /// Data rows read from the CSV.
    pub rows_read: usize,
    /// Rows dropped for a missing or non-positive price.
    pub rows_dropped: usize,
    /// Non-empty numeric cells that could not be parsed and were treated as missing.
    pub malformed_cells: usize,
}

/// Usable training rows with their targets.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: FeatureSchema,
    rows: Vec<FeatureRow>,
    targets: Vec<f64>,
    stats: LoadStats,
    checksum: u32,
}

/// How non-empty unparseable numeric cells are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellPolicy {
    /// Treat them as missing and count them.
    #[default]
    Coerce,
    /// Fail the load.
    Strict,
}

impl Dataset {
    /// Loads and validates a listings CSV.
    pub fn load(path: &Path, policy: CellPolicy) -> Result<Self, DatasetError> {
        let mut raw = Vec::new();
        File::open(path)
            .and_then(|mut file| file.read_to_end(&mut raw))
            .map_err(|source| DatasetError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let dataset = Self::from_reader(raw.as_slice(), policy)?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            dropped = dataset.stats.rows_dropped,
            malformed = dataset.stats.malformed_cells,
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Parses CSV bytes. Headers are normalized with [`canonical_column`].
    pub fn from_reader(bytes: &[u8], policy: CellPolicy) -> Result<Self, DatasetError> {
        let checksum = {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(bytes);
            hasher.finalize()
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);
        let columns: Vec<String> = reader.headers()?.iter().map(canonical_column).collect();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|req| !columns.iter().any(|c| c == *req))
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DatasetError::MissingColumns(missing));
        }
        let index: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let schema = FeatureSchema::for_columns(&columns);

        let mut rows = Vec::new();
        let mut targets = Vec::new();
        let mut stats = LoadStats::default();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            stats.rows_read += 1;
            let cell = |name: &str| index.get(name).and_then(|&i| record.get(i)).unwrap_or("");
            let mut numeric_cell = |name: &str| -> Result<Option<f64>, DatasetError> {
                let raw = cell(name);
                match parse_numeric(raw) {
                    Ok(value) => Ok(value),
                    Err(()) if policy == CellPolicy::Strict => Err(DatasetError::MalformedValue {
                        row: line + 1,
                        column: name.to_string(),
                        value: raw.to_string(),
                    }),
                    Err(()) => {
                        stats.malformed_cells += 1;
                        Ok(None)
                    }
                }
            };

            let price = numeric_cell("price")?;
            let Some(price) = price.filter(|p| p.is_finite() && *p > 0.0) else {
                stats.rows_dropped += 1;
                continue;
            };
            let (sale_year, sale_month) = sale_year_month(cell("sale_date"));
            let mut numeric = Vec::with_capacity(schema.numeric.len());
            for name in &schema.numeric {
                let value = match name.as_str() {
                    "sale_year" => sale_year,
                    "sale_month" => sale_month,
                    other => numeric_cell(other)?,
                };
                numeric.push(value);
            }
            let categorical = schema
                .categorical
                .iter()
                .map(|name| normalize_feature_category(name, cell(name)))
                .collect();
            rows.push(FeatureRow {
                numeric,
                categorical,
            });
            targets.push(price);
        }
        debug!(
            numeric = ?schema.numeric,
            categorical = ?schema.categorical,
            "feature schema resolved"
        );
        Ok(Self {
            schema,
            rows,
            targets,
            stats,
            checksum,
        })
    }

    /// Builds a dataset from already-prepared rows.
    pub fn from_parts(schema: FeatureSchema, rows: Vec<FeatureRow>, targets: Vec<f64>) -> Self {
        let stats = LoadStats {
            rows_read: rows.len(),
            ..LoadStats::default()
        };
        Self {
            schema,
            rows,
            targets,
            stats,
            checksum: 0,
        }
    }

    /// Feature layout.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// All usable rows.
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Prices aligned with [`Dataset::rows`].
    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// Load accounting.
    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// CRC32 of the raw CSV bytes.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Number of usable rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no row is usable.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fails with [`DatasetError::InsufficientData`] below `min_rows`.
    pub fn ensure_min_rows(&self, min_rows: usize) -> Result<(), DatasetError> {
        if self.len() < min_rows {
            return Err(DatasetError::InsufficientData {
                found: self.len(),
                required: min_rows,
            });
        }
        Ok(())
    }

    /// Rows and targets at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> (Vec<FeatureRow>, Vec<f64>) {
        indices
            .iter()
            .map(|&i| (self.rows[i].clone(), self.targets[i]))
            .unzip()
    }
}

/// Row indices of a train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Training partition.
    pub train: Vec<usize>,
    /// Held-out partition.
    pub test: Vec<usize>,
}

/// Seeded shuffle split; the test partition takes `ceil(n * test_ratio)` rows.
pub fn train_test_split(n: usize, test_ratio: f64, seed: u64) -> Result<Split, DatasetError> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(DatasetError::InvalidConfig(format!(
            "test ratio must be in (0, 1), got {test_ratio}"
        )));
    }
    let n_test = (n as f64 * test_ratio).ceil() as usize;
    if n_test == 0 || n - n_test.min(n) < 2 {
        return Err(DatasetError::InvalidConfig(format!(
            "{n} rows cannot be split with test ratio {test_ratio}"
        )));
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = order.split_off(n_test);
    Ok(Split { train, test: order })
}

/// Seeded k-fold partition of `indices`. The first `len % k` folds get one extra row.
pub fn k_folds(indices: &[usize], k: usize, seed: u64) -> Result<Vec<Split>, DatasetError> {
    if k < 2 || k > indices.len() {
        return Err(DatasetError::InvalidConfig(format!(
            "cannot make {k} folds from {} rows",
            indices.len()
        )));
    }
    let mut order = indices.to_vec();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let base = order.len() / k;
    let extra = order.len() % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let test = order[start..start + size].to_vec();
        let train = order[..start]
            .iter()
            .chain(order[start + size..].iter())
            .copied()
            .collect();
        folds.push(Split { train, test });
        start += size;
    }
    Ok(folds)
}

/// Lower-cased, whitespace-collapsed category; empty cells are missing.
pub fn normalize_category(raw: &str) -> Option<String> {
    let value = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!value.is_empty()).then(|| value.to_lowercase())
}

/// Normalizes a categorical cell for feature `name`. Amenity flags collapse
/// yes/no spellings onto `1` and `0`; anything else goes through
/// [`normalize_category`].
pub fn normalize_feature_category(name: &str, raw: &str) -> Option<String> {
    if FLAG_FEATURES.contains(&name) {
        if let Some(flag) = parse_flag(raw) {
            return Some(if flag { "1" } else { "0" }.to_string());
        }
    }
    normalize_category(raw)
}

/// Reads `1/0`, `true/false`, `yes/no`, `y/n` and `on/off`.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "0.0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_numeric(raw: &str) -> Result<Option<f64>, ()> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed.eq_ignore_ascii_case("na")
    {
        return Ok(None);
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Some)
        .ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CSV: &str = "\
Suburb,Address,Sold_Price,Bedrooms,Bathrooms,Land_Size_Sqm,Property_Type,Sale_Date,Car_Spaces
Essendon,1 A St,\"$1,100,000\",3,2,450,House,2024-08-15,2
Essendon,2 B St,,3,1,300,House,2024-08-16,1
Essendon,3 C St,0,2,1,200,Unit,2024-08-17,
 ESSENDON ,4 D St,650000,two,1,,Unit,15 Sep 2024,1
";

    #[test]
    fn loads_with_aliases_and_drops_unpriced_rows() {
        let dataset = Dataset::from_reader(CSV.as_bytes(), CellPolicy::Coerce).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.targets(), &[1_100_000.0, 650_000.0]);
        assert_eq!(
            dataset.stats(),
            LoadStats {
                rows_read: 4,
                rows_dropped: 2,
                malformed_cells: 1,
            }
        );
        assert_eq!(
            dataset.schema().numeric,
            vec!["bedrooms", "bathrooms", "land_size", "sale_year", "sale_month", "car_spaces"]
        );
        let second = &dataset.rows()[1];
        assert_eq!(second.numeric[0], None);
        assert_eq!(second.numeric[2], None);
        assert_eq!(second.numeric[3], Some(2024.0));
        assert_eq!(second.numeric[4], Some(9.0));
        assert_eq!(second.categorical[0].as_deref(), Some("essendon"));
    }

    #[test]
    fn picks_up_location_and_amenity_columns() {
        let csv = "\
suburb,address,price,bedrooms,bathrooms,land_size,property_type,sale_date,lat,lng,nearby_schools_count,distance_to_cbd_km,lot_frontage_m,has_garage,has_aircon,has_heating
Essendon,1 A St,900000,3,1,400,House,2024-08-15,-37.75,144.92,4,9.5,15.2,Yes,0,true
Essendon,2 B St,800000,2,1,300,Unit,2024-08-16,,,,,,,n,
";
        let dataset = Dataset::from_reader(csv.as_bytes(), CellPolicy::Strict).unwrap();
        let schema = dataset.schema();
        assert_eq!(
            schema.numeric[5..].to_vec(),
            vec![
                "latitude",
                "longitude",
                "nearby_schools_count",
                "distance_to_cbd_km",
                "lot_frontage_m"
            ]
        );
        assert_eq!(
            schema.categorical,
            vec!["suburb", "property_type", "has_garage", "has_aircon", "has_heating"]
        );
        let first = &dataset.rows()[0];
        assert_eq!(first.numeric[5], Some(-37.75));
        assert_eq!(first.numeric[8], Some(9.5));
        let flags: Vec<Option<&str>> = first.categorical[2..].iter().map(|c| c.as_deref()).collect();
        assert_eq!(flags, vec![Some("1"), Some("0"), Some("1")]);
        let second = &dataset.rows()[1];
        assert_eq!(second.numeric[5], None);
        assert_eq!(second.categorical[2], None);
        assert_eq!(second.categorical[3].as_deref(), Some("0"));
    }

    #[test]
    fn strict_policy_rejects_malformed_cells() {
        let err = Dataset::from_reader(CSV.as_bytes(), CellPolicy::Strict).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MalformedValue { row: 4, ref column, .. } if column == "bedrooms"
        ));
    }

    #[test]
    fn reports_missing_columns() {
        let err = Dataset::from_reader(b"suburb,price\nEssendon,1\n", CellPolicy::Coerce)
            .unwrap_err();
        match err {
            DatasetError::MissingColumns(cols) => {
                assert!(cols.contains(&"bedrooms".to_string()));
                assert!(!cols.contains(&"price".to_string()));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn split_is_seeded_and_disjoint() {
        let a = train_test_split(10, 0.2, 42).unwrap();
        let b = train_test_split(10, 0.2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.test.len(), 2);
        assert_eq!(a.train.len(), 8);
        let mut all: Vec<usize> = a.train.iter().chain(a.test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert!(train_test_split(10, 1.0, 1).is_err());
    }

    #[test]
    fn folds_cover_every_index_once() {
        let indices: Vec<usize> = (0..11).collect();
        let folds = k_folds(&indices, 3, 7).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, indices);
        assert!(folds.iter().all(|f| f.train.len() + f.test.len() == 11));
    }
}
