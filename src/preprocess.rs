//! Feature preprocessing fitted on the training partition.
//!
//! Numeric columns are median-imputed then standard-scaled. Categorical columns
//! fill gaps with [`MISSING_CATEGORY`] and are one-hot encoded over the
//! categories seen during fit; unseen categories encode as all zeros. The
//! encoded layout puts every categorical block first, then the numeric columns.

use std::collections::BTreeSet;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dataset::{FeatureRow, FeatureSchema};
use crate::models::FitError;

/// Category used for missing categorical values.
pub const MISSING_CATEGORY: &str = "__missing__";

/// Fitted imputation, scaling and encoding state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    schema: FeatureSchema,
    medians: Vec<f64>,
    means: Vec<f64>,
    scales: Vec<f64>,
    categories: Vec<Vec<String>>,
}

impl Preprocessor {
    /// Learns medians, scaling and category vocabularies from `rows`.
    pub fn fit(schema: &FeatureSchema, rows: &[FeatureRow]) -> Result<Self, FitError> {
        if rows.is_empty() {
            return Err(FitError::EmptyTrainingSet);
        }
        let width = schema.numeric.len();
        if let Some(bad) = rows.iter().find(|row| {
            row.numeric.len() != width || row.categorical.len() != schema.categorical.len()
        }) {
            return Err(FitError::Shape(format!(
                "row has {} numeric and {} categorical values, schema expects {} and {}",
                bad.numeric.len(),
                bad.categorical.len(),
                width,
                schema.categorical.len()
            )));
        }

        let mut medians = Vec::with_capacity(width);
        let mut means = Vec::with_capacity(width);
        let mut scales = Vec::with_capacity(width);
        for col in 0..width {
            let observed: Vec<f64> = rows.iter().filter_map(|row| row.numeric[col]).collect();
            let median = median(observed);
            let filled: Vec<f64> = rows
                .iter()
                .map(|row| row.numeric[col].unwrap_or(median))
                .collect();
            let mean = filled.iter().sum::<f64>() / filled.len() as f64;
            let variance =
                filled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / filled.len() as f64;
            let std = variance.sqrt();
            medians.push(median);
            means.push(mean);
            scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }

        let categories = (0..schema.categorical.len())
            .map(|col| {
                rows.iter()
                    .map(|row| {
                        row.categorical[col]
                            .clone()
                            .unwrap_or_else(|| MISSING_CATEGORY.to_string())
                    })
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .collect();

        Ok(Self {
            schema: schema.clone(),
            medians,
            means,
            scales,
            categories,
        })
    }

    /// Feature layout this preprocessor was fitted with.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Width of the encoded matrix.
    pub fn width(&self) -> usize {
        self.categories.iter().map(Vec::len).sum::<usize>() + self.schema.numeric.len()
    }

    /// Columns [`Preprocessor::transform`] produces; a model scoring its output
    /// must have been fitted on exactly this many.
    pub fn input_width(&self) -> usize {
        self.width()
    }

    /// Checks that the fitted state lines up with the schema. A deserialized
    /// preprocessor must pass before [`Preprocessor::transform`] is used.
    pub fn check_consistency(&self) -> Result<(), String> {
        let numeric = self.schema.numeric.len();
        for (what, len) in [
            ("medians", self.medians.len()),
            ("means", self.means.len()),
            ("scales", self.scales.len()),
        ] {
            if len != numeric {
                return Err(format!("{len} {what} for {numeric} numeric features"));
            }
        }
        if self.categories.len() != self.schema.categorical.len() {
            return Err(format!(
                "{} category lists for {} categorical features",
                self.categories.len(),
                self.schema.categorical.len()
            ));
        }
        if let Some(col) = (0..numeric).find(|&col| {
            !self.medians[col].is_finite()
                || !self.means[col].is_finite()
                || !(self.scales[col].is_finite() && self.scales[col] > 0.0)
        }) {
            return Err(format!("non-finite or zero scaling for {}", self.schema.numeric[col]));
        }
        if let Some(col) = self
            .categories
            .iter()
            .position(|cats| cats.is_empty() || cats.windows(2).any(|w| w[0] >= w[1]))
        {
            return Err(format!(
                "categories for {} are empty or not strictly sorted",
                self.schema.categorical[col]
            ));
        }
        Ok(())
    }

    /// Encoded column names, e.g. `suburb=essendon` or `land_size`.
    pub fn feature_names(&self) -> Vec<String> {
        self.schema
            .categorical
            .iter()
            .zip(&self.categories)
            .flat_map(|(name, cats)| cats.iter().map(move |cat| format!("{name}={cat}")))
            .chain(self.schema.numeric.iter().cloned())
            .collect()
    }

    /// Encodes rows into a dense design matrix. Assumes a consistent
    /// preprocessor, which [`Preprocessor::fit`] always produces.
    pub fn transform(&self, rows: &[FeatureRow]) -> Array2<f64> {
        let mut out = Array2::zeros((rows.len(), self.width()));
        for (r, row) in rows.iter().enumerate() {
            let mut offset = 0;
            for (col, cats) in self.categories.iter().enumerate() {
                let value = row
                    .categorical
                    .get(col)
                    .and_then(|v| v.as_deref())
                    .unwrap_or(MISSING_CATEGORY);
                if let Ok(pos) = cats.binary_search_by(|c| c.as_str().cmp(value)) {
                    out[[r, offset + pos]] = 1.0;
                }
                offset += cats.len();
            }
            for col in 0..self.medians.len() {
                let raw = row
                    .numeric
                    .get(col)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
                    .unwrap_or(self.medians[col]);
                out[[r, offset + col]] = (raw - self.means[col]) / self.scales[col];
            }
        }
        out
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
