//! Persisted pipeline: fitted preprocessor plus fitted model.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::dataset::{FeatureRow, FeatureSchema};
use crate::metrics::Scores;
use crate::models::{FitError, FittedModel, Regressor};
use crate::preprocess::Preprocessor;

/// Bumped whenever the artifact layout changes incompatibly.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Numeric inputs every artifact must accept.
pub const REQUIRED_NUMERIC: &[&str] = &["bedrooms", "bathrooms", "land_size", "sale_year", "sale_month"];
/// Categorical inputs every artifact must accept.
pub const REQUIRED_CATEGORICAL: &[&str] = &["suburb", "property_type"];

/// Load and save failures.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No file at the given path.
    #[error("pipeline artifact not found at {0}; run the trainer first")]
    Missing(String),
    /// File could not be read or written.
    #[error("pipeline artifact io error at {path}: {source}")]
    Io {
        /// Artifact path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Not valid JSON or not a pipeline document.
    #[error("pipeline artifact is unreadable: {0}")]
    Parse(#[from] serde_json::Error),
    /// Written by an incompatible trainer version.
    #[error("pipeline artifact format version {found:?} is not supported (expected {expected})")]
    IncompatibleVersion {
        /// Version found in the file, if any.
        found: Option<u64>,
        /// Version this build reads.
        expected: u32,
    },
    /// A feature the predictor relies on is absent.
    #[error("pipeline artifact lacks required feature {0}")]
    MissingFeature(String),
    /// The preprocessor's fitted state disagrees with its own schema.
    #[error("pipeline artifact preprocessor is inconsistent: {0}")]
    Inconsistent(String),
    /// The model was fitted on a different encoded width than the preprocessor emits.
    #[error("pipeline artifact model expects {model} encoded columns but the preprocessor emits {preprocessor}")]
    WidthMismatch {
        /// Width the model was fitted on.
        model: usize,
        /// Width of the encoded matrix.
        preprocessor: usize,
    },
    /// A tree splits on a column outside the encoded matrix.
    #[error("pipeline artifact tree splits on column {index}, encoded width is {width}")]
    SplitOutOfRange {
        /// Offending column index.
        index: u64,
        /// Width of the encoded matrix.
        width: usize,
    },
}

/// Everything the predictor needs to score a listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineArtifact {
    /// Layout version, see [`ARTIFACT_FORMAT_VERSION`].
    pub format_version: u32,
    /// Winning candidate name.
    pub model_name: String,
    /// When training finished.
    pub trained_at: DateTime<Utc>,
    /// Split and bootstrap seed.
    pub seed: u64,
    /// Rows the persisted fit saw.
    pub training_rows: usize,
    /// Held-out scores of the winning candidate.
    pub test_scores: Scores,
    /// Fitted preprocessing.
    pub preprocessor: Preprocessor,
    /// Fitted model.
    pub model: FittedModel,
}

impl PipelineArtifact {
    /// Feature layout expected by [`PipelineArtifact::predict`].
    pub fn schema(&self) -> &FeatureSchema {
        self.preprocessor.schema()
    }

    /// Scores feature rows laid out according to [`PipelineArtifact::schema`].
    pub fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, FitError> {
        let x = self.preprocessor.transform(rows);
        Ok(self.model.predict(x.view())?.to_vec())
    }

    /// Writes the artifact as pretty JSON through a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let io_err = |source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        info!(path = %path.display(), model = %self.model_name, "pipeline artifact saved");
        Ok(())
    }

    /// Reads and checks an artifact. The format version is checked before the
    /// body is decoded so older layouts fail with a version error; the decoded
    /// body must then be structurally sound so no request can hit a bad shape.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::Missing(path.display().to_string()))
            }
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let value: Value = serde_json::from_slice(&raw)?;
        let found = value.get("format_version").and_then(Value::as_u64);
        if found != Some(u64::from(ARTIFACT_FORMAT_VERSION)) {
            return Err(ArtifactError::IncompatibleVersion {
                found,
                expected: ARTIFACT_FORMAT_VERSION,
            });
        }
        let artifact = Self::deserialize(&value)?;
        artifact.check_features()?;
        artifact.check_shapes(value.get("model"))?;
        Ok(artifact)
    }

    fn check_shapes(&self, model: Option<&Value>) -> Result<(), ArtifactError> {
        self.preprocessor
            .check_consistency()
            .map_err(ArtifactError::Inconsistent)?;
        let width = self.preprocessor.input_width();
        if self.model.input_width() != width {
            return Err(ArtifactError::WidthMismatch {
                model: self.model.input_width(),
                preprocessor: width,
            });
        }
        match model.and_then(max_split_feature) {
            Some(index) if index >= width as u64 => {
                Err(ArtifactError::SplitOutOfRange { index, width })
            }
            _ => Ok(()),
        }
    }

    fn check_features(&self) -> Result<(), ArtifactError> {
        let schema = self.schema();
        let numeric = REQUIRED_NUMERIC
            .iter()
            .find(|name| !schema.numeric.iter().any(|n| n == *name));
        let categorical = REQUIRED_CATEGORICAL
            .iter()
            .find(|name| !schema.categorical.iter().any(|n| n == *name));
        match numeric.or(categorical) {
            Some(name) => Err(ArtifactError::MissingFeature(name.to_string())),
            None => Ok(()),
        }
    }
}

/// Largest `split_feature` anywhere in a serialized tree ensemble.
fn max_split_feature(value: &Value) -> Option<u64> {
    match value {
        Value::Object(map) => {
            let own = map.get("split_feature").and_then(Value::as_u64);
            map.values().filter_map(max_split_feature).chain(own).max()
        }
        Value::Array(items) => items.iter().filter_map(max_split_feature).max(),
        _ => None,
    }
}
