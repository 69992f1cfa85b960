//! Regression candidates compared by the trainer.
//!
//! The linear baseline is fitted with `linfa-elasticnet`; the tree ensembles
//! are `smartcore` decision trees. Every model checks its input width before
//! scoring so a mismatched design matrix fails instead of panicking.

mod boosting;
mod forest;
mod linear;

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use thiserror::Error;

pub use boosting::{BoostingModel, BoostingParams};
pub use forest::{ForestModel, ForestParams};
pub use linear::LinearModel;

/// Why a candidate could not be fitted or could not score a matrix.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    /// No training rows.
    #[error("empty training set")]
    EmptyTrainingSet,
    /// Features and targets disagree in shape.
    #[error("shape mismatch: {0}")]
    Shape(String),
    /// Fit produced non-finite coefficients or predictions.
    #[error("non-finite values produced by {0}")]
    NonFinite(String),
    /// A hyperparameter is outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The underlying learner reported a failure.
    #[error("{learner} failed: {message}")]
    Backend {
        /// Learner name.
        learner: &'static str,
        /// Error reported by the learner.
        message: String,
    },
}

impl FitError {
    pub(crate) fn backend(learner: &'static str, err: impl std::fmt::Display) -> Self {
        FitError::Backend {
            learner,
            message: err.to_string(),
        }
    }
}

/// Prediction over encoded feature rows.
pub trait Regressor {
    /// Encoded columns the model was fitted on.
    fn input_width(&self) -> usize;

    /// Predictions for every row of `x`.
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError>;
}

/// One entry of the comparison roster with its hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// Least squares with a ridge term of `alpha`.
    LinearRegression {
        /// Ridge penalty; must be non-negative.
        alpha: f64,
    },
    /// Bootstrap-aggregated regression trees.
    RandomForest(ForestParams),
    /// Shallow trees fitted to residuals.
    GradientBoosting(BoostingParams),
}

impl Candidate {
    /// Default roster in tie-break order.
    pub fn roster(forest_trees: usize, boosting_rounds: usize) -> Vec<Candidate> {
        vec![
            Candidate::LinearRegression { alpha: 1e-3 },
            Candidate::RandomForest(ForestParams {
                n_trees: forest_trees,
                ..ForestParams::default()
            }),
            Candidate::GradientBoosting(BoostingParams {
                n_rounds: boosting_rounds,
                ..BoostingParams::default()
            }),
        ]
    }

    /// Display name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Candidate::LinearRegression { .. } => "LinearRegression",
            Candidate::RandomForest(_) => "RandomForest",
            Candidate::GradientBoosting(_) => "GradientBoosting",
        }
    }

    /// Fits the candidate on an encoded design matrix.
    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        seed: u64,
    ) -> Result<FittedModel, FitError> {
        if x.nrows() == 0 {
            return Err(FitError::EmptyTrainingSet);
        }
        if x.nrows() != y.len() {
            return Err(FitError::Shape(format!(
                "{} feature rows but {} targets",
                x.nrows(),
                y.len()
            )));
        }
        let model = match self {
            Candidate::LinearRegression { alpha } => {
                FittedModel::Linear(LinearModel::fit(x, y, *alpha)?)
            }
            Candidate::RandomForest(params) => {
                FittedModel::Forest(ForestModel::fit(x, y, params, seed)?)
            }
            Candidate::GradientBoosting(params) => {
                FittedModel::Boosting(BoostingModel::fit(x, y, params)?)
            }
        };
        Ok(model)
    }
}

/// Serializable fitted model.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedModel {
    /// Ridge-stabilised linear model.
    Linear(LinearModel),
    /// Random forest.
    Forest(ForestModel),
    /// Gradient-boosted trees.
    Boosting(BoostingModel),
}

impl FittedModel {
    /// Tree ensembles get a feature importance report.
    pub fn is_tree_ensemble(&self) -> bool {
        !matches!(self, FittedModel::Linear(_))
    }
}

impl Regressor for FittedModel {
    fn input_width(&self) -> usize {
        match self {
            FittedModel::Linear(model) => model.input_width(),
            FittedModel::Forest(model) => model.input_width(),
            FittedModel::Boosting(model) => model.input_width(),
        }
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        match self {
            FittedModel::Linear(model) => model.predict(x),
            FittedModel::Forest(model) => model.predict(x),
            FittedModel::Boosting(model) => model.predict(x),
        }
    }
}

/// Relative increase in mean squared error when each column of `x` is
/// shuffled, scaled to sum to one. Shuffles draw from `StdRng` seeded with `seed`.
pub fn permutation_importances(
    model: &impl Regressor,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    seed: u64,
) -> Result<Vec<f64>, FitError> {
    let actual = y.to_vec();
    let baseline = crate::metrics::mse(&actual, &model.predict(x)?.to_vec());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut shuffled = x.to_owned();
    let mut raw = Vec::with_capacity(x.ncols());
    for col in 0..x.ncols() {
        let mut column = x.column(col).to_vec();
        column.shuffle(&mut rng);
        shuffled.column_mut(col).assign(&Array1::from(column));
        let score = crate::metrics::mse(&actual, &model.predict(shuffled.view())?.to_vec());
        raw.push((score - baseline).max(0.0));
        shuffled.column_mut(col).assign(&x.column(col));
    }
    Ok(normalize(raw))
}

/// Scales importances so they sum to one; all-zero input stays zero.
fn normalize(mut values: Vec<f64>) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
    values
}

/// Fails unless `x` has exactly `width` columns.
fn check_width(width: usize, x: ArrayView2<'_, f64>) -> Result<(), FitError> {
    if x.ncols() != width {
        return Err(FitError::Shape(format!(
            "model expects {width} encoded columns, got {}",
            x.ncols()
        )));
    }
    Ok(())
}

/// Row-major copy into the matrix type smartcore learners consume.
fn dense(x: ArrayView2<'_, f64>) -> DenseMatrix<f64> {
    let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|row| row.to_vec()).collect();
    DenseMatrix::from_2d_vec(&rows)
}
