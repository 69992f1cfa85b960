use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use super::{check_width, dense, FitError, Regressor};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Random forest settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of bootstrap trees.
    pub n_trees: usize,
    /// Depth limit per tree; `None` grows until leaves are pure or minimal.
    pub max_depth: Option<u16>,
    /// Rows a leaf must keep.
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            max_depth: None,
            min_samples_leaf: 1,
        }
    }
}

/// `smartcore` random forest over the encoded design matrix.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForestModel {
    n_features: usize,
    n_trees: usize,
    forest: Forest,
}

impl ForestModel {
    /// Bootstrap sampling is seeded, so equal inputs give equal forests.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        params: &ForestParams,
        seed: u64,
    ) -> Result<Self, FitError> {
        if params.n_trees == 0 {
            return Err(FitError::InvalidParameter("forest needs at least one tree".into()));
        }
        if params.min_samples_leaf == 0 {
            return Err(FitError::InvalidParameter("leaves need at least one row".into()));
        }
        let mut settings = RandomForestRegressorParameters::default()
            .with_n_trees(params.n_trees)
            .with_min_samples_leaf(params.min_samples_leaf)
            .with_seed(seed);
        if let Some(depth) = params.max_depth {
            settings = settings.with_max_depth(depth);
        }
        let forest = Forest::fit(&dense(x), &y.to_vec(), settings)
            .map_err(|err| FitError::backend("random forest", err))?;
        Ok(Self {
            n_features: x.ncols(),
            n_trees: params.n_trees,
            forest,
        })
    }

    /// Number of trees.
    pub fn len(&self) -> usize {
        self.n_trees
    }

    /// True for a forest without trees, which `fit` never produces.
    pub fn is_empty(&self) -> bool {
        self.n_trees == 0
    }
}

impl Regressor for ForestModel {
    fn input_width(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        check_width(self.n_features, x)?;
        self.forest
            .predict(&dense(x))
            .map(Array1::from)
            .map_err(|err| FitError::backend("random forest", err))
    }
}
