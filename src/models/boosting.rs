use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

use super::{check_width, dense, FitError, Regressor};

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Gradient boosting settings for squared loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    /// Boosting rounds, one tree each.
    pub n_rounds: usize,
    /// Shrinkage applied to every tree.
    pub learning_rate: f64,
    /// Depth of each residual tree.
    pub max_depth: u16,
    /// Rows a leaf must keep.
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 200,
            learning_rate: 0.05,
            max_depth: 3,
            min_samples_leaf: 1,
        }
    }
}

/// Initial mean plus shrunken `smartcore` regression trees on residuals.
#[derive(Debug, Serialize, Deserialize)]
pub struct BoostingModel {
    n_features: usize,
    init: f64,
    learning_rate: f64,
    trees: Vec<Tree>,
}

impl BoostingModel {
    /// Fits one tree per round to the running residuals.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        params: &BoostingParams,
    ) -> Result<Self, FitError> {
        if params.n_rounds == 0 {
            return Err(FitError::InvalidParameter("boosting needs at least one round".into()));
        }
        if !(params.learning_rate > 0.0 && params.learning_rate <= 1.0) {
            return Err(FitError::InvalidParameter(format!(
                "learning rate must be in (0, 1], got {}",
                params.learning_rate
            )));
        }
        if params.max_depth == 0 || params.min_samples_leaf == 0 {
            return Err(FitError::InvalidParameter(
                "residual trees need depth and leaf size of at least one".into(),
            ));
        }
        let init = y.mean().ok_or(FitError::EmptyTrainingSet)?;
        let matrix = dense(x);
        let settings = DecisionTreeRegressorParameters::default()
            .with_max_depth(params.max_depth)
            .with_min_samples_leaf(params.min_samples_leaf);

        let mut current = vec![init; y.len()];
        let mut trees = Vec::with_capacity(params.n_rounds);
        for _ in 0..params.n_rounds {
            let residual: Vec<f64> = y.iter().zip(&current).map(|(t, c)| t - c).collect();
            let tree = Tree::fit(&matrix, &residual, settings.clone())
                .map_err(|err| FitError::backend("gradient boosting", err))?;
            let step = tree
                .predict(&matrix)
                .map_err(|err| FitError::backend("gradient boosting", err))?;
            for (value, delta) in current.iter_mut().zip(&step) {
                *value += params.learning_rate * delta;
            }
            trees.push(tree);
        }
        if current.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite("gradient boosting".into()));
        }
        Ok(Self {
            n_features: x.ncols(),
            init,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    /// Number of fitted rounds.
    pub fn rounds(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for BoostingModel {
    fn input_width(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        check_width(self.n_features, x)?;
        let matrix = dense(x);
        let mut out = Array1::from_elem(x.nrows(), self.init);
        for tree in &self.trees {
            let step = tree
                .predict(&matrix)
                .map_err(|err| FitError::backend("gradient boosting", err))?;
            out.scaled_add(self.learning_rate, &Array1::from(step));
        }
        Ok(out)
    }
}
