use linfa::traits::Fit;
use linfa::Dataset;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{check_width, FitError, Regressor};

const MAX_ITERATIONS: u32 = 10_000;
const TOLERANCE: f64 = 1e-8;

/// Ridge regression fitted by `linfa-elasticnet` with a pure L2 penalty.
///
/// One-hot blocks make the plain design rank deficient, so a small `alpha`
/// picks the minimum-norm solution. Only the hyperplane is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    intercept: f64,
    coefficients: Vec<f64>,
}

impl LinearModel {
    /// Fits with `l1_ratio = 0`, i.e. ridge with penalty `alpha`.
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, alpha: f64) -> Result<Self, FitError> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(FitError::InvalidParameter(format!(
                "ridge alpha must be a non-negative number, got {alpha}"
            )));
        }
        let dataset = Dataset::new(x.to_owned(), y.to_owned());
        let model = ElasticNet::params()
            .penalty(alpha)
            .l1_ratio(0.0)
            .max_iterations(MAX_ITERATIONS)
            .tolerance(TOLERANCE)
            .fit(&dataset)
            .map_err(|err| FitError::backend("elastic net", err))?;

        let intercept = model.intercept();
        let coefficients = model.hyperplane().to_vec();
        if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(FitError::NonFinite("linear regression".into()));
        }
        Ok(Self {
            intercept,
            coefficients,
        })
    }

    /// Fitted intercept.
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Fitted coefficients in encoded column order.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl Regressor for LinearModel {
    fn input_width(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        check_width(self.input_width(), x)?;
        Ok(x.dot(&Array1::from(self.coefficients.clone())) + self.intercept)
    }
}
