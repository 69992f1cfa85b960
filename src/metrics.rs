//! Regression scores.

use serde::{Deserialize, Serialize};

/// Error scores for one prediction set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Mean absolute error.
    pub mae: f64,
    /// Root mean squared error.
    pub rmse: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

/// Scores `predicted` against `actual`. Both slices must have the same non-zero length.
pub fn evaluate(actual: &[f64], predicted: &[f64]) -> Scores {
    debug_assert_eq!(actual.len(), predicted.len());
    let n = actual.len().max(1) as f64;
    let mean = actual.iter().sum::<f64>() / n;
    let mut abs = 0.0;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (a, p) in actual.iter().zip(predicted) {
        abs += (a - p).abs();
        ss_res += (a - p).powi(2);
        ss_tot += (a - mean).powi(2);
    }
    Scores {
        mae: abs / n,
        rmse: (ss_res / n).sqrt(),
        r2: r_squared(ss_res, ss_tot),
    }
}

/// Mean squared error.
pub fn mse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().max(1) as f64;
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / n
}

fn r_squared(ss_res: f64, ss_tot: f64) -> f64 {
    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    }
}
