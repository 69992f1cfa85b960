//! Trainer pipeline: load, split, compare candidates, persist the winner.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::Parser;
use crossbeam_channel::unbounded;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactError, PipelineArtifact, ARTIFACT_FORMAT_VERSION};
use crate::dataset::{
    k_folds, train_test_split, CellPolicy, Dataset, DatasetError, FeatureSchema, Split,
};
use crate::eda;
use crate::metrics::{self, Scores};
use crate::models::{permutation_importances, Candidate, FitError, FittedModel, Regressor};
use crate::preprocess::Preprocessor;

/// Usable rows required before training starts.
pub const DEFAULT_MIN_ROWS: usize = 150;
/// Relative RMSE difference under which two candidates count as tied.
pub const TIE_TOLERANCE: f64 = 1e-9;

/// Fatal trainer failures.
#[derive(Debug, Error)]
pub enum TrainError {
    /// The input CSV is unusable.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Every candidate failed to fit.
    #[error("no candidate model could be fitted: {}", .failures.join("; "))]
    NoSuccessfulModel {
        /// `name: error` per candidate.
        failures: Vec<String>,
    },
    /// An output file could not be written.
    #[error("failed to write {path}: {message}")]
    Output {
        /// Output path.
        path: PathBuf,
        /// Error description.
        message: String,
    },
    /// The selected candidate could not be fitted for persistence.
    #[error("final fit failed: {0}")]
    Fit(#[from] FitError),
    /// The pipeline artifact could not be saved.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Trainer settings.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Input listings CSV.
    pub csv_path: PathBuf,
    /// Directory receiving every output file.
    pub output_dir: PathBuf,
    /// Seed for the split, folds and bootstrap samples.
    pub seed: u64,
    /// Held-out fraction.
    pub test_ratio: f64,
    /// Minimum usable rows.
    pub min_rows: usize,
    /// Cross-validation folds on the training partition; 0 disables.
    pub cv_folds: usize,
    /// Refit the winner on every usable row before saving it.
    pub refit_full: bool,
    /// Handling of unparseable numeric cells.
    pub cell_policy: CellPolicy,
    /// Candidates in tie-break order.
    pub candidates: Vec<Candidate>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data/listings.csv"),
            output_dir: PathBuf::from("outputs"),
            seed: 42,
            test_ratio: 0.2,
            min_rows: DEFAULT_MIN_ROWS,
            cv_folds: 5,
            refit_full: true,
            cell_policy: CellPolicy::Coerce,
            candidates: Candidate::roster(200, 200),
        }
    }
}

/// Command-line interface for the `trainer` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "trainer", about = "Train and compare sale price models")]
pub struct TrainCli {
    /// Listings CSV produced by the collector
    #[arg(long, env = "HOMEPRICE_LISTINGS_CSV", default_value = "data/listings.csv")]
    pub csv: PathBuf,

    /// Directory for metrics, plots and the pipeline artifact
    #[arg(long, env = "HOMEPRICE_OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Seed for splitting and resampling
    #[arg(long, env = "HOMEPRICE_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Fraction of rows held out for testing
    #[arg(long, env = "HOMEPRICE_TEST_RATIO", default_value_t = 0.2)]
    pub test_ratio: f64,

    /// Minimum usable rows before training
    #[arg(long, env = "HOMEPRICE_MIN_ROWS", default_value_t = DEFAULT_MIN_ROWS)]
    pub min_rows: usize,

    /// Cross-validation folds on the training partition (0 disables)
    #[arg(long, env = "HOMEPRICE_CV_FOLDS", default_value_t = 5)]
    pub cv_folds: usize,

    /// Persist the train-partition fit instead of refitting on all rows
    #[arg(long, default_value_t = false)]
    pub no_refit: bool,

    /// Fail on unparseable numeric cells instead of treating them as missing
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    /// Trees in the random forest
    #[arg(long, env = "HOMEPRICE_FOREST_TREES", default_value_t = 200)]
    pub forest_trees: usize,

    /// Gradient boosting rounds
    #[arg(long, env = "HOMEPRICE_BOOSTING_ROUNDS", default_value_t = 200)]
    pub boosting_rounds: usize,
}

impl TrainCli {
    /// Converts the parsed CLI into a [`TrainConfig`].
    pub fn build_config(&self) -> TrainConfig {
        TrainConfig {
            csv_path: self.csv.clone(),
            output_dir: self.output_dir.clone(),
            seed: self.seed,
            test_ratio: self.test_ratio,
            min_rows: self.min_rows,
            cv_folds: self.cv_folds,
            refit_full: !self.no_refit,
            cell_policy: if self.strict {
                CellPolicy::Strict
            } else {
                CellPolicy::Coerce
            },
            candidates: Candidate::roster(self.forest_trees, self.boosting_rounds),
        }
    }
}

/// Outcome of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Fitted and evaluated.
    Ok,
    /// Fit or evaluation failed; see `error`.
    Failed,
}

/// One row of the comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    /// Candidate name.
    pub model: String,
    /// Whether the candidate produced usable predictions.
    pub status: ModelStatus,
    /// Test MAE.
    pub mae: Option<f64>,
    /// Test RMSE, the selection metric.
    pub rmse: Option<f64>,
    /// Test R².
    pub r2: Option<f64>,
    /// Mean fold MAE on the training partition.
    pub mae_cv: Option<f64>,
    /// Square root of the mean fold MSE.
    pub rmse_cv: Option<f64>,
    /// Mean fold R².
    pub r2_cv: Option<f64>,
    /// Failure description.
    pub error: Option<String>,
}

impl ModelResult {
    fn scores(&self) -> Option<Scores> {
        Some(Scores {
            mae: self.mae?,
            rmse: self.rmse?,
            r2: self.r2?,
        })
    }
}

/// Row accounting written to `metrics.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    /// Data rows in the CSV.
    pub read: usize,
    /// Rows dropped for a missing or non-positive price.
    pub dropped: usize,
    /// Numeric cells coerced to missing.
    pub malformed_cells: usize,
    /// Rows used for training and evaluation.
    pub used: usize,
    /// Training partition size.
    pub train: usize,
    /// Test partition size.
    pub test: usize,
}

/// Contents of `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Completion time.
    pub trained_at: DateTime<Utc>,
    /// Input CSV path.
    pub csv_path: String,
    /// CRC32 of the input CSV bytes, hex encoded.
    pub csv_crc32: String,
    /// Configured seed.
    pub seed: u64,
    /// Held-out fraction.
    pub test_ratio: f64,
    /// Cross-validation folds (0 when disabled).
    pub cv_folds: usize,
    /// Row accounting.
    pub rows: RowCounts,
    /// Features the models were trained on.
    pub features: FeatureSchema,
    /// Winning candidate.
    pub best_model: String,
    /// Whether the saved pipeline was refit on all rows.
    pub refit_on_full_data: bool,
    /// Per-candidate results in roster order.
    pub results: Vec<ModelResult>,
}

impl TrainingSummary {
    /// Prints the comparison table to stdout.
    pub fn report(&self) {
        println!(
            "--- model comparison ({} train / {} test rows) ---",
            self.rows.train, self.rows.test
        );
        for result in &self.results {
            match (result.status, result.scores()) {
                (ModelStatus::Ok, Some(s)) => println!(
                    "{:<18} rmse={:>12.0} mae={:>12.0} r2={:>6.3}{}",
                    result.model,
                    s.rmse,
                    s.mae,
                    s.r2,
                    if result.model == self.best_model { "  <- best" } else { "" }
                ),
                _ => println!(
                    "{:<18} failed: {}",
                    result.model,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
    }
}

struct Evaluation {
    test: Scores,
    cv: Option<Scores>,
    model: FittedModel,
}

struct EvalContext<'a> {
    dataset: &'a Dataset,
    split: &'a Split,
    folds: &'a [Split],
    seed: u64,
}

/// Runs the full training pipeline and writes every output under `config.output_dir`.
pub fn run(config: &TrainConfig) -> Result<TrainingSummary, TrainError> {
    let dataset = Dataset::load(&config.csv_path, config.cell_policy)?;
    dataset.ensure_min_rows(config.min_rows)?;
    if config.cv_folds == 1 {
        return Err(DatasetError::InvalidConfig("cv folds must be 0 or at least 2".into()).into());
    }
    let split = train_test_split(dataset.len(), config.test_ratio, config.seed)?;
    let folds = if config.cv_folds >= 2 {
        k_folds(&split.train, config.cv_folds, config.seed)?
    } else {
        Vec::new()
    };

    let eda_dir = config.output_dir.join("eda");
    eda::write_plots(&eda_dir, &dataset).map_err(|err| TrainError::Output {
        path: eda_dir.clone(),
        message: err.to_string(),
    })?;

    let ctx = EvalContext {
        dataset: &dataset,
        split: &split,
        folds: &folds,
        seed: config.seed,
    };
    let outcomes = evaluate_all(&config.candidates, &ctx);

    let results: Vec<ModelResult> = config
        .candidates
        .iter()
        .zip(&outcomes)
        .map(|(candidate, outcome)| to_result(candidate, outcome))
        .collect();
    write_comparison(&config.output_dir.join("model_compare.csv"), &results)?;

    let Some(best) = select_best(&results) else {
        let failures = results
            .iter()
            .map(|r| format!("{}: {}", r.model, r.error.as_deref().unwrap_or("failed")))
            .collect();
        return Err(TrainError::NoSuccessfulModel { failures });
    };
    let candidate = &config.candidates[best];
    let mut outcomes = outcomes;
    let Ok(evaluation) = outcomes.swap_remove(best) else {
        return Err(TrainError::NoSuccessfulModel {
            failures: vec![format!("{}: missing evaluation", candidate.name())],
        });
    };
    info!(model = candidate.name(), rmse = evaluation.test.rmse, "best candidate selected");

    let (preprocessor, model, (x, y), refit) = if config.refit_full {
        match refit_all(candidate, &dataset, config.seed) {
            Ok((pre, model, encoded)) => (pre, model, encoded, true),
            Err(err) => {
                warn!(model = candidate.name(), error = %err, "refit on all rows failed; keeping train fit");
                let (pre, encoded) = fit_partition(&dataset, &split.train)?;
                (pre, evaluation.model, encoded, false)
            }
        }
    } else {
        let (pre, encoded) = fit_partition(&dataset, &split.train)?;
        (pre, evaluation.model, encoded, false)
    };
    let training_rows = y.len();

    if model.is_tree_ensemble() {
        let importances =
            permutation_importances(&model, x.view(), ArrayView1::from(&y), config.seed)?;
        write_importances(
            &config.output_dir.join("feature_importance.csv"),
            &preprocessor.feature_names(),
            &importances,
        )?;
    }

    let trained_at = Utc::now();
    let artifact = PipelineArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        model_name: candidate.name().to_string(),
        trained_at,
        seed: config.seed,
        training_rows,
        test_scores: evaluation.test,
        preprocessor,
        model,
    };
    artifact.save(&config.output_dir.join("pipeline.json"))?;

    let stats = dataset.stats();
    let summary = TrainingSummary {
        trained_at,
        csv_path: config.csv_path.display().to_string(),
        csv_crc32: format!("{:08x}", dataset.checksum()),
        seed: config.seed,
        test_ratio: config.test_ratio,
        cv_folds: folds.len(),
        rows: RowCounts {
            read: stats.rows_read,
            dropped: stats.rows_dropped,
            malformed_cells: stats.malformed_cells,
            used: dataset.len(),
            train: split.train.len(),
            test: split.test.len(),
        },
        features: dataset.schema().clone(),
        best_model: candidate.name().to_string(),
        refit_on_full_data: refit,
        results,
    };
    let metrics_path = config.output_dir.join("metrics.json");
    let body = serde_json::to_vec_pretty(&summary).map_err(|err| TrainError::Output {
        path: metrics_path.clone(),
        message: err.to_string(),
    })?;
    fs::write(&metrics_path, body).map_err(|err| TrainError::Output {
        path: metrics_path.clone(),
        message: err.to_string(),
    })?;
    Ok(summary)
}

fn evaluate_all(candidates: &[Candidate], ctx: &EvalContext<'_>) -> Vec<Result<Evaluation, FitError>> {
    let (tx, rx) = unbounded::<(usize, Result<Evaluation, FitError>)>();
    thread::scope(|scope| {
        for (slot, candidate) in candidates.iter().enumerate() {
            let tx = tx.clone();
            scope.spawn(move || {
                let started = Instant::now();
                let outcome = evaluate_candidate(candidate, ctx);
                match &outcome {
                    Ok(eval) => debug!(
                        model = candidate.name(),
                        rmse = eval.test.rmse,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "candidate evaluated"
                    ),
                    Err(err) => warn!(model = candidate.name(), error = %err, "candidate failed"),
                }
                let _ = tx.send((slot, outcome));
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<Result<Evaluation, FitError>>> =
        candidates.iter().map(|_| None).collect();
    for (slot, outcome) in rx.iter() {
        slots[slot] = Some(outcome);
    }
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(FitError::NonFinite("worker exited without a result".into())))
        })
        .collect()
}

fn evaluate_candidate(candidate: &Candidate, ctx: &EvalContext<'_>) -> Result<Evaluation, FitError> {
    let (model, predicted, actual) = fit_and_predict(
        candidate,
        ctx.dataset,
        &ctx.split.train,
        &ctx.split.test,
        ctx.seed,
    )?;
    let test = metrics::evaluate(&actual, &predicted);

    let cv = if ctx.folds.is_empty() {
        None
    } else {
        let mut mae = 0.0;
        let mut mse = 0.0;
        let mut r2 = 0.0;
        for fold in ctx.folds {
            let (_, predicted, actual) =
                fit_and_predict(candidate, ctx.dataset, &fold.train, &fold.test, ctx.seed)?;
            let scores = metrics::evaluate(&actual, &predicted);
            mae += scores.mae;
            mse += metrics::mse(&actual, &predicted);
            r2 += scores.r2;
        }
        let k = ctx.folds.len() as f64;
        Some(Scores {
            mae: mae / k,
            rmse: (mse / k).sqrt(),
            r2: r2 / k,
        })
    };
    Ok(Evaluation { test, cv, model })
}

/// Fits preprocessing and `candidate` on `train`, then predicts `test`.
fn fit_and_predict(
    candidate: &Candidate,
    dataset: &Dataset,
    train: &[usize],
    test: &[usize],
    seed: u64,
) -> Result<(FittedModel, Vec<f64>, Vec<f64>), FitError> {
    let (pre, (x_train, y_train)) = fit_partition(dataset, train)?;
    let model = candidate.fit(x_train.view(), ArrayView1::from(&y_train), seed)?;
    let (test_rows, actual) = dataset.subset(test);
    let predicted = model.predict(pre.transform(&test_rows).view())?.to_vec();
    if predicted.iter().any(|p| !p.is_finite()) {
        return Err(FitError::NonFinite(candidate.name().to_string()));
    }
    Ok((model, predicted, actual))
}

type Encoded = (ndarray::Array2<f64>, Vec<f64>);

fn fit_partition(dataset: &Dataset, indices: &[usize]) -> Result<(Preprocessor, Encoded), FitError> {
    let (rows, targets) = dataset.subset(indices);
    let pre = Preprocessor::fit(dataset.schema(), &rows)?;
    let x = pre.transform(&rows);
    Ok((pre, (x, targets)))
}

fn refit_all(
    candidate: &Candidate,
    dataset: &Dataset,
    seed: u64,
) -> Result<(Preprocessor, FittedModel, Encoded), FitError> {
    let all: Vec<usize> = (0..dataset.len()).collect();
    let (pre, (x, y)) = fit_partition(dataset, &all)?;
    let model = candidate.fit(x.view(), ArrayView1::from(&y), seed)?;
    Ok((pre, model, (x, y)))
}

fn to_result(candidate: &Candidate, outcome: &Result<Evaluation, FitError>) -> ModelResult {
    match outcome {
        Ok(eval) => ModelResult {
            model: candidate.name().to_string(),
            status: ModelStatus::Ok,
            mae: Some(eval.test.mae),
            rmse: Some(eval.test.rmse),
            r2: Some(eval.test.r2),
            mae_cv: eval.cv.map(|s| s.mae),
            rmse_cv: eval.cv.map(|s| s.rmse),
            r2_cv: eval.cv.map(|s| s.r2),
            error: None,
        },
        Err(err) => ModelResult {
            model: candidate.name().to_string(),
            status: ModelStatus::Failed,
            mae: None,
            rmse: None,
            r2: None,
            mae_cv: None,
            rmse_cv: None,
            r2_cv: None,
            error: Some(err.to_string()),
        },
    }
}

/// Index of the winner: lowest RMSE, then lowest MAE, then highest R², then earliest.
pub fn select_best(results: &[ModelResult]) -> Option<usize> {
    let mut best: Option<(usize, Scores)> = None;
    for (idx, result) in results.iter().enumerate() {
        if result.status != ModelStatus::Ok {
            continue;
        }
        let Some(scores) = result.scores() else {
            continue;
        };
        match best {
            Some((_, current)) if !beats(&scores, &current) => {}
            _ => best = Some((idx, scores)),
        }
    }
    best.map(|(idx, _)| idx)
}

fn beats(a: &Scores, b: &Scores) -> bool {
    if !tied(a.rmse, b.rmse) {
        return a.rmse < b.rmse;
    }
    if !tied(a.mae, b.mae) {
        return a.mae < b.mae;
    }
    if !tied(a.r2, b.r2) {
        return a.r2 > b.r2;
    }
    false
}

fn tied(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIE_TOLERANCE * a.abs().max(b.abs())
}

fn write_comparison(path: &Path, results: &[ModelResult]) -> Result<(), TrainError> {
    let mut ranked: Vec<&ModelResult> = results.iter().collect();
    ranked.sort_by(|a, b| match (a.rmse, b.rmse) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    write_csv(path, |writer| {
        for result in ranked {
            writer.serialize(result)?;
        }
        Ok(())
    })
}

fn write_importances(path: &Path, names: &[String], importances: &[f64]) -> Result<(), TrainError> {
    let mut pairs: Vec<(&String, f64)> = names.iter().zip(importances.iter().copied()).collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    write_csv(path, |writer| {
        writer.write_record(["feature", "importance"])?;
        for (name, value) in pairs {
            let value = format!("{value:.6}");
            writer.write_record([name.as_str(), value.as_str()])?;
        }
        Ok(())
    })
}

fn write_csv(
    path: &Path,
    body: impl FnOnce(&mut csv::Writer<fs::File>) -> Result<(), csv::Error>,
) -> Result<(), TrainError> {
    let output_err = |message: String| TrainError::Output {
        path: path.to_path_buf(),
        message,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| output_err(err.to_string()))?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|err| output_err(err.to_string()))?;
    body(&mut writer).map_err(|err| output_err(err.to_string()))?;
    writer.flush().map_err(|err| output_err(err.to_string()))
}
