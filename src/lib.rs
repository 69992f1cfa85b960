#![warn(missing_docs)]
//! Core library for the homeprice collector, trainer and predictor app.

pub mod artifact;
pub mod controls;
pub mod dataset;
pub mod eda;
pub mod frontier;
pub mod html;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod payload;
pub mod predictor;
pub mod preprocess;
pub mod runtime;
pub mod schema;
pub mod server;
pub mod training;

pub use artifact::{ArtifactError, PipelineArtifact, ARTIFACT_FORMAT_VERSION};
pub use controls::{Cli, CollectControls, Suburb};
pub use dataset::{CellPolicy, Dataset, DatasetError, FeatureRow, FeatureSchema};
pub use models::{Candidate, FitError, FittedModel, Regressor};
pub use predictor::{PredictError, PredictRequest, Prediction, Predictor, ValidationError};
pub use runtime::{run as run_collector, CollectError, CollectReport};
pub use schema::ListingRow;
pub use server::{error_router, router, AppCli, AppConfig};
pub use training::{run as run_trainer, TrainCli, TrainConfig, TrainError, TrainingSummary};
