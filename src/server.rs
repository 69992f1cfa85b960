//! HTTP surface of the predictor app: an HTML form plus a small JSON API.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::{DateTime, Utc};
use clap::Parser;
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::artifact::ARTIFACT_FORMAT_VERSION;
use crate::dataset::FeatureSchema;
use crate::metrics::Scores;
use crate::predictor::{
    PredictError, PredictRequest, Prediction, Predictor, ValidationError, FLAG_FIELDS,
};

/// Command-line interface for the `predictor_app` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "predictor_app", about = "Serve sale price predictions from a trained pipeline")]
pub struct AppCli {
    /// Pipeline artifact written by the trainer
    #[arg(long, env = "HOMEPRICE_ARTIFACT", default_value = "outputs/pipeline.json")]
    pub artifact: PathBuf,

    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "HOMEPRICE_BIND", default_value = "127.0.0.1:8501")]
    pub bind: String,

    /// Serve a 503 page with the load error instead of exiting when the artifact is unusable
    #[arg(long, env = "HOMEPRICE_SERVE_ERROR_PAGE", default_value_t = false)]
    pub serve_error_page: bool,
}

/// Predictor app settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Artifact path.
    pub artifact: PathBuf,
    /// Bind address.
    pub bind: String,
    /// Fall back to an error page on load failure.
    pub serve_error_page: bool,
}

impl AppCli {
    /// Converts the parsed CLI into an [`AppConfig`].
    pub fn build_config(&self) -> AppConfig {
        AppConfig {
            artifact: self.artifact.clone(),
            bind: self.bind.clone(),
            serve_error_page: self.serve_error_page,
        }
    }
}

#[derive(Clone)]
struct AppState {
    predictor: Arc<Predictor>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModelInfo<'a> {
    model: &'a str,
    format_version: u32,
    trained_at: DateTime<Utc>,
    training_rows: usize,
    test_scores: Scores,
    features: &'a FeatureSchema,
}

/// Routes for a loaded predictor. The predictor is shared read-only by every request.
pub fn router(predictor: Arc<Predictor>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/predict", post(predict_form))
        .route("/v1/predict", post(predict_json))
        .route("/v1/model", get(model_info))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { predictor })
}

/// Answers every route with 503 and the startup diagnostic.
pub fn error_router(message: impl Into<String>) -> Router {
    let message: Arc<str> = Arc::from(message.into());
    Router::new()
        .fallback(move || {
            let message = Arc::clone(&message);
            async move { unavailable(&message) }
        })
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(page(
        &state.predictor,
        &PredictRequest::default(),
        None,
    ))
}

async fn predict_form(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let request = match PredictRequest::from_form(&form) {
        Ok(request) => request,
        Err(err) => {
            let fallback = PredictRequest {
                suburb: form.get("suburb").cloned().unwrap_or_default(),
                property_type: form.get("property_type").cloned().unwrap_or_default(),
                ..PredictRequest::default()
            };
            return invalid_page(&state.predictor, &fallback, &err);
        }
    };
    match state.predictor.predict(&request) {
        Ok(prediction) => {
            info!(price = prediction.predicted_price, "form prediction served");
            Html(page(&state.predictor, &request, Some(Ok(&prediction)))).into_response()
        }
        Err(PredictError::Invalid(err)) => invalid_page(&state.predictor, &request, &err),
        Err(PredictError::Model(err)) => {
            error!(error = %err, "form prediction failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(page(&state.predictor, &request, None)))
                .into_response()
        }
    }
}

async fn predict_json(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<Prediction>, (StatusCode, Json<ErrorBody>)> {
    let prediction = state.predictor.predict(&request).map_err(|err| match err {
        PredictError::Invalid(err) => {
            debug!(field = %err.field, "rejected prediction request");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorBody {
                    error: err.message,
                    field: Some(err.field),
                }),
            )
        }
        PredictError::Model(err) => {
            error!(error = %err, "prediction failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: err.to_string(),
                    field: None,
                }),
            )
        }
    })?;
    Ok(Json(prediction))
}

async fn model_info(State(state): State<AppState>) -> Response {
    let artifact = state.predictor.artifact();
    Json(ModelInfo {
        model: &artifact.model_name,
        format_version: ARTIFACT_FORMAT_VERSION,
        trained_at: artifact.trained_at,
        training_rows: artifact.training_rows,
        test_scores: artifact.test_scores,
        features: artifact.schema(),
    })
    .into_response()
}

fn invalid_page(predictor: &Predictor, request: &PredictRequest, err: &ValidationError) -> Response {
    debug!(field = %err.field, "rejected form input");
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Html(page(predictor, request, Some(Err(err)))),
    )
        .into_response()
}

fn unavailable(message: &str) -> Response {
    let body = format!(
        "<!doctype html><html><head><title>Model unavailable</title></head><body>\
         <h1>Model unavailable</h1><p>The prediction pipeline could not be loaded.</p>\
         <pre>{}</pre><p>Run the trainer, then restart the app.</p></body></html>",
        encode_text(message)
    );
    (StatusCode::SERVICE_UNAVAILABLE, Html(body)).into_response()
}

const TEXT_FIELDS: &[(&str, &str)] = &[
    ("suburb", "Suburb"),
    ("property_type", "Property type"),
    ("postcode", "Postcode (optional)"),
    ("agency", "Agency (optional)"),
];

const NUMBER_FIELDS: &[(&str, &str)] = &[
    ("bedrooms", "Bedrooms"),
    ("bathrooms", "Bathrooms"),
    ("land_size", "Land size (m²)"),
    ("car_spaces", "Car spaces (optional)"),
    ("building_size", "Building size (m², optional)"),
    ("year_built", "Year built (optional)"),
    ("sale_year", "Sale year (optional)"),
    ("sale_month", "Sale month (optional)"),
    ("nearby_schools_count", "Nearby schools (optional)"),
    ("distance_to_cbd_km", "Distance to CBD in km (optional)"),
    ("lot_frontage_m", "Lot frontage in m (optional)"),
    ("latitude", "Latitude (optional)"),
    ("longitude", "Longitude (optional)"),
];

const FLAG_LABELS: &[&str] = &["Has garage", "Has air conditioning", "Has heating"];

fn page(
    predictor: &Predictor,
    request: &PredictRequest,
    outcome: Option<Result<&Prediction, &ValidationError>>,
) -> String {
    let artifact = predictor.artifact();
    let mut out = String::from(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>Home price estimator</title></head><body>",
    );
    let _ = write!(
        out,
        "<h1>Home price estimator</h1><p>Model: {} trained {} (test RMSE {}).</p>",
        encode_text(&artifact.model_name),
        artifact.trained_at.format("%Y-%m-%d"),
        format_price(artifact.test_scores.rmse)
    );
    match outcome {
        Some(Ok(prediction)) => {
            let _ = write!(
                out,
                "<p class=\"result\">Estimated sale price: <strong>{}</strong></p>",
                format_price(prediction.predicted_price)
            );
        }
        Some(Err(err)) => {
            let _ = write!(
                out,
                "<p class=\"error\">Invalid input for {}: {}</p>",
                encode_text(&err.field),
                encode_text(&err.message)
            );
        }
        None => {}
    }

    out.push_str("<form method=\"post\" action=\"/predict\">");
    for (name, label) in TEXT_FIELDS {
        let value = request.categorical(name).unwrap_or("");
        let _ = write!(
            out,
            "<p><label>{label} <input type=\"text\" name=\"{name}\" value=\"{}\"></label></p>",
            encode_double_quoted_attribute(value)
        );
    }
    for (name, label) in NUMBER_FIELDS {
        let value = request.numeric(name).map(|v| v.to_string()).unwrap_or_default();
        let _ = write!(
            out,
            "<p><label>{label} <input type=\"number\" step=\"any\" name=\"{name}\" value=\"{}\"></label></p>",
            encode_double_quoted_attribute(&value)
        );
    }
    for (name, label) in FLAG_FIELDS.iter().zip(FLAG_LABELS) {
        let checked = if request.flag(name) == Some(true) { " checked" } else { "" };
        let _ = write!(
            out,
            "<p><label><input type=\"checkbox\" name=\"{name}\" value=\"1\"{checked}> {label}</label></p>"
        );
    }
    out.push_str("<button type=\"submit\">Estimate</button></form></body></html>");
    out
}

/// Whole dollars with thousands separators, e.g. `$1,250,000`.
pub fn format_price(value: f64) -> String {
    if !value.is_finite() {
        return "n/a".to_string();
    }
    let rounded = value.round().abs() as u64;
    let digits = rounded.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && rounded > 0 { "-" } else { "" };
    format!("{sign}${grouped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_prices() {
        assert_eq!(format_price(1_250_000.4), "$1,250,000");
        assert_eq!(format_price(999.5), "$1,000");
        assert_eq!(format_price(-12_345.0), "-$12,345");
        assert_eq!(format_price(f64::NAN), "n/a");
    }

    #[test]
    fn cli_defaults() {
        let config = AppCli::parse_from(["predictor_app"]).build_config();
        assert_eq!(config.artifact, PathBuf::from("outputs/pipeline.json"));
        assert_eq!(config.bind, "127.0.0.1:8501");
        assert!(!config.serve_error_page);
    }
}
