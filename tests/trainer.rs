mod common;

use std::fs;

use homeprice::dataset::DatasetError;
use homeprice::models::{Candidate, ForestParams};
use homeprice::training::{self, ModelStatus, TrainError};
use homeprice::{PipelineArtifact, PredictRequest, Predictor};
use pretty_assertions::assert_eq;

#[test]
fn trains_compares_and_persists_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("listings.csv");
    common::write_essendon_csv(&csv, 200);
    let out = dir.path().join("outputs");

    let summary = training::run(&common::quick_config(&csv, &out)).unwrap();

    assert_eq!(summary.rows.used, 200);
    assert_eq!(summary.rows.test, 40);
    assert_eq!(summary.rows.train, 160);
    assert_eq!(summary.results.len(), 3);
    assert!(summary.results.iter().all(|r| r.status == ModelStatus::Ok));
    assert!(summary.results.iter().all(|r| r.rmse_cv.is_some()));

    let best_rmse = summary
        .results
        .iter()
        .filter_map(|r| r.rmse)
        .fold(f64::INFINITY, f64::min);
    let winner = summary
        .results
        .iter()
        .find(|r| r.model == summary.best_model)
        .unwrap();
    assert_eq!(winner.rmse, Some(best_rmse));

    for file in [
        "model_compare.csv",
        "metrics.json",
        "pipeline.json",
        "eda/price_distribution.svg",
        "eda/correlation_heatmap.svg",
        "eda/price_vs_land_size.svg",
    ] {
        assert!(out.join(file).exists(), "missing output {file}");
    }
    let compare = fs::read_to_string(out.join("model_compare.csv")).unwrap();
    assert!(compare.starts_with("model,status,mae,rmse,r2"));
    assert_eq!(compare.lines().count(), 4);

    let predictor = Predictor::load(&out.join("pipeline.json")).unwrap();
    assert_eq!(predictor.artifact().model_name, summary.best_model);
    let request = PredictRequest {
        suburb: "Essendon".into(),
        property_type: "house".into(),
        bedrooms: Some(3.0),
        bathrooms: Some(2.0),
        land_size: Some(450.0),
        ..PredictRequest::default()
    };
    let first = predictor.predict(&request).unwrap();
    let second = predictor.predict(&request).unwrap();
    assert_eq!(first, second);
    assert!(first.predicted_price.is_finite());
    assert!(first.predicted_price > 0.0);
}

#[test]
fn identical_inputs_give_identical_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("listings.csv");
    common::write_essendon_csv(&csv, 180);

    let a = training::run(&common::quick_config(&csv, &dir.path().join("a"))).unwrap();
    let b = training::run(&common::quick_config(&csv, &dir.path().join("b"))).unwrap();
    assert_eq!(a.results, b.results);
    assert_eq!(a.best_model, b.best_model);
    assert_eq!(a.csv_crc32, b.csv_crc32);

    let pa = PipelineArtifact::load(&dir.path().join("a/pipeline.json")).unwrap();
    let pb = PipelineArtifact::load(&dir.path().join("b/pipeline.json")).unwrap();
    assert_eq!(
        serde_json::to_string(&pa.model).unwrap(),
        serde_json::to_string(&pb.model).unwrap()
    );
    assert_eq!(pa.preprocessor, pb.preprocessor);
}

#[test]
fn too_few_rows_fail_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("listings.csv");
    common::write_essendon_csv(&csv, 149);
    let out = dir.path().join("outputs");

    let err = training::run(&common::quick_config(&csv, &out)).unwrap_err();
    assert!(matches!(
        err,
        TrainError::Dataset(DatasetError::InsufficientData {
            found: 149,
            required: 150
        })
    ));
    assert!(err.to_string().contains("insufficient data"));
    assert!(!out.join("pipeline.json").exists());
}

#[test]
fn failing_candidate_is_recorded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("listings.csv");
    common::write_essendon_csv(&csv, 160);
    let out = dir.path().join("outputs");
    let mut config = common::quick_config(&csv, &out);
    config.cv_folds = 0;
    config.candidates = vec![
        Candidate::LinearRegression { alpha: -1.0 },
        Candidate::RandomForest(ForestParams {
            n_trees: 6,
            ..ForestParams::default()
        }),
    ];

    let summary = training::run(&config).unwrap();
    assert_eq!(summary.results[0].status, ModelStatus::Failed);
    assert!(summary.results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("invalid parameter"));
    assert_eq!(summary.results[0].rmse, None);
    assert_eq!(summary.best_model, "RandomForest");
    assert!(out.join("feature_importance.csv").exists());

    let compare = fs::read_to_string(out.join("model_compare.csv")).unwrap();
    let last = compare.lines().last().unwrap();
    assert!(last.starts_with("LinearRegression,failed"));
}

#[test]
fn all_candidates_failing_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("listings.csv");
    common::write_essendon_csv(&csv, 160);
    let out = dir.path().join("outputs");
    let mut config = common::quick_config(&csv, &out);
    config.candidates = vec![Candidate::LinearRegression { alpha: -1.0 }];

    let err = training::run(&config).unwrap_err();
    assert!(matches!(err, TrainError::NoSuccessfulModel { ref failures } if failures.len() == 1));
    assert!(!out.join("pipeline.json").exists());
}

#[test]
fn accepts_original_export_headers() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("export.csv");
    let mut body = String::from(
        "Suburb,Address_Display,Sold_Price,Bedrooms,Bathrooms,Land_Size_Sqm,Property_Type,Sale_Date\n",
    );
    for row in common::essendon_rows(150, 3) {
        body.push_str(&format!(
            "{},\"{}\",\"${}\",{},{},{},{},{}\n",
            row.suburb,
            row.address,
            row.price.unwrap_or_default(),
            row.bedrooms.unwrap_or_default(),
            row.bathrooms.unwrap_or_default(),
            row.land_size.map(|v| v.to_string()).unwrap_or_default(),
            row.property_type,
            row.sale_date
        ));
    }
    fs::write(&csv, body).unwrap();
    let out = dir.path().join("outputs");
    let mut config = common::quick_config(&csv, &out);
    config.cv_folds = 0;

    let summary = training::run(&config).unwrap();
    assert_eq!(summary.rows.used, 150);
    assert_eq!(
        summary.features.numeric,
        vec!["bedrooms", "bathrooms", "land_size", "sale_year", "sale_month"]
    );
    assert_eq!(summary.features.categorical, vec!["suburb", "property_type"]);
}

#[test]
fn location_and_amenity_columns_feed_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("enriched.csv");
    let mut body = String::from(
        "suburb,address,price,bedrooms,bathrooms,land_size,property_type,sale_date,lat,lng,distance_to_cbd,has_garage\n",
    );
    for (i, row) in common::essendon_rows(160, 5).into_iter().enumerate() {
        let garage = if i % 2 == 0 { "yes" } else { "no" };
        let bonus = if i % 2 == 0 { 40_000.0 } else { 0.0 };
        body.push_str(&format!(
            "{},\"{}\",{},{},{},{},{},{},{:.4},{:.4},{:.1},{}\n",
            row.suburb,
            row.address,
            row.price.unwrap_or_default() + bonus,
            row.bedrooms.unwrap_or_default(),
            row.bathrooms.unwrap_or_default(),
            row.land_size.map(|v| v.to_string()).unwrap_or_default(),
            row.property_type,
            row.sale_date,
            -37.75 + (i % 10) as f64 * 0.001,
            144.91 + (i % 7) as f64 * 0.001,
            7.0 + (i % 5) as f64 * 0.5,
            garage
        ));
    }
    fs::write(&csv, body).unwrap();
    let out = dir.path().join("outputs");
    let mut config = common::quick_config(&csv, &out);
    config.cv_folds = 0;

    let summary = training::run(&config).unwrap();
    assert_eq!(
        summary.features.numeric,
        vec![
            "bedrooms",
            "bathrooms",
            "land_size",
            "sale_year",
            "sale_month",
            "latitude",
            "longitude",
            "distance_to_cbd_km"
        ]
    );
    assert_eq!(
        summary.features.categorical,
        vec!["suburb", "property_type", "has_garage"]
    );

    let predictor = Predictor::load(&out.join("pipeline.json")).unwrap();
    let request = PredictRequest {
        suburb: "Essendon".into(),
        property_type: "House".into(),
        bedrooms: Some(3.0),
        bathrooms: Some(2.0),
        land_size: Some(450.0),
        latitude: Some(-37.752),
        longitude: Some(144.913),
        distance_to_cbd_km: Some(8.0),
        has_garage: Some(true),
        ..PredictRequest::default()
    };
    let prediction = predictor.predict(&request).unwrap();
    assert!(prediction.predicted_price.is_finite());
    assert!(prediction.predicted_price > 0.0);
}

#[test]
fn missing_required_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("bad.csv");
    fs::write(&csv, "suburb,price,bedrooms\nEssendon,900000,3\n").unwrap();
    let err = training::run(&common::quick_config(&csv, &dir.path().join("o"))).unwrap_err();
    assert!(matches!(err, TrainError::Dataset(DatasetError::MissingColumns(_))));
}
