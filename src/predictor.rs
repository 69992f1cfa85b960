//! Input validation and scoring against a loaded pipeline artifact.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{ArtifactError, PipelineArtifact};
use crate::dataset::{normalize_feature_category, parse_flag, FeatureRow};
use crate::models::FitError;

/// A rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Offending field name.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Why a request produced no prediction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    /// The input failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// The model could not score a valid input.
    #[error("model could not score the request: {0}")]
    Model(#[from] FitError),
}

/// Listing attributes submitted for a prediction. Blank optional fields are imputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictRequest {
    /// Suburb name.
    pub suburb: String,
    /// Property type, e.g. `house` or `unit`.
    pub property_type: String,
    /// Bedrooms.
    pub bedrooms: Option<f64>,
    /// Bathrooms.
    pub bathrooms: Option<f64>,
    /// Land size in square metres.
    pub land_size: Option<f64>,
    /// Car spaces.
    pub car_spaces: Option<f64>,
    /// Building size in square metres.
    pub building_size: Option<f64>,
    /// Construction year.
    pub year_built: Option<f64>,
    /// Sale year.
    pub sale_year: Option<f64>,
    /// Sale month, 1-12.
    pub sale_month: Option<f64>,
    /// Latitude in decimal degrees.
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees.
    pub longitude: Option<f64>,
    /// Schools within walking distance.
    pub nearby_schools_count: Option<f64>,
    /// Road distance to the CBD in kilometres.
    pub distance_to_cbd_km: Option<f64>,
    /// Street frontage in metres.
    pub lot_frontage_m: Option<f64>,
    /// Garage on title.
    pub has_garage: Option<bool>,
    /// Air conditioning installed.
    pub has_aircon: Option<bool>,
    /// Heating installed.
    pub has_heating: Option<bool>,
    /// Postcode.
    pub postcode: Option<String>,
    /// Selling agency.
    pub agency: Option<String>,
}

struct Bound {
    field: &'static str,
    min: f64,
    max: f64,
    whole: bool,
    required: bool,
}

const BOUNDS: &[Bound] = &[
    Bound { field: "bedrooms", min: 0.0, max: 20.0, whole: true, required: true },
    Bound { field: "bathrooms", min: 0.0, max: 20.0, whole: true, required: true },
    Bound { field: "land_size", min: 0.0, max: 100_000.0, whole: false, required: true },
    Bound { field: "car_spaces", min: 0.0, max: 20.0, whole: true, required: false },
    Bound { field: "building_size", min: 0.0, max: 100_000.0, whole: false, required: false },
    Bound { field: "year_built", min: 1800.0, max: 2100.0, whole: true, required: false },
    Bound { field: "sale_year", min: 1990.0, max: 2100.0, whole: true, required: false },
    Bound { field: "sale_month", min: 1.0, max: 12.0, whole: true, required: false },
    Bound { field: "latitude", min: -90.0, max: 90.0, whole: false, required: false },
    Bound { field: "longitude", min: -180.0, max: 180.0, whole: false, required: false },
    Bound { field: "nearby_schools_count", min: 0.0, max: 50.0, whole: true, required: false },
    Bound { field: "distance_to_cbd_km", min: 0.0, max: 200.0, whole: false, required: false },
    Bound { field: "lot_frontage_m", min: 0.0, max: 1_000.0, whole: false, required: false },
];

/// Amenity checkboxes; unchecked boxes are absent from a submitted form.
pub const FLAG_FIELDS: &[&str] = &["has_garage", "has_aircon", "has_heating"];

impl PredictRequest {
    /// Builds a request from form fields. Blank numeric fields become `None`;
    /// an absent amenity checkbox means "no".
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let text = |name: &str| form.get(name).map(|v| v.trim()).unwrap_or("");
        let number = |name: &str| -> Result<Option<f64>, ValidationError> {
            let raw = text(name);
            if raw.is_empty() {
                return Ok(None);
            }
            raw.parse::<f64>()
                .map(Some)
                .map_err(|_| ValidationError::new(name, format!("{raw:?} is not a number")))
        };
        let optional = |name: &str| Some(text(name).to_string()).filter(|v| !v.is_empty());
        let flag = |name: &str| -> Result<Option<bool>, ValidationError> {
            let raw = text(name);
            if raw.is_empty() {
                return Ok(Some(false));
            }
            parse_flag(raw)
                .map(Some)
                .ok_or_else(|| ValidationError::new(name, format!("{raw:?} is not a yes/no value")))
        };
        Ok(Self {
            suburb: text("suburb").to_string(),
            property_type: text("property_type").to_string(),
            bedrooms: number("bedrooms")?,
            bathrooms: number("bathrooms")?,
            land_size: number("land_size")?,
            car_spaces: number("car_spaces")?,
            building_size: number("building_size")?,
            year_built: number("year_built")?,
            sale_year: number("sale_year")?,
            sale_month: number("sale_month")?,
            latitude: number("latitude")?,
            longitude: number("longitude")?,
            nearby_schools_count: number("nearby_schools_count")?,
            distance_to_cbd_km: number("distance_to_cbd_km")?,
            lot_frontage_m: number("lot_frontage_m")?,
            has_garage: flag("has_garage")?,
            has_aircon: flag("has_aircon")?,
            has_heating: flag("has_heating")?,
            postcode: optional("postcode"),
            agency: optional("agency"),
        })
    }

    /// Numeric input by feature name.
    pub fn numeric(&self, name: &str) -> Option<f64> {
        match name {
            "bedrooms" => self.bedrooms,
            "bathrooms" => self.bathrooms,
            "land_size" => self.land_size,
            "car_spaces" => self.car_spaces,
            "building_size" => self.building_size,
            "year_built" => self.year_built,
            "sale_year" => self.sale_year,
            "sale_month" => self.sale_month,
            "latitude" => self.latitude,
            "longitude" => self.longitude,
            "nearby_schools_count" => self.nearby_schools_count,
            "distance_to_cbd_km" => self.distance_to_cbd_km,
            "lot_frontage_m" => self.lot_frontage_m,
            _ => None,
        }
    }

    /// Categorical input by feature name.
    pub fn categorical(&self, name: &str) -> Option<&str> {
        match name {
            "suburb" => Some(self.suburb.as_str()),
            "property_type" => Some(self.property_type.as_str()),
            "postcode" => self.postcode.as_deref(),
            "agency" => self.agency.as_deref(),
            "has_garage" | "has_aircon" | "has_heating" => {
                self.flag(name).map(|on| if on { "1" } else { "0" })
            }
            _ => None,
        }
    }

    /// Amenity flag by feature name.
    pub fn flag(&self, name: &str) -> Option<bool> {
        match name {
            "has_garage" => self.has_garage,
            "has_aircon" => self.has_aircon,
            "has_heating" => self.has_heating,
            _ => None,
        }
    }

    /// Checks required fields, ranges and whole-number counts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for field in ["suburb", "property_type"] {
            if self.categorical(field).map_or(true, |v| v.trim().is_empty()) {
                return Err(ValidationError::new(field, "is required"));
            }
        }
        for bound in BOUNDS {
            let Some(value) = self.numeric(bound.field) else {
                if bound.required {
                    return Err(ValidationError::new(bound.field, "is required"));
                }
                continue;
            };
            if !value.is_finite() {
                return Err(ValidationError::new(bound.field, "must be a finite number"));
            }
            if value < bound.min || value > bound.max {
                return Err(ValidationError::new(
                    bound.field,
                    format!("must be between {} and {}, got {value}", bound.min, bound.max),
                ));
            }
            if bound.whole && value.fract() != 0.0 {
                return Err(ValidationError::new(
                    bound.field,
                    format!("must be a whole number, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

/// A scored request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted sale price in dollars.
    pub predicted_price: f64,
    /// Model that produced it.
    pub model: String,
}

/// Immutable scoring service around one artifact.
#[derive(Debug)]
pub struct Predictor {
    artifact: PipelineArtifact,
}

impl Predictor {
    /// Wraps an already-loaded artifact.
    pub fn new(artifact: PipelineArtifact) -> Self {
        Self { artifact }
    }

    /// Loads and checks the artifact at `path`.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        PipelineArtifact::load(path).map(Self::new)
    }

    /// Underlying artifact.
    pub fn artifact(&self) -> &PipelineArtifact {
        &self.artifact
    }

    /// Aligns a request with the artifact's feature layout.
    pub fn feature_row(&self, request: &PredictRequest) -> FeatureRow {
        let schema = self.artifact.schema();
        FeatureRow {
            numeric: schema.numeric.iter().map(|name| request.numeric(name)).collect(),
            categorical: schema
                .categorical
                .iter()
                .map(|name| {
                    request
                        .categorical(name)
                        .and_then(|value| normalize_feature_category(name, value))
                })
                .collect(),
        }
    }

    /// Validates then scores one request.
    pub fn predict(&self, request: &PredictRequest) -> Result<Prediction, PredictError> {
        request.validate()?;
        let row = self.feature_row(request);
        let predicted_price = self
            .artifact
            .predict(std::slice::from_ref(&row))?
            .first()
            .copied()
            .filter(|price| price.is_finite())
            .ok_or_else(|| FitError::NonFinite(self.artifact.model_name.clone()))?;
        Ok(Prediction {
            predicted_price,
            model: self.artifact.model_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PredictRequest {
        PredictRequest {
            suburb: "Essendon".into(),
            property_type: "house".into(),
            bedrooms: Some(3.0),
            bathrooms: Some(2.0),
            land_size: Some(450.0),
            ..PredictRequest::default()
        }
    }

    #[test]
    fn accepts_minimal_request() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn rejects_negative_bedrooms() {
        let request = PredictRequest {
            bedrooms: Some(-1.0),
            ..valid()
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err.field, "bedrooms");
    }

    #[test]
    fn rejects_fractional_counts_and_bad_months() {
        let half_bath = PredictRequest {
            bathrooms: Some(1.5),
            ..valid()
        };
        assert_eq!(half_bath.validate().unwrap_err().field, "bathrooms");
        let month = PredictRequest {
            sale_month: Some(13.0),
            ..valid()
        };
        assert_eq!(month.validate().unwrap_err().field, "sale_month");
    }

    #[test]
    fn requires_suburb_and_land_size() {
        let no_suburb = PredictRequest {
            suburb: "  ".into(),
            ..valid()
        };
        assert_eq!(no_suburb.validate().unwrap_err().field, "suburb");
        let no_land = PredictRequest {
            land_size: None,
            ..valid()
        };
        assert_eq!(no_land.validate().unwrap_err().field, "land_size");
    }

    #[test]
    fn parses_form_fields() {
        let form: HashMap<String, String> = [
            ("suburb", "Essendon"),
            ("property_type", "House"),
            ("bedrooms", "3"),
            ("bathrooms", " 2 "),
            ("land_size", "450"),
            ("car_spaces", ""),
            ("postcode", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let request = PredictRequest::from_form(&form).unwrap();
        assert_eq!(request.bathrooms, Some(2.0));
        assert_eq!(request.car_spaces, None);
        assert_eq!(request.postcode, None);

        assert_eq!(request.has_garage, Some(false));

        let mut bad = form.clone();
        bad.insert("bedrooms".into(), "three".into());
        assert_eq!(PredictRequest::from_form(&bad).unwrap_err().field, "bedrooms");
    }

    #[test]
    fn reads_location_and_amenity_fields() {
        let form: HashMap<String, String> = [
            ("suburb", "Essendon"),
            ("property_type", "House"),
            ("bedrooms", "3"),
            ("bathrooms", "2"),
            ("land_size", "450"),
            ("latitude", "-37.75"),
            ("distance_to_cbd_km", "9.5"),
            ("has_aircon", "on"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let request = PredictRequest::from_form(&form).unwrap();
        assert_eq!(request.numeric("latitude"), Some(-37.75));
        assert_eq!(request.numeric("distance_to_cbd_km"), Some(9.5));
        assert_eq!(request.categorical("has_aircon"), Some("1"));
        assert_eq!(request.categorical("has_heating"), Some("0"));
        assert_eq!(request.validate(), Ok(()));

        let off_map = PredictRequest {
            longitude: Some(250.0),
            ..request.clone()
        };
        assert_eq!(off_map.validate().unwrap_err().field, "longitude");
        let schools = PredictRequest {
            nearby_schools_count: Some(2.5),
            ..request
        };
        assert_eq!(schools.validate().unwrap_err().field, "nearby_schools_count");
    }
}
