// Material detection through a hosted object-detection model.
//
// The image goes to `{endpoint}/{model}?api_key=…` either as a base64 form
// body or by URL in the `image` query parameter. The model answers with
// bounding-box predictions; the most confident one above the threshold is
// matched against the material catalogue.

use axum::extract::State;
use axum::{Extension, Json};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::MaterialType;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("inference endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    #[serde(rename = "class")]
    pub class_name: String,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

pub enum ImageSource {
    Base64(String),
    Url(String),
}

pub struct MaterialDetector {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    min_confidence: f64,
}

impl MaterialDetector {
    pub fn new(endpoint: &str, model: &str, api_key: &str, min_confidence: f64) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.trim_matches('/').to_string(),
            api_key: api_key.to_string(),
            min_confidence,
        }
    }

    /// `None` unless an API key is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let api_key = config.roboflow_api_key.as_deref()?;
        Some(Self::new(
            &config.roboflow_endpoint,
            &config.roboflow_model,
            api_key,
            config.detection_min_confidence,
        ))
    }

    pub async fn detect(&self, source: &ImageSource) -> Result<Vec<Prediction>, DetectionError> {
        let url = format!("{}/{}", self.endpoint, self.model);
        let request = self
            .http
            .post(url)
            .query(&[("api_key", self.api_key.as_str())]);
        let request = match source {
            ImageSource::Base64(data) => request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(data.clone()),
            ImageSource::Url(image_url) => request.query(&[("image", image_url.as_str())]),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: InferenceResponse = response.json().await?;
        log::debug!("Inference returned {} predictions", parsed.predictions.len());
        Ok(parsed.predictions)
    }

    pub fn best<'a>(&self, predictions: &'a [Prediction]) -> Option<&'a Prediction> {
        best_prediction(predictions, self.min_confidence)
    }
}

pub fn best_prediction(predictions: &[Prediction], min_confidence: f64) -> Option<&Prediction> {
    predictions
        .iter()
        .filter(|p| p.confidence >= min_confidence)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

fn normalize(label: &str) -> String {
    label
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact name, then a name contained in the label (or the reverse), then
/// the category.
pub fn match_material<'a>(label: &str, materials: &'a [MaterialType]) -> Option<&'a MaterialType> {
    let label = normalize(label);
    if label.is_empty() {
        return None;
    }
    materials
        .iter()
        .find(|m| normalize(&m.name) == label)
        .or_else(|| {
            materials.iter().find(|m| {
                let name = normalize(&m.name);
                label.contains(&name) || name.contains(&label)
            })
        })
        .or_else(|| materials.iter().find(|m| normalize(&m.category) == label))
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub image_base64: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub predictions: Vec<Prediction>,
    pub best: Option<Prediction>,
    pub material: Option<MaterialType>,
}

pub async fn detect_material(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    let source = match (req.image_base64, req.image_url) {
        (Some(data), None) => ImageSource::Base64(strip_data_url(&data).to_string()),
        (None, Some(url)) => ImageSource::Url(url),
        _ => {
            return Err(ApiError::BadRequest(
                "provide exactly one of image_base64 or image_url".into(),
            ))
        }
    };
    let detector = state
        .detector
        .clone()
        .ok_or_else(|| ApiError::Unavailable("material detection is not configured".into()))?;

    log::info!("Running material detection for {}", user.id);
    let predictions = detector.detect(&source).await.map_err(|e| {
        log::error!("Material detection failed: {}", e);
        ApiError::Upstream("material detection failed".into())
    })?;

    let best = detector.best(&predictions).cloned();
    let material = match &best {
        Some(prediction) => {
            let materials = state.db(|s| s.material_types()).await?;
            match_material(&prediction.class_name, &materials).cloned()
        }
        None => None,
    };

    Ok(Json(DetectResponse {
        predictions,
        best,
        material,
    }))
}

/// Drops a `data:image/…;base64,` prefix if the client sent a data URL.
pub fn strip_data_url(payload: &str) -> &str {
    match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    }
}
