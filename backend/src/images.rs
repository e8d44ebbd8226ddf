// Listing photos, committed to a repository through the contents API and
// served from the returned download URL.

use axum::extract::State;
use axum::{Extension, Json};
use base64::{engine::general_purpose, Engine};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::config::AppConfig;
use crate::detection::strip_data_url;
use crate::error::ApiError;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Request body cap for routes carrying a base64 image: the encoded
/// maximum plus room for a data URL prefix and the JSON envelope.
pub const MAX_IMAGE_BODY_BYTES: usize = MAX_IMAGE_BYTES / 3 * 4 + 64 * 1024;

const GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum ImageHostError {
    #[error("image is not valid base64")]
    Decode,
    #[error("image is larger than 5 MiB")]
    TooLarge,
    #[error("only PNG, JPEG and WebP images are accepted")]
    Unsupported,
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image host returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("image host response carried no download URL")]
    MissingUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Webp,
}

impl ImageKind {
    /// Detects the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageKind::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageKind::Jpeg)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageKind::Webp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
            ImageKind::Webp => "webp",
        }
    }
}

/// Decodes a base64 (or data URL) payload and checks size and format.
pub fn decode_image(payload: &str) -> Result<(Vec<u8>, ImageKind), ImageHostError> {
    let encoded = strip_data_url(payload.trim());
    // base64 inflates by 4/3; refuse obviously oversized bodies before decoding
    if encoded.len() > MAX_IMAGE_BYTES / 3 * 4 + 4 {
        return Err(ImageHostError::TooLarge);
    }
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ImageHostError::Decode)?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ImageHostError::TooLarge);
    }
    let kind = ImageKind::sniff(&bytes).ok_or(ImageHostError::Unsupported)?;
    Ok((bytes, kind))
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: Option<ContentsEntry>,
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    download_url: Option<String>,
}

pub struct ImageHost {
    http: reqwest::Client,
    token: String,
    repo: String,
    branch: String,
}

impl ImageHost {
    pub fn new(token: &str, repo: &str, branch: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            repo: repo.trim_matches('/').to_string(),
            branch: branch.to_string(),
        }
    }

    /// `None` unless both a token and an `owner/repo` are configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let token = config.github_token.as_deref()?;
        let repo = config.github_repo.as_deref()?;
        Some(Self::new(token, repo, &config.github_branch))
    }

    pub fn object_path(owner: Uuid, kind: ImageKind) -> String {
        format!("listings/{}/{}.{}", owner, Uuid::new_v4(), kind.extension())
    }

    /// Commits `bytes` at `path` and returns the public download URL.
    pub async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, ImageHostError> {
        let url = format!("{GITHUB_API}/repos/{}/contents/{}", self.repo, path);
        let body = json!({
            "message": format!("Add listing image {path}"),
            "content": general_purpose::STANDARD.encode(bytes),
            "branch": self.branch,
        });

        let response = self
            .http
            .put(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "scrapx-backend")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImageHostError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ContentsResponse = response.json().await?;
        parsed
            .content
            .and_then(|c| c.download_url)
            .ok_or(ImageHostError::MissingUrl)
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadImageRequest {
    pub image_base64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadImageResponse {
    pub url: String,
    pub path: String,
}

pub async fn upload_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UploadImageRequest>,
) -> Result<Json<UploadImageResponse>, ApiError> {
    let (bytes, kind) =
        decode_image(&req.image_base64).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let host = state
        .images
        .clone()
        .ok_or_else(|| ApiError::Unavailable("image hosting is not configured".into()))?;

    let path = ImageHost::object_path(user.id, kind);
    let url = host.upload(&path, &bytes).await.map_err(|e| {
        log::error!("Image upload to {} failed: {}", path, e);
        ApiError::Upstream("image upload failed".into())
    })?;
    log::info!("Stored image {} ({} bytes) for {}", path, bytes.len(), user.id);
    Ok(Json(UploadImageResponse { url, path }))
}
