use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::auth::{self, AuthUser};
use crate::error::ApiError;
use crate::models::{MaterialType, Ngo, Profile, ProfileChanges};

#[derive(Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub message: String,
    pub expires_in: i64,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub wallet_address: String,
    /// Base58 ed25519 signature over `message`.
    pub signature: String,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub profile: Profile,
}

/// Message for the wallet to sign, stamped with the current time.
pub async fn challenge(State(state): State<AppState>) -> Json<ChallengeResponse> {
    Json(ChallengeResponse {
        message: auth::challenge_message(Utc::now().timestamp()),
        expires_in: state.config.login_window_secs,
    })
}

/// Exchanges a signed challenge for a JWT, creating the profile on first login.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let now = Utc::now().timestamp();
    auth::check_challenge(&req.message, now, state.config.login_window_secs)?;
    let wallet = auth::verify_wallet_signature(&req.wallet_address, &req.signature, &req.message)
        .map_err(|e| {
            log::warn!("Login refused for {}: {}", req.wallet_address, e);
            ApiError::from(e)
        })?
        .to_string();

    let profile = state.db(move |s| s.profile_for_wallet(&wallet)).await?;
    let token = auth::create_token(
        &profile,
        &state.config.jwt_secret,
        state.config.token_ttl_hours,
        now,
    )
    .map_err(ApiError::internal)?;
    log::info!("Wallet {} logged in as {}", profile.wallet_address, profile.id);
    Ok(Json(LoginResponse { token, profile }))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Profile>, ApiError> {
    let profile = state.db(move |s| s.profile(user.id)).await?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(changes): Json<ProfileChanges>,
) -> Result<Json<Profile>, ApiError> {
    if changes.display_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::BadRequest("display_name cannot be blank".into()));
    }
    let profile = state
        .db(move |s| s.update_profile(user.id, &changes))
        .await?;
    log::info!("Updated profile {}", profile.id);
    Ok(Json(profile))
}

pub async fn material_types(
    State(state): State<AppState>,
) -> Result<Json<Vec<MaterialType>>, ApiError> {
    Ok(Json(state.db(|s| s.material_types()).await?))
}

pub async fn ngos(State(state): State<AppState>) -> Result<Json<Vec<Ngo>>, ApiError> {
    Ok(Json(state.db(|s| s.ngos()).await?))
}
