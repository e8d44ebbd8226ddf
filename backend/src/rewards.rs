use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Listing, ListingStatus};
use crate::solana::{RewardClient, TransactionResponse};

#[derive(Deserialize)]
pub struct SubmitRewardRequest {
    pub listing_id: Uuid,
    /// Base58 bincode of the wallet-signed transaction.
    pub transaction: String,
}

#[derive(Serialize, Deserialize)]
pub struct SubmitRewardResponse {
    pub signature: String,
    pub listing: Listing,
}

/// Loads a listing the caller may claim a reward for.
async fn claimable(
    state: &AppState,
    user: &AuthUser,
    listing_id: Uuid,
) -> Result<(Arc<RewardClient>, Listing, Pubkey), ApiError> {
    let rewards = state
        .rewards
        .clone()
        .ok_or_else(|| ApiError::Unavailable("rewards are not configured".into()))?;
    let listing = state.db(move |s| s.listing(listing_id)).await?;
    if listing.seller_id != user.id {
        return Err(ApiError::Forbidden("only the seller can claim this reward".into()));
    }
    if listing.status != ListingStatus::Sold {
        return Err(ApiError::Conflict("rewards are claimable once the listing is sold".into()));
    }
    if listing.reward_signature.is_some() {
        return Err(ApiError::Conflict("reward already claimed".into()));
    }
    let wallet = Pubkey::from_str(&user.wallet)
        .map_err(|_| ApiError::BadRequest("profile wallet is not a valid address".into()))?;
    Ok((rewards, listing, wallet))
}

/// Builds the unsigned claim transaction for the seller's wallet.
pub async fn prepare_reward(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let (rewards, listing, wallet) = claimable(&state, &user, listing_id).await?;
    let response = rewards.prepare_claim(&wallet, &listing).await?;
    Ok(Json(response))
}

/// Sends the signed claim and records its signature on the listing.
pub async fn submit_reward(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SubmitRewardRequest>,
) -> Result<Json<SubmitRewardResponse>, ApiError> {
    let (rewards, listing, wallet) = claimable(&state, &user, req.listing_id).await?;
    let signature = rewards
        .submit(&req.transaction, &wallet, &listing)
        .await
        .map_err(|e| {
            log::warn!("Reward claim for listing {} refused: {}", listing.id, e);
            ApiError::from(e)
        })?
        .to_string();

    let recorded = signature.clone();
    let listing = state
        .db(move |s| s.record_reward(listing.id, &recorded))
        .await?;
    log::info!("Reward for listing {} claimed in {}", listing.id, signature);
    Ok(Json(SubmitRewardResponse { signature, listing }))
}
