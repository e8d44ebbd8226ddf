use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::listing::visible_listing;
use crate::models::{Listing, ListingRequest, ListingStatus, NewListingRequest, RequestStatus};

#[derive(Deserialize)]
pub struct CreateRequestBody {
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ApproveResponse {
    pub request: ListingRequest,
    pub listing: Listing,
}

/// Asks the seller for the listing at its asking price.
pub async fn create_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<ListingRequest>, ApiError> {
    let listing = visible_listing(&state, listing_id).await?;
    if listing.seller_id == user.id {
        return Err(ApiError::BadRequest("cannot request your own listing".into()));
    }
    if listing.is_donation {
        return Err(ApiError::BadRequest("donation listings cannot be requested".into()));
    }
    if listing.status != ListingStatus::Active {
        return Err(ApiError::Conflict("listing is no longer active".into()));
    }

    let new_request = NewListingRequest {
        id: Uuid::new_v4(),
        listing_id,
        buyer_id: user.id,
        seller_id: listing.seller_id,
        message: body.message.filter(|m| !m.trim().is_empty()),
        status: RequestStatus::Pending,
    };
    let request = state.db(move |s| s.insert_request(&new_request)).await?;
    log::info!("User {} requested listing {}", user.id, listing_id);
    Ok(Json(request))
}

/// The seller sees every request on the listing; a buyer only their own.
pub async fn listing_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<Vec<ListingRequest>>, ApiError> {
    let listing = state.db(move |s| s.listing(listing_id)).await?;
    let mut requests = state.db(move |s| s.requests_for_listing(listing_id)).await?;
    if listing.seller_id != user.id {
        requests.retain(|r| r.buyer_id == user.id);
    }
    Ok(Json(requests))
}

pub async fn my_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ListingRequest>>, ApiError> {
    Ok(Json(state.db(move |s| s.requests_for_buyer(user.id)).await?))
}

pub async fn approve_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<ApproveResponse>, ApiError> {
    let request = state.db(move |s| s.request(request_id)).await?;
    if request.seller_id != user.id {
        return Err(ApiError::Forbidden("only the seller can approve a request".into()));
    }
    request.status.check_transition(RequestStatus::Approved)?;
    let (request, listing) = state.db(move |s| s.approve_request(request_id)).await?;
    log::info!(
        "Request {} approved; listing {} awaits pickup by {}",
        request_id,
        listing.id,
        request.buyer_id
    );
    Ok(Json(ApproveResponse { request, listing }))
}

pub async fn decline_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<ListingRequest>, ApiError> {
    let request = state.db(move |s| s.request(request_id)).await?;
    if request.seller_id != user.id {
        return Err(ApiError::Forbidden("only the seller can decline a request".into()));
    }
    request.status.check_transition(RequestStatus::Declined)?;
    let request = state
        .db(move |s| s.close_request(request_id, RequestStatus::Declined))
        .await?;
    log::info!("Request {} declined", request_id);
    Ok(Json(request))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<ListingRequest>, ApiError> {
    let request = state.db(move |s| s.request(request_id)).await?;
    if request.buyer_id != user.id {
        return Err(ApiError::Forbidden("only the buyer can cancel a request".into()));
    }
    request.status.check_transition(RequestStatus::Cancelled)?;
    let request = state
        .db(move |s| s.close_request(request_id, RequestStatus::Cancelled))
        .await?;
    log::info!("Request {} cancelled", request_id);
    Ok(Json(request))
}
