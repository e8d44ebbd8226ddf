use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::listing::visible_listing;
use crate::models::{
    Listing, ListingStatus, Negotiation, NegotiationAction, NegotiationStatus, NewNegotiation,
    Party,
};

#[derive(Deserialize)]
pub struct CreateNegotiationRequest {
    pub offer_amount: i64,
}

#[derive(Deserialize)]
pub struct CounterOfferRequest {
    pub counter_offer: i64,
}

#[derive(Serialize, Deserialize)]
pub struct AcceptResponse {
    pub negotiation: Negotiation,
    pub listing: Listing,
}

fn check_amount(amount: i64) -> Result<(), ApiError> {
    if amount <= 0 {
        return Err(ApiError::BadRequest("offer must be greater than zero".into()));
    }
    Ok(())
}

/// Loads a negotiation and the caller's side of it.
async fn negotiation_for(
    state: &AppState,
    user: &AuthUser,
    negotiation_id: Uuid,
) -> Result<(Negotiation, Party), ApiError> {
    let negotiation = state.db(move |s| s.negotiation(negotiation_id)).await?;
    let party = negotiation.party(user.id).ok_or_else(|| {
        log::warn!("User {} is not part of negotiation {}", user.id, negotiation_id);
        ApiError::Forbidden("you are not part of this negotiation".into())
    })?;
    Ok((negotiation, party))
}

/// Opens a negotiation on someone else's active listing.
pub async fn create_negotiation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
    Json(req): Json<CreateNegotiationRequest>,
) -> Result<Json<Negotiation>, ApiError> {
    check_amount(req.offer_amount)?;
    let listing = visible_listing(&state, listing_id).await?;
    if listing.seller_id == user.id {
        return Err(ApiError::BadRequest("cannot negotiate on your own listing".into()));
    }
    if listing.is_donation {
        return Err(ApiError::BadRequest("donation listings are not negotiable".into()));
    }
    if listing.status != ListingStatus::Active {
        return Err(ApiError::Conflict("listing is no longer active".into()));
    }

    let new_negotiation = NewNegotiation {
        id: Uuid::new_v4(),
        listing_id,
        dealer_id: user.id,
        seller_id: listing.seller_id,
        initial_offer: req.offer_amount,
        status: NegotiationStatus::Pending,
    };
    let negotiation = state
        .db(move |s| s.insert_negotiation(&new_negotiation))
        .await
        .map_err(|e| {
            log::warn!("Negotiation on {} by {} refused: {}", listing_id, user.id, e);
            e
        })?;
    log::info!(
        "Dealer {} offered {} on listing {}",
        user.id,
        negotiation.initial_offer,
        listing_id
    );
    Ok(Json(negotiation))
}

/// The seller sees every thread on the listing; a dealer only their own.
pub async fn listing_negotiations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<Vec<Negotiation>>, ApiError> {
    let listing = state.db(move |s| s.listing(listing_id)).await?;
    let mut negotiations = state
        .db(move |s| s.negotiations_for_listing(listing_id))
        .await?;
    if listing.seller_id != user.id {
        negotiations.retain(|n| n.dealer_id == user.id);
    }
    Ok(Json(negotiations))
}

pub async fn my_negotiations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Negotiation>>, ApiError> {
    Ok(Json(state.db(move |s| s.negotiations_for_user(user.id)).await?))
}

pub async fn counter_offer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(negotiation_id): Path<Uuid>,
    Json(req): Json<CounterOfferRequest>,
) -> Result<Json<Negotiation>, ApiError> {
    check_amount(req.counter_offer)?;
    let (negotiation, party) = negotiation_for(&state, &user, negotiation_id).await?;
    let from = negotiation.status;
    let to = from.apply(party, NegotiationAction::Counter)?;
    let amount = req.counter_offer;
    let negotiation = state
        .db(move |s| s.set_negotiation_status(negotiation_id, from, to, Some(amount)))
        .await?;
    log::info!("Seller countered negotiation {} with {}", negotiation_id, amount);
    Ok(Json(negotiation))
}

/// Settles on the standing amount and reserves the listing for the dealer.
pub async fn accept_offer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(negotiation_id): Path<Uuid>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let (negotiation, party) = negotiation_for(&state, &user, negotiation_id).await?;
    let from = negotiation.status;
    from.apply(party, NegotiationAction::Accept)?;
    let agreed_price = negotiation.agreed_amount();
    let (negotiation, listing) = state
        .db(move |s| s.accept_negotiation(negotiation_id, from, agreed_price))
        .await?;
    log::info!(
        "Negotiation {} accepted by the {} at {}; listing {} awaits pickup",
        negotiation_id,
        party,
        agreed_price,
        listing.id
    );
    Ok(Json(AcceptResponse {
        negotiation,
        listing,
    }))
}

pub async fn reject_offer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(negotiation_id): Path<Uuid>,
) -> Result<Json<Negotiation>, ApiError> {
    let (negotiation, party) = negotiation_for(&state, &user, negotiation_id).await?;
    let from = negotiation.status;
    let to = from.apply(party, NegotiationAction::Reject)?;
    let negotiation = state
        .db(move |s| s.set_negotiation_status(negotiation_id, from, to, None))
        .await?;
    log::info!("Negotiation {} rejected by the {}", negotiation_id, party);
    Ok(Json(negotiation))
}
