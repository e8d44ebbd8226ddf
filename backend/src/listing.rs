use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::geo::GeoPoint;
use crate::models::{Listing, ListingChanges, ListingFilter, ListingStatus, NewListing, Unit};

const DEFAULT_RADIUS_KM: f64 = 10.0;

#[derive(Deserialize)]
pub struct CreateListingRequest {
    pub material_type_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub quantity: f64,
    pub unit: Unit,
    #[serde(default)]
    pub price: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_donation: bool,
    pub ngo_id: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdateListingRequest {
    pub material_type_id: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<Unit>,
    pub price: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub status: Option<ListingStatus>,
    pub material_type_id: Option<i32>,
    pub donation: Option<bool>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct StatusChangeRequest {
    pub status: ListingStatus,
}

#[derive(Serialize, Deserialize)]
pub struct CoordinatesResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted: String,
    pub wkt: String,
}

/// Both coordinates or neither; a lone one is a client error.
fn parse_location(lat: Option<f64>, lng: Option<f64>) -> Result<Option<GeoPoint>, ApiError> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Ok(Some(GeoPoint::new(lat, lng)?)),
        (None, None) => Ok(None),
        _ => Err(ApiError::BadRequest(
            "latitude and longitude must be given together".into(),
        )),
    }
}

fn check_quantity(quantity: f64) -> Result<(), ApiError> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(ApiError::BadRequest("quantity must be greater than zero".into()));
    }
    Ok(())
}

fn check_title(title: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::BadRequest("title cannot be blank".into()));
    }
    Ok(())
}

/// Donations are free and go to an NGO; everything else has a price.
fn check_price(is_donation: bool, price: i64) -> Result<(), ApiError> {
    match (is_donation, price) {
        (true, 0) => Ok(()),
        (true, _) => Err(ApiError::BadRequest("donation listings have no price".into())),
        (false, p) if p > 0 => Ok(()),
        (false, _) => Err(ApiError::BadRequest("price must be greater than zero".into())),
    }
}

async fn ensure_material(state: &AppState, material_type_id: i32) -> Result<(), ApiError> {
    let materials = state.db(|s| s.material_types()).await?;
    if !materials.iter().any(|m| m.id == material_type_id) {
        return Err(ApiError::BadRequest(format!(
            "unknown material type {material_type_id}"
        )));
    }
    Ok(())
}

/// Loads a listing the caller owns.
pub(crate) async fn owned_listing(
    state: &AppState,
    user: &AuthUser,
    listing_id: Uuid,
) -> Result<Listing, ApiError> {
    let listing = state.db(move |s| s.listing(listing_id)).await?;
    if listing.seller_id != user.id {
        log::warn!("User {} tried to modify listing {}", user.id, listing_id);
        return Err(ApiError::Forbidden("only the seller can do this".into()));
    }
    Ok(listing)
}

/// Loads a listing visible to the public: anything but deleted.
pub(crate) async fn visible_listing(state: &AppState, listing_id: Uuid) -> Result<Listing, ApiError> {
    let listing = state.db(move |s| s.listing(listing_id)).await?;
    if listing.status == ListingStatus::Deleted {
        return Err(ApiError::NotFound("listing not found".into()));
    }
    Ok(listing)
}

/// Creates a new listing owned by the caller.
pub async fn create_listing(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateListingRequest>,
) -> Result<Json<Listing>, ApiError> {
    check_title(&req.title)?;
    check_quantity(req.quantity)?;
    check_price(req.is_donation, req.price)?;
    let location = parse_location(req.latitude, req.longitude)?;
    ensure_material(&state, req.material_type_id).await?;

    match (req.is_donation, req.ngo_id) {
        (true, Some(ngo_id)) => {
            let ngos = state.db(|s| s.ngos()).await?;
            if !ngos.iter().any(|n| n.id == ngo_id) {
                return Err(ApiError::BadRequest(format!("unknown NGO {ngo_id}")));
            }
        }
        (true, None) => {
            return Err(ApiError::BadRequest("donation listings must name an NGO".into()))
        }
        (false, Some(_)) => {
            return Err(ApiError::BadRequest("only donation listings name an NGO".into()))
        }
        (false, None) => {}
    }

    let new_listing = NewListing {
        id: Uuid::new_v4(),
        seller_id: user.id,
        material_type_id: req.material_type_id,
        title: req.title.trim().to_string(),
        description: req.description,
        quantity: req.quantity,
        unit: req.unit,
        price: req.price,
        status: ListingStatus::Active,
        latitude: location.map(|p| p.lat),
        longitude: location.map(|p| p.lng),
        address: req.address,
        image_url: req.image_url,
        is_donation: req.is_donation,
        ngo_id: req.ngo_id,
    };
    let listing = state.db(move |s| s.insert_listing(&new_listing)).await?;
    log::info!("User {} listed {} ({})", user.id, listing.id, listing.title);
    Ok(Json(listing))
}

/// Public search; only active listings unless a status is asked for.
pub async fn search_listings(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Listing>>, ApiError> {
    let near = match parse_location(query.lat, query.lng)? {
        Some(center) => {
            let radius_km = query.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
            if !radius_km.is_finite() || radius_km <= 0.0 {
                return Err(ApiError::BadRequest("radius_km must be greater than zero".into()));
            }
            Some((center, radius_km))
        }
        None => None,
    };
    let filter = ListingFilter {
        status: Some(query.status.unwrap_or(ListingStatus::Active)),
        material_type_id: query.material_type_id,
        is_donation: query.donation,
        near,
        ..ListingFilter::default()
    };
    let listings = state.db(move |s| s.listings(&filter)).await?;
    log::debug!("Search returned {} listings", listings.len());
    Ok(Json(listings))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<Listing>, ApiError> {
    Ok(Json(visible_listing(&state, listing_id).await?))
}

/// Location of a listing as raw numbers, display text and EWKT.
pub async fn listing_coordinates(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<CoordinatesResponse>, ApiError> {
    let listing = visible_listing(&state, listing_id).await?;
    let point = listing
        .location()
        .ok_or_else(|| ApiError::NotFound("listing has no location".into()))?;
    Ok(Json(CoordinatesResponse {
        latitude: point.lat,
        longitude: point.lng,
        formatted: point.formatted(),
        wkt: point.to_wkt(),
    }))
}

/// The caller's own listings, deleted ones included.
pub async fn my_listings(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Listing>>, ApiError> {
    let filter = ListingFilter {
        seller_id: Some(user.id),
        include_deleted: true,
        ..ListingFilter::default()
    };
    Ok(Json(state.db(move |s| s.listings(&filter)).await?))
}

pub async fn update_listing(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
    Json(req): Json<UpdateListingRequest>,
) -> Result<Json<Listing>, ApiError> {
    let listing = owned_listing(&state, &user, listing_id).await?;
    if listing.status != ListingStatus::Active {
        return Err(ApiError::Conflict(format!(
            "listing is {} and can no longer be edited",
            listing.status
        )));
    }
    if let Some(title) = &req.title {
        check_title(title)?;
    }
    if let Some(quantity) = req.quantity {
        check_quantity(quantity)?;
    }
    if let Some(price) = req.price {
        check_price(listing.is_donation, price)?;
    }
    let location = parse_location(req.latitude, req.longitude)?;
    if let Some(material_type_id) = req.material_type_id {
        ensure_material(&state, material_type_id).await?;
    }

    let changes = ListingChanges {
        material_type_id: req.material_type_id,
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description,
        quantity: req.quantity,
        unit: req.unit,
        price: req.price,
        latitude: location.map(|p| p.lat),
        longitude: location.map(|p| p.lng),
        address: req.address,
        image_url: req.image_url,
    };
    let listing = state
        .db(move |s| s.update_listing(listing_id, &changes))
        .await?;
    log::info!("Listing {} edited by {}", listing.id, user.id);
    Ok(Json(listing))
}

/// The seller may make any permitted move; the agreed buyer may only
/// confirm a pickup as sold.
pub async fn change_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Json<Listing>, ApiError> {
    let listing = visible_listing(&state, listing_id).await?;
    let from = listing.status;
    let to = req.status;

    let is_seller = listing.seller_id == user.id;
    let is_buyer = listing.buyer_id == Some(user.id);
    if !is_seller && !is_buyer {
        log::warn!("User {} tried to move listing {} to {}", user.id, listing_id, to);
        return Err(ApiError::Forbidden("only the seller or agreed buyer can do this".into()));
    }
    from.check_transition(to)?;
    if !is_seller && !(from == ListingStatus::PendingPickup && to == ListingStatus::Sold) {
        return Err(ApiError::Forbidden("the buyer can only confirm a pickup as sold".into()));
    }

    let listing = state
        .db(move |s| s.transition_listing(listing_id, from, to))
        .await?;
    log::info!("Listing {} moved {} -> {} by {}", listing_id, from, to, user.id);
    Ok(Json(listing))
}

/// Soft delete.
pub async fn delete_listing(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(listing_id): Path<Uuid>,
) -> Result<Json<Listing>, ApiError> {
    let listing = owned_listing(&state, &user, listing_id).await?;
    let from = listing.status;
    from.check_transition(ListingStatus::Deleted)?;
    let listing = state
        .db(move |s| s.transition_listing(listing_id, from, ListingStatus::Deleted))
        .await?;
    log::info!("Listing {} deleted by {}", listing_id, user.id);
    Ok(Json(listing))
}
