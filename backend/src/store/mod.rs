//! Persistence seam. Handlers talk to `MarketStore`; the diesel/Postgres
//! implementation backs production and `MemoryStore` backs local runs
//! without a database and the test suite.
//!
//! Composite updates (accepting a negotiation, approving a request, status
//! changes, recording a reward) are single calls so each implementation can
//! make them atomic. Status-changing calls take the status the caller saw
//! and fail with `StoreError::Conflict` if the row moved on meanwhile.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Listing, ListingChanges, ListingFilter, ListingRequest, ListingStatus, MaterialType,
    Negotiation, NegotiationStatus, NewListing, NewListingRequest, NewNegotiation, Ngo, Profile,
    ProfileChanges, RequestStatus,
};

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("storage backend unavailable: {0}")]
    Backend(String),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub trait MarketStore: Send + Sync {
    /// Returns the profile owning `wallet`, creating it on first login.
    fn profile_for_wallet(&self, wallet: &str) -> StoreResult<Profile>;
    fn profile(&self, id: Uuid) -> StoreResult<Profile>;
    fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> StoreResult<Profile>;

    fn material_types(&self) -> StoreResult<Vec<MaterialType>>;
    fn ngos(&self) -> StoreResult<Vec<Ngo>>;

    fn insert_listing(&self, listing: &NewListing) -> StoreResult<Listing>;
    fn listing(&self, id: Uuid) -> StoreResult<Listing>;
    /// Newest first, or nearest first when the filter has a `near` clause.
    fn listings(&self, filter: &ListingFilter) -> StoreResult<Vec<Listing>>;
    /// Edits an `active` listing.
    fn update_listing(&self, id: Uuid, changes: &ListingChanges) -> StoreResult<Listing>;
    /// Moving back to `active` clears the agreed buyer and price; moving to
    /// `sold` or `deleted` closes every open negotiation and pending request.
    fn transition_listing(
        &self,
        id: Uuid,
        from: ListingStatus,
        to: ListingStatus,
    ) -> StoreResult<Listing>;
    /// Stores the claim signature on a sold listing, once.
    fn record_reward(&self, id: Uuid, signature: &str) -> StoreResult<Listing>;

    /// Fails with a conflict if the listing is no longer active or the
    /// dealer already has an open negotiation on it.
    fn insert_negotiation(&self, negotiation: &NewNegotiation) -> StoreResult<Negotiation>;
    fn negotiation(&self, id: Uuid) -> StoreResult<Negotiation>;
    fn negotiations_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Negotiation>>;
    /// Threads where the user is either the dealer or the seller.
    fn negotiations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Negotiation>>;
    /// Counter (with `counter_offer`) or reject.
    fn set_negotiation_status(
        &self,
        id: Uuid,
        from: NegotiationStatus,
        to: NegotiationStatus,
        counter_offer: Option<i64>,
    ) -> StoreResult<Negotiation>;
    /// Accepts, puts the listing into `pending_pickup` for the dealer at
    /// `agreed_price`, and closes every other open thread and request on it.
    fn accept_negotiation(
        &self,
        id: Uuid,
        from: NegotiationStatus,
        agreed_price: i64,
    ) -> StoreResult<(Negotiation, Listing)>;

    fn insert_request(&self, request: &NewListingRequest) -> StoreResult<ListingRequest>;
    fn request(&self, id: Uuid) -> StoreResult<ListingRequest>;
    fn requests_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<ListingRequest>>;
    fn requests_for_buyer(&self, buyer_id: Uuid) -> StoreResult<Vec<ListingRequest>>;
    /// Declines or cancels a pending request.
    fn close_request(&self, id: Uuid, to: RequestStatus) -> StoreResult<ListingRequest>;
    /// Approves at the asking price; same side effects as an acceptance.
    fn approve_request(&self, id: Uuid) -> StoreResult<(ListingRequest, Listing)>;
}

/// Orders by distance to the `near` point and drops rows outside the radius.
pub(crate) fn sort_by_distance(listings: Vec<Listing>, filter: &ListingFilter) -> Vec<Listing> {
    let Some((center, radius_km)) = filter.near else {
        return listings;
    };
    let mut scored: Vec<(f64, Listing)> = listings
        .into_iter()
        .filter_map(|listing| {
            let distance = listing.location()?.distance_km(&center);
            (distance <= radius_km).then_some((distance, listing))
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().map(|(_, listing)| listing).collect()
}

pub(crate) fn default_material_types() -> Vec<MaterialType> {
    [
        (1, "Copper", "metal", 72000),
        (2, "Aluminium", "metal", 18000),
        (3, "Brass", "metal", 45000),
        (4, "Iron", "metal", 3500),
        (5, "Steel", "metal", 4000),
        (6, "PET Plastic", "plastic", 2000),
        (7, "HDPE Plastic", "plastic", 2500),
        (8, "Cardboard", "paper", 1200),
        (9, "Newspaper", "paper", 1500),
        (10, "E-Waste", "electronics", 8000),
        (11, "Glass", "glass", 300),
    ]
    .into_iter()
    .map(|(id, name, category, base_price)| MaterialType {
        id,
        name: name.to_string(),
        category: category.to_string(),
        base_price,
    })
    .collect()
}

pub(crate) fn default_ngos() -> Vec<Ngo> {
    [
        (1, "Green Earth Foundation", "Community recycling drives and waste-picker support", "contact@greenearth.org", "Bengaluru"),
        (2, "Recycle for Good", "Turns donated scrap into school supplies", "hello@recycleforgood.org", "Pune"),
        (3, "Clean Cities Trust", "Neighbourhood collection points for household scrap", "info@cleancities.org", "Delhi"),
    ]
    .into_iter()
    .map(|(id, name, description, email, city)| Ngo {
        id,
        name: name.to_string(),
        description: Some(description.to_string()),
        contact_email: Some(email.to_string()),
        city: Some(city.to_string()),
    })
    .collect()
}
