use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

mod status;

pub use status::{
    ListingStatus, NegotiationAction, NegotiationStatus, Party, RequestStatus, Role,
    TransitionError, Unit, UnknownVariant,
};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::profiles)]
pub struct Profile {
    pub id: Uuid,
    pub wallet_address: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[diesel(table_name = crate::schema::profiles)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = crate::schema::material_types)]
pub struct MaterialType {
    pub id: i32,
    pub name: String,
    pub category: String,
    /// Per kilogram, minor currency units.
    pub base_price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = crate::schema::ngos)]
pub struct Ngo {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = crate::schema::scrap_listings)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub material_type_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub quantity: f64,
    pub unit: Unit,
    /// Asking price for the whole lot, minor currency units.
    pub price: i64,
    pub status: ListingStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub image_url: Option<String>,
    pub is_donation: bool,
    pub ngo_id: Option<i32>,
    pub buyer_id: Option<Uuid>,
    pub agreed_price: Option<i64>,
    pub reward_signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_columns(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::scrap_listings)]
pub struct NewListing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub material_type_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub quantity: f64,
    pub unit: Unit,
    pub price: i64,
    pub status: ListingStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub image_url: Option<String>,
    pub is_donation: bool,
    pub ngo_id: Option<i32>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::scrap_listings)]
pub struct ListingChanges {
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

impl ListingChanges {
    /// Applies the changes to an in-memory copy.
    pub fn apply_to(&self, listing: &mut Listing) {
        if let Some(v) = self.material_type_id {
            listing.material_type_id = v;
        }
        if let Some(v) = &self.title {
            listing.title = v.clone();
        }
        if let Some(v) = &self.description {
            listing.description = Some(v.clone());
        }
        if let Some(v) = self.quantity {
            listing.quantity = v;
        }
        if let Some(v) = self.unit {
            listing.unit = v;
        }
        if let Some(v) = self.price {
            listing.price = v;
        }
        if let Some(v) = self.latitude {
            listing.latitude = Some(v);
        }
        if let Some(v) = self.longitude {
            listing.longitude = Some(v);
        }
        if let Some(v) = &self.address {
            listing.address = Some(v.clone());
        }
        if let Some(v) = &self.image_url {
            listing.image_url = Some(v.clone());
        }
    }
}

/// Search parameters for listing queries.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub status: Option<ListingStatus>,
    pub material_type_id: Option<i32>,
    pub is_donation: Option<bool>,
    pub seller_id: Option<Uuid>,
    pub near: Option<(GeoPoint, f64)>,
    pub include_deleted: bool,
}

impl ListingFilter {
    /// Column-level predicates; `near` is checked separately.
    pub fn matches(&self, listing: &Listing) -> bool {
        if !self.include_deleted && listing.status == ListingStatus::Deleted {
            return false;
        }
        self.status.map_or(true, |s| listing.status == s)
            && self.material_type_id.map_or(true, |m| listing.material_type_id == m)
            && self.is_donation.map_or(true, |d| listing.is_donation == d)
            && self.seller_id.map_or(true, |s| listing.seller_id == s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = crate::schema::negotiations)]
pub struct Negotiation {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub dealer_id: Uuid,
    pub seller_id: Uuid,
    pub initial_offer: i64,
    pub counter_offer: Option<i64>,
    pub status: NegotiationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Negotiation {
    pub fn party(&self, user_id: Uuid) -> Option<Party> {
        if user_id == self.seller_id {
            Some(Party::Seller)
        } else if user_id == self.dealer_id {
            Some(Party::Dealer)
        } else {
            None
        }
    }

    /// The amount an acceptance settles on: the counter if one stands.
    pub fn agreed_amount(&self) -> i64 {
        match self.status {
            NegotiationStatus::Countered => self.counter_offer.unwrap_or(self.initial_offer),
            _ => self.initial_offer,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::negotiations)]
pub struct NewNegotiation {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub dealer_id: Uuid,
    pub seller_id: Uuid,
    pub initial_offer: i64,
    pub status: NegotiationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = crate::schema::listing_requests)]
pub struct ListingRequest {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub message: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::listing_requests)]
pub struct NewListingRequest {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub message: Option<String>,
    pub status: RequestStatus,
}
