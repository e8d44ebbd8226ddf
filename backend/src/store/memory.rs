use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use super::{
    default_material_types, default_ngos, sort_by_distance, MarketStore, StoreError, StoreResult,
};
use crate::models::{
    Listing, ListingChanges, ListingFilter, ListingRequest, ListingStatus, MaterialType,
    Negotiation, NegotiationStatus, NewListing, NewListingRequest, NewNegotiation, Ngo, Profile,
    ProfileChanges, RequestStatus, Role,
};

#[derive(Default)]
struct Tables {
    profiles: Vec<Profile>,
    materials: Vec<MaterialType>,
    ngos: Vec<Ngo>,
    listings: Vec<Listing>,
    negotiations: Vec<Negotiation>,
    requests: Vec<ListingRequest>,
}

impl Tables {
    fn listing_mut(&mut self, id: Uuid) -> StoreResult<&mut Listing> {
        self.listings
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(StoreError::NotFound("listing"))
    }

    fn negotiation_mut(&mut self, id: Uuid) -> StoreResult<&mut Negotiation> {
        self.negotiations
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(StoreError::NotFound("negotiation"))
    }

    fn request_mut(&mut self, id: Uuid) -> StoreResult<&mut ListingRequest> {
        self.requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound("request"))
    }

    /// Hands an active listing to `buyer_id`.
    fn reserve_listing(&mut self, listing_id: Uuid, buyer_id: Uuid, price: i64) -> StoreResult<Listing> {
        let listing = self.listing_mut(listing_id)?;
        if listing.status != ListingStatus::Active {
            return Err(StoreError::Conflict("listing is no longer active".into()));
        }
        listing.status = ListingStatus::PendingPickup;
        listing.buyer_id = Some(buyer_id);
        listing.agreed_price = Some(price);
        listing.updated_at = Utc::now();
        Ok(listing.clone())
    }

    fn close_others(&mut self, listing_id: Uuid, keep: Uuid) {
        let now = Utc::now();
        for n in self
            .negotiations
            .iter_mut()
            .filter(|n| n.listing_id == listing_id && n.id != keep && n.status.is_open())
        {
            n.status = NegotiationStatus::Rejected;
            n.updated_at = now;
        }
        for r in self
            .requests
            .iter_mut()
            .filter(|r| r.listing_id == listing_id && r.id != keep && r.status == RequestStatus::Pending)
        {
            r.status = RequestStatus::Declined;
            r.updated_at = now;
        }
    }
}

/// In-process store: one mutex over plain vectors in insertion order.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Empty store carrying the reference data the migrations seed.
    pub fn new() -> Self {
        let tables = Tables {
            materials: default_material_types(),
            ngos: default_ngos(),
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketStore for MemoryStore {
    fn profile_for_wallet(&self, wallet: &str) -> StoreResult<Profile> {
        let mut tables = self.lock()?;
        if let Some(profile) = tables.profiles.iter().find(|p| p.wallet_address == wallet) {
            return Ok(profile.clone());
        }
        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4(),
            wallet_address: wallet.to_string(),
            display_name: None,
            phone: None,
            role: Role::Seller,
            created_at: now,
            updated_at: now,
        };
        tables.profiles.push(profile.clone());
        Ok(profile)
    }

    fn profile(&self, id: Uuid) -> StoreResult<Profile> {
        self.lock()?
            .profiles
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("profile"))
    }

    fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> StoreResult<Profile> {
        let mut tables = self.lock()?;
        let profile = tables
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound("profile"))?;
        if let Some(name) = &changes.display_name {
            profile.display_name = Some(name.clone());
        }
        if let Some(phone) = &changes.phone {
            profile.phone = Some(phone.clone());
        }
        if let Some(role) = changes.role {
            profile.role = role;
        }
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    fn material_types(&self) -> StoreResult<Vec<MaterialType>> {
        Ok(self.lock()?.materials.clone())
    }

    fn ngos(&self) -> StoreResult<Vec<Ngo>> {
        Ok(self.lock()?.ngos.clone())
    }

    fn insert_listing(&self, new: &NewListing) -> StoreResult<Listing> {
        let mut tables = self.lock()?;
        if !tables.profiles.iter().any(|p| p.id == new.seller_id) {
            return Err(StoreError::NotFound("profile"));
        }
        let now = Utc::now();
        let listing = Listing {
            id: new.id,
            seller_id: new.seller_id,
            material_type_id: new.material_type_id,
            title: new.title.clone(),
            description: new.description.clone(),
            quantity: new.quantity,
            unit: new.unit,
            price: new.price,
            status: new.status,
            latitude: new.latitude,
            longitude: new.longitude,
            address: new.address.clone(),
            image_url: new.image_url.clone(),
            is_donation: new.is_donation,
            ngo_id: new.ngo_id,
            buyer_id: None,
            agreed_price: None,
            reward_signature: None,
            created_at: now,
            updated_at: now,
        };
        tables.listings.push(listing.clone());
        Ok(listing)
    }

    fn listing(&self, id: Uuid) -> StoreResult<Listing> {
        self.lock()?
            .listings
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("listing"))
    }

    fn listings(&self, filter: &ListingFilter) -> StoreResult<Vec<Listing>> {
        let tables = self.lock()?;
        let matching: Vec<Listing> = tables
            .listings
            .iter()
            .rev()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        Ok(sort_by_distance(matching, filter))
    }

    fn update_listing(&self, id: Uuid, changes: &ListingChanges) -> StoreResult<Listing> {
        let mut tables = self.lock()?;
        let listing = tables.listing_mut(id)?;
        if listing.status != ListingStatus::Active {
            return Err(StoreError::Conflict(format!(
                "listing is {} and can no longer be edited",
                listing.status
            )));
        }
        changes.apply_to(listing);
        listing.updated_at = Utc::now();
        Ok(listing.clone())
    }

    fn transition_listing(
        &self,
        id: Uuid,
        from: ListingStatus,
        to: ListingStatus,
    ) -> StoreResult<Listing> {
        let mut tables = self.lock()?;
        let listing = tables.listing_mut(id)?;
        if listing.status != from {
            return Err(StoreError::Conflict(format!(
                "listing changed to {} meanwhile",
                listing.status
            )));
        }
        listing.status = to;
        if to == ListingStatus::Active {
            listing.buyer_id = None;
            listing.agreed_price = None;
        }
        listing.updated_at = Utc::now();
        let listing = listing.clone();
        if to.is_terminal() {
            tables.close_others(id, Uuid::nil());
        }
        Ok(listing)
    }

    fn record_reward(&self, id: Uuid, signature: &str) -> StoreResult<Listing> {
        let mut tables = self.lock()?;
        let listing = tables.listing_mut(id)?;
        if listing.status != ListingStatus::Sold || listing.reward_signature.is_some() {
            return Err(StoreError::Conflict("reward already claimed".into()));
        }
        listing.reward_signature = Some(signature.to_string());
        listing.updated_at = Utc::now();
        Ok(listing.clone())
    }

    fn insert_negotiation(&self, new: &NewNegotiation) -> StoreResult<Negotiation> {
        let mut tables = self.lock()?;
        if tables.listing_mut(new.listing_id)?.status != ListingStatus::Active {
            return Err(StoreError::Conflict("listing is no longer active".into()));
        }
        let duplicate = tables.negotiations.iter().any(|n| {
            n.listing_id == new.listing_id && n.dealer_id == new.dealer_id && n.status.is_open()
        });
        if duplicate {
            return Err(StoreError::Conflict(
                "an open negotiation already exists for this listing".into(),
            ));
        }
        let now = Utc::now();
        let negotiation = Negotiation {
            id: new.id,
            listing_id: new.listing_id,
            dealer_id: new.dealer_id,
            seller_id: new.seller_id,
            initial_offer: new.initial_offer,
            counter_offer: None,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        tables.negotiations.push(negotiation.clone());
        Ok(negotiation)
    }

    fn negotiation(&self, id: Uuid) -> StoreResult<Negotiation> {
        self.lock()?
            .negotiations
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("negotiation"))
    }

    fn negotiations_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Negotiation>> {
        Ok(self
            .lock()?
            .negotiations
            .iter()
            .rev()
            .filter(|n| n.listing_id == listing_id)
            .cloned()
            .collect())
    }

    fn negotiations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Negotiation>> {
        Ok(self
            .lock()?
            .negotiations
            .iter()
            .rev()
            .filter(|n| n.dealer_id == user_id || n.seller_id == user_id)
            .cloned()
            .collect())
    }

    fn set_negotiation_status(
        &self,
        id: Uuid,
        from: NegotiationStatus,
        to: NegotiationStatus,
        counter_offer: Option<i64>,
    ) -> StoreResult<Negotiation> {
        let mut tables = self.lock()?;
        let negotiation = tables.negotiation_mut(id)?;
        if negotiation.status != from {
            return Err(StoreError::Conflict(format!(
                "negotiation changed to {} meanwhile",
                negotiation.status
            )));
        }
        negotiation.status = to;
        if counter_offer.is_some() {
            negotiation.counter_offer = counter_offer;
        }
        negotiation.updated_at = Utc::now();
        Ok(negotiation.clone())
    }

    fn accept_negotiation(
        &self,
        id: Uuid,
        from: NegotiationStatus,
        agreed_price: i64,
    ) -> StoreResult<(Negotiation, Listing)> {
        let mut tables = self.lock()?;
        let current = tables.negotiation_mut(id)?.clone();
        if current.status != from {
            return Err(StoreError::Conflict(format!(
                "negotiation changed to {} meanwhile",
                current.status
            )));
        }
        // Reserve first so a stale listing leaves the negotiation untouched.
        let listing = tables.reserve_listing(current.listing_id, current.dealer_id, agreed_price)?;
        let negotiation = tables.negotiation_mut(id)?;
        negotiation.status = NegotiationStatus::Accepted;
        negotiation.updated_at = Utc::now();
        let negotiation = negotiation.clone();
        tables.close_others(current.listing_id, id);
        Ok((negotiation, listing))
    }

    fn insert_request(&self, new: &NewListingRequest) -> StoreResult<ListingRequest> {
        let mut tables = self.lock()?;
        if tables.listing_mut(new.listing_id)?.status != ListingStatus::Active {
            return Err(StoreError::Conflict("listing is no longer active".into()));
        }
        let duplicate = tables.requests.iter().any(|r| {
            r.listing_id == new.listing_id
                && r.buyer_id == new.buyer_id
                && r.status == RequestStatus::Pending
        });
        if duplicate {
            return Err(StoreError::Conflict(
                "a pending request already exists for this listing".into(),
            ));
        }
        let now = Utc::now();
        let request = ListingRequest {
            id: new.id,
            listing_id: new.listing_id,
            buyer_id: new.buyer_id,
            seller_id: new.seller_id,
            message: new.message.clone(),
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        tables.requests.push(request.clone());
        Ok(request)
    }

    fn request(&self, id: Uuid) -> StoreResult<ListingRequest> {
        self.lock()?
            .requests
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("request"))
    }

    fn requests_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<ListingRequest>> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .rev()
            .filter(|r| r.listing_id == listing_id)
            .cloned()
            .collect())
    }

    fn requests_for_buyer(&self, buyer_id: Uuid) -> StoreResult<Vec<ListingRequest>> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .rev()
            .filter(|r| r.buyer_id == buyer_id)
            .cloned()
            .collect())
    }

    fn close_request(&self, id: Uuid, to: RequestStatus) -> StoreResult<ListingRequest> {
        let mut tables = self.lock()?;
        let request = tables.request_mut(id)?;
        if request.status != RequestStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "request changed to {} meanwhile",
                request.status
            )));
        }
        request.status = to;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    fn approve_request(&self, id: Uuid) -> StoreResult<(ListingRequest, Listing)> {
        let mut tables = self.lock()?;
        let current = tables.request_mut(id)?.clone();
        if current.status != RequestStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "request changed to {} meanwhile",
                current.status
            )));
        }
        let price = tables.listing_mut(current.listing_id)?.price;
        let listing = tables.reserve_listing(current.listing_id, current.buyer_id, price)?;
        let request = tables.request_mut(id)?;
        request.status = RequestStatus::Approved;
        request.updated_at = Utc::now();
        let request = request.clone();
        tables.close_others(current.listing_id, id);
        Ok((request, listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::models::Unit;

    fn seller_and_dealer(store: &MemoryStore) -> (Profile, Profile) {
        (
            store.profile_for_wallet("seller-wallet").unwrap(),
            store.profile_for_wallet("dealer-wallet").unwrap(),
        )
    }

    fn listing_for(store: &MemoryStore, seller: Uuid, location: Option<GeoPoint>) -> Listing {
        store
            .insert_listing(&NewListing {
                id: Uuid::new_v4(),
                seller_id: seller,
                material_type_id: 1,
                title: "Copper wire offcuts".into(),
                description: None,
                quantity: 12.5,
                unit: Unit::Kg,
                price: 900_000,
                status: ListingStatus::Active,
                latitude: location.map(|p| p.lat),
                longitude: location.map(|p| p.lng),
                address: None,
                image_url: None,
                is_donation: false,
                ngo_id: None,
            })
            .unwrap()
    }

    fn offer(listing: &Listing, dealer: Uuid, amount: i64) -> NewNegotiation {
        NewNegotiation {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            dealer_id: dealer,
            seller_id: listing.seller_id,
            initial_offer: amount,
            status: NegotiationStatus::Pending,
        }
    }

    #[test]
    fn profile_is_created_once_per_wallet() {
        let store = MemoryStore::new();
        let first = store.profile_for_wallet("wallet").unwrap();
        let second = store.profile_for_wallet("wallet").unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn one_open_negotiation_per_dealer() {
        let store = MemoryStore::new();
        let (seller, dealer) = seller_and_dealer(&store);
        let listing = listing_for(&store, seller.id, None);

        let first = store.insert_negotiation(&offer(&listing, dealer.id, 800_000)).unwrap();
        let err = store.insert_negotiation(&offer(&listing, dealer.id, 850_000)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .set_negotiation_status(first.id, NegotiationStatus::Pending, NegotiationStatus::Rejected, None)
            .unwrap();
        assert!(store.insert_negotiation(&offer(&listing, dealer.id, 850_000)).is_ok());
    }

    #[test]
    fn stale_status_is_a_conflict() {
        let store = MemoryStore::new();
        let (seller, dealer) = seller_and_dealer(&store);
        let listing = listing_for(&store, seller.id, None);
        let n = store.insert_negotiation(&offer(&listing, dealer.id, 800_000)).unwrap();

        store
            .set_negotiation_status(n.id, NegotiationStatus::Pending, NegotiationStatus::Countered, Some(850_000))
            .unwrap();
        let err = store
            .set_negotiation_status(n.id, NegotiationStatus::Pending, NegotiationStatus::Rejected, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn accepting_reserves_listing_and_closes_siblings() {
        let store = MemoryStore::new();
        let (seller, dealer) = seller_and_dealer(&store);
        let other = store.profile_for_wallet("other-wallet").unwrap();
        let listing = listing_for(&store, seller.id, None);

        let winner = store.insert_negotiation(&offer(&listing, dealer.id, 800_000)).unwrap();
        let loser = store.insert_negotiation(&offer(&listing, other.id, 700_000)).unwrap();

        let (accepted, reserved) = store
            .accept_negotiation(winner.id, NegotiationStatus::Pending, 800_000)
            .unwrap();
        assert_eq!(accepted.status, NegotiationStatus::Accepted);
        assert_eq!(reserved.status, ListingStatus::PendingPickup);
        assert_eq!(reserved.buyer_id, Some(dealer.id));
        assert_eq!(reserved.agreed_price, Some(800_000));
        assert_eq!(store.negotiation(loser.id).unwrap().status, NegotiationStatus::Rejected);

        let err = store
            .accept_negotiation(loser.id, NegotiationStatus::Rejected, 700_000)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn back_to_active_clears_buyer() {
        let store = MemoryStore::new();
        let (seller, dealer) = seller_and_dealer(&store);
        let listing = listing_for(&store, seller.id, None);
        let n = store.insert_negotiation(&offer(&listing, dealer.id, 800_000)).unwrap();
        store.accept_negotiation(n.id, NegotiationStatus::Pending, 800_000).unwrap();

        let reopened = store
            .transition_listing(listing.id, ListingStatus::PendingPickup, ListingStatus::Active)
            .unwrap();
        assert_eq!(reopened.buyer_id, None);
        assert_eq!(reopened.agreed_price, None);
    }

    #[test]
    fn reward_is_recorded_once() {
        let store = MemoryStore::new();
        let (seller, _) = seller_and_dealer(&store);
        let listing = listing_for(&store, seller.id, None);
        assert!(store.record_reward(listing.id, "sig").is_err());

        store
            .transition_listing(listing.id, ListingStatus::Active, ListingStatus::Sold)
            .unwrap();
        assert!(store.record_reward(listing.id, "sig").is_ok());
        assert!(matches!(
            store.record_reward(listing.id, "sig-2"),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn nearby_listings_sorted_by_distance() {
        let store = MemoryStore::new();
        let (seller, _) = seller_and_dealer(&store);
        let center = GeoPoint::new(12.9716, 77.5946).unwrap();
        let close = listing_for(&store, seller.id, Some(GeoPoint::new(12.98, 77.60).unwrap()));
        let closer = listing_for(&store, seller.id, Some(GeoPoint::new(12.972, 77.595).unwrap()));
        listing_for(&store, seller.id, Some(GeoPoint::new(13.0827, 80.2707).unwrap()));
        listing_for(&store, seller.id, None);

        let filter = ListingFilter {
            near: Some((center, 5.0)),
            ..ListingFilter::default()
        };
        let ids: Vec<Uuid> = store.listings(&filter).unwrap().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![closer.id, close.id]);
    }
}
