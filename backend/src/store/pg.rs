use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use uuid::Uuid;

use super::{sort_by_distance, MarketStore, StoreError, StoreResult};
use crate::geo::BoundingBox;
use crate::models::{
    Listing, ListingChanges, ListingFilter, ListingRequest, ListingStatus, MaterialType,
    Negotiation, NegotiationStatus, NewListing, NewListingRequest, NewNegotiation, Ngo, Profile,
    ProfileChanges, RequestStatus, Role,
};
use crate::schema::{listing_requests, material_types, negotiations, ngos, profiles, scrap_listings};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type PgPool = Pool<ConnectionManager<PgConnection>>;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn connect(database_url: &str, pool_size: u32) -> StoreResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        log::info!("Database pool ready ({} connections max)", pool_size);
        Ok(Self { pool })
    }

    pub fn run_migrations(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        for version in applied {
            log::info!("Applied migration {}", version);
        }
        Ok(())
    }

    fn conn(&self) -> StoreResult<PooledConnection<ConnectionManager<PgConnection>>> {
        self.pool.get().map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// Maps a unique-index violation to a conflict carrying `message`.
fn unique_conflict(message: &'static str) -> impl FnOnce(DieselError) -> StoreError {
    move |err| match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::Conflict(message.to_string())
        }
        other => other.into(),
    }
}

fn ensure_active(conn: &mut PgConnection, listing_id: Uuid) -> StoreResult<Listing> {
    let listing = scrap_listings::table
        .find(listing_id)
        .select(Listing::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(StoreError::NotFound("listing"))?;
    if listing.status != ListingStatus::Active {
        return Err(StoreError::Conflict("listing is no longer active".into()));
    }
    Ok(listing)
}

fn reserve_listing(
    conn: &mut PgConnection,
    listing_id: Uuid,
    buyer_id: Uuid,
    price: i64,
) -> StoreResult<Listing> {
    diesel::update(
        scrap_listings::table
            .find(listing_id)
            .filter(scrap_listings::status.eq(ListingStatus::Active)),
    )
    .set((
        scrap_listings::status.eq(ListingStatus::PendingPickup),
        scrap_listings::buyer_id.eq(Some(buyer_id)),
        scrap_listings::agreed_price.eq(Some(price)),
        scrap_listings::updated_at.eq(Utc::now()),
    ))
    .returning(Listing::as_returning())
    .get_result(conn)
    .optional()?
    .ok_or_else(|| StoreError::Conflict("listing is no longer active".into()))
}

/// Rejects open negotiations and declines pending requests on a listing,
/// sparing `keep` (`Uuid::nil()` spares nothing).
fn close_others(conn: &mut PgConnection, listing_id: Uuid, keep: Uuid) -> StoreResult<()> {
    let now = Utc::now();
    let rejected = diesel::update(
        negotiations::table
            .filter(negotiations::listing_id.eq(listing_id))
            .filter(negotiations::id.ne(keep))
            .filter(
                negotiations::status
                    .eq(NegotiationStatus::Pending)
                    .or(negotiations::status.eq(NegotiationStatus::Countered)),
            ),
    )
    .set((
        negotiations::status.eq(NegotiationStatus::Rejected),
        negotiations::updated_at.eq(now),
    ))
    .execute(conn)?;
    let declined = diesel::update(
        listing_requests::table
            .filter(listing_requests::listing_id.eq(listing_id))
            .filter(listing_requests::id.ne(keep))
            .filter(listing_requests::status.eq(RequestStatus::Pending)),
    )
    .set((
        listing_requests::status.eq(RequestStatus::Declined),
        listing_requests::updated_at.eq(now),
    ))
    .execute(conn)?;
    log::info!(
        "Closed {} negotiations and {} requests on listing {}",
        rejected,
        declined,
        listing_id
    );
    Ok(())
}

impl MarketStore for PgStore {
    fn profile_for_wallet(&self, wallet: &str) -> StoreResult<Profile> {
        let mut conn = self.conn()?;
        let now = Utc::now();
        let fresh = Profile {
            id: Uuid::new_v4(),
            wallet_address: wallet.to_string(),
            display_name: None,
            phone: None,
            role: Role::Seller,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(profiles::table)
            .values(&fresh)
            .on_conflict(profiles::wallet_address)
            .do_nothing()
            .execute(&mut conn)?;
        Ok(profiles::table
            .filter(profiles::wallet_address.eq(wallet))
            .select(Profile::as_select())
            .first(&mut conn)?)
    }

    fn profile(&self, id: Uuid) -> StoreResult<Profile> {
        let mut conn = self.conn()?;
        profiles::table
            .find(id)
            .select(Profile::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(StoreError::NotFound("profile"))
    }

    fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> StoreResult<Profile> {
        let mut conn = self.conn()?;
        diesel::update(profiles::table.find(id))
            .set((changes, profiles::updated_at.eq(Utc::now())))
            .returning(Profile::as_returning())
            .get_result(&mut conn)
            .optional()?
            .ok_or(StoreError::NotFound("profile"))
    }

    fn material_types(&self) -> StoreResult<Vec<MaterialType>> {
        let mut conn = self.conn()?;
        Ok(material_types::table
            .order(material_types::id)
            .select(MaterialType::as_select())
            .load(&mut conn)?)
    }

    fn ngos(&self) -> StoreResult<Vec<Ngo>> {
        let mut conn = self.conn()?;
        Ok(ngos::table
            .order(ngos::id)
            .select(Ngo::as_select())
            .load(&mut conn)?)
    }

    fn insert_listing(&self, listing: &NewListing) -> StoreResult<Listing> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(scrap_listings::table)
            .values(listing)
            .returning(Listing::as_returning())
            .get_result(&mut conn)?)
    }

    fn listing(&self, id: Uuid) -> StoreResult<Listing> {
        let mut conn = self.conn()?;
        scrap_listings::table
            .find(id)
            .select(Listing::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(StoreError::NotFound("listing"))
    }

    fn listings(&self, filter: &ListingFilter) -> StoreResult<Vec<Listing>> {
        let mut conn = self.conn()?;
        let mut query = scrap_listings::table.into_boxed();
        if !filter.include_deleted {
            query = query.filter(scrap_listings::status.ne(ListingStatus::Deleted));
        }
        if let Some(status) = filter.status {
            query = query.filter(scrap_listings::status.eq(status));
        }
        if let Some(material) = filter.material_type_id {
            query = query.filter(scrap_listings::material_type_id.eq(material));
        }
        if let Some(donation) = filter.is_donation {
            query = query.filter(scrap_listings::is_donation.eq(donation));
        }
        if let Some(seller) = filter.seller_id {
            query = query.filter(scrap_listings::seller_id.eq(seller));
        }
        if let Some((center, radius_km)) = filter.near {
            let bbox = BoundingBox::around(&center, radius_km);
            query = query
                .filter(scrap_listings::latitude.ge(bbox.min_lat))
                .filter(scrap_listings::latitude.le(bbox.max_lat));
            if let Some((lo, hi)) = bbox.lng_range {
                query = query
                    .filter(scrap_listings::longitude.ge(lo))
                    .filter(scrap_listings::longitude.le(hi));
            }
        }
        let rows = query
            .order(scrap_listings::created_at.desc())
            .select(Listing::as_select())
            .load(&mut conn)?;
        Ok(sort_by_distance(rows, filter))
    }

    fn update_listing(&self, id: Uuid, changes: &ListingChanges) -> StoreResult<Listing> {
        let mut conn = self.conn()?;
        diesel::update(
            scrap_listings::table
                .find(id)
                .filter(scrap_listings::status.eq(ListingStatus::Active)),
        )
        .set((changes, scrap_listings::updated_at.eq(Utc::now())))
        .returning(Listing::as_returning())
        .get_result(&mut conn)
        .optional()?
        .ok_or_else(|| StoreError::Conflict("listing can no longer be edited".into()))
    }

    fn transition_listing(
        &self,
        id: Uuid,
        from: ListingStatus,
        to: ListingStatus,
    ) -> StoreResult<Listing> {
        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            let target = scrap_listings::table
                .find(id)
                .filter(scrap_listings::status.eq(from));
            let now = Utc::now();
            let updated = if to == ListingStatus::Active {
                diesel::update(target)
                    .set((
                        scrap_listings::status.eq(to),
                        scrap_listings::buyer_id.eq(None::<Uuid>),
                        scrap_listings::agreed_price.eq(None::<i64>),
                        scrap_listings::updated_at.eq(now),
                    ))
                    .returning(Listing::as_returning())
                    .get_result(conn)
                    .optional()?
            } else {
                diesel::update(target)
                    .set((
                        scrap_listings::status.eq(to),
                        scrap_listings::updated_at.eq(now),
                    ))
                    .returning(Listing::as_returning())
                    .get_result(conn)
                    .optional()?
            };
            let listing =
                updated.ok_or_else(|| StoreError::Conflict("listing changed meanwhile".into()))?;
            if to.is_terminal() {
                close_others(conn, id, Uuid::nil())?;
            }
            Ok(listing)
        })
    }

    fn record_reward(&self, id: Uuid, signature: &str) -> StoreResult<Listing> {
        let mut conn = self.conn()?;
        diesel::update(
            scrap_listings::table
                .find(id)
                .filter(scrap_listings::status.eq(ListingStatus::Sold))
                .filter(scrap_listings::reward_signature.is_null()),
        )
        .set((
            scrap_listings::reward_signature.eq(Some(signature)),
            scrap_listings::updated_at.eq(Utc::now()),
        ))
        .returning(Listing::as_returning())
        .get_result(&mut conn)
        .optional()?
        .ok_or_else(|| StoreError::Conflict("reward already claimed".into()))
    }

    fn insert_negotiation(&self, negotiation: &NewNegotiation) -> StoreResult<Negotiation> {
        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            ensure_active(conn, negotiation.listing_id)?;
            diesel::insert_into(negotiations::table)
                .values(negotiation)
                .returning(Negotiation::as_returning())
                .get_result(conn)
                .map_err(unique_conflict(
                    "an open negotiation already exists for this listing",
                ))
        })
    }

    fn negotiation(&self, id: Uuid) -> StoreResult<Negotiation> {
        let mut conn = self.conn()?;
        negotiations::table
            .find(id)
            .select(Negotiation::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(StoreError::NotFound("negotiation"))
    }

    fn negotiations_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Negotiation>> {
        let mut conn = self.conn()?;
        Ok(negotiations::table
            .filter(negotiations::listing_id.eq(listing_id))
            .order(negotiations::created_at.desc())
            .select(Negotiation::as_select())
            .load(&mut conn)?)
    }

    fn negotiations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Negotiation>> {
        let mut conn = self.conn()?;
        Ok(negotiations::table
            .filter(
                negotiations::dealer_id
                    .eq(user_id)
                    .or(negotiations::seller_id.eq(user_id)),
            )
            .order(negotiations::created_at.desc())
            .select(Negotiation::as_select())
            .load(&mut conn)?)
    }

    fn set_negotiation_status(
        &self,
        id: Uuid,
        from: NegotiationStatus,
        to: NegotiationStatus,
        counter_offer: Option<i64>,
    ) -> StoreResult<Negotiation> {
        let mut conn = self.conn()?;
        let target = negotiations::table
            .find(id)
            .filter(negotiations::status.eq(from));
        let now = Utc::now();
        let updated = match counter_offer {
            Some(amount) => diesel::update(target)
                .set((
                    negotiations::status.eq(to),
                    negotiations::counter_offer.eq(Some(amount)),
                    negotiations::updated_at.eq(now),
                ))
                .returning(Negotiation::as_returning())
                .get_result(&mut conn)
                .optional()?,
            None => diesel::update(target)
                .set((
                    negotiations::status.eq(to),
                    negotiations::updated_at.eq(now),
                ))
                .returning(Negotiation::as_returning())
                .get_result(&mut conn)
                .optional()?,
        };
        updated.ok_or_else(|| StoreError::Conflict("negotiation changed meanwhile".into()))
    }

    fn accept_negotiation(
        &self,
        id: Uuid,
        from: NegotiationStatus,
        agreed_price: i64,
    ) -> StoreResult<(Negotiation, Listing)> {
        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            let negotiation = diesel::update(
                negotiations::table
                    .find(id)
                    .filter(negotiations::status.eq(from)),
            )
            .set((
                negotiations::status.eq(NegotiationStatus::Accepted),
                negotiations::updated_at.eq(Utc::now()),
            ))
            .returning(Negotiation::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or_else(|| StoreError::Conflict("negotiation changed meanwhile".into()))?;
            let listing =
                reserve_listing(conn, negotiation.listing_id, negotiation.dealer_id, agreed_price)?;
            close_others(conn, negotiation.listing_id, negotiation.id)?;
            Ok((negotiation, listing))
        })
    }

    fn insert_request(&self, request: &NewListingRequest) -> StoreResult<ListingRequest> {
        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            ensure_active(conn, request.listing_id)?;
            diesel::insert_into(listing_requests::table)
                .values(request)
                .returning(ListingRequest::as_returning())
                .get_result(conn)
                .map_err(unique_conflict(
                    "a pending request already exists for this listing",
                ))
        })
    }

    fn request(&self, id: Uuid) -> StoreResult<ListingRequest> {
        let mut conn = self.conn()?;
        listing_requests::table
            .find(id)
            .select(ListingRequest::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(StoreError::NotFound("request"))
    }

    fn requests_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<ListingRequest>> {
        let mut conn = self.conn()?;
        Ok(listing_requests::table
            .filter(listing_requests::listing_id.eq(listing_id))
            .order(listing_requests::created_at.desc())
            .select(ListingRequest::as_select())
            .load(&mut conn)?)
    }

    fn requests_for_buyer(&self, buyer_id: Uuid) -> StoreResult<Vec<ListingRequest>> {
        let mut conn = self.conn()?;
        Ok(listing_requests::table
            .filter(listing_requests::buyer_id.eq(buyer_id))
            .order(listing_requests::created_at.desc())
            .select(ListingRequest::as_select())
            .load(&mut conn)?)
    }

    fn close_request(&self, id: Uuid, to: RequestStatus) -> StoreResult<ListingRequest> {
        let mut conn = self.conn()?;
        diesel::update(
            listing_requests::table
                .find(id)
                .filter(listing_requests::status.eq(RequestStatus::Pending)),
        )
        .set((
            listing_requests::status.eq(to),
            listing_requests::updated_at.eq(Utc::now()),
        ))
        .returning(ListingRequest::as_returning())
        .get_result(&mut conn)
        .optional()?
        .ok_or_else(|| StoreError::Conflict("request changed meanwhile".into()))
    }

    fn approve_request(&self, id: Uuid) -> StoreResult<(ListingRequest, Listing)> {
        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            let request = diesel::update(
                listing_requests::table
                    .find(id)
                    .filter(listing_requests::status.eq(RequestStatus::Pending)),
            )
            .set((
                listing_requests::status.eq(RequestStatus::Approved),
                listing_requests::updated_at.eq(Utc::now()),
            ))
            .returning(ListingRequest::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or_else(|| StoreError::Conflict("request changed meanwhile".into()))?;
            let price = ensure_active(conn, request.listing_id)?.price;
            let listing = reserve_listing(conn, request.listing_id, request.buyer_id, price)?;
            close_others(conn, request.listing_id, request.id)?;
            Ok((request, listing))
        })
    }
}
