use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;

use crate::auth;
use crate::config::AppConfig;
use crate::detection::{self, MaterialDetector};
use crate::error::ApiError;
use crate::images::{self, ImageHost, MAX_IMAGE_BODY_BYTES};
use crate::listing;
use crate::negotiation;
use crate::profile;
use crate::request;
use crate::rewards;
use crate::solana::{RewardClient, RewardError};
use crate::store::{MarketStore, StoreResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn MarketStore>,
    pub detector: Option<Arc<MaterialDetector>>,
    pub images: Option<Arc<ImageHost>>,
    pub rewards: Option<Arc<RewardClient>>,
}

impl AppState {
    /// Wires the integrations that are configured; the rest answer 503.
    pub fn new(config: AppConfig, store: Arc<dyn MarketStore>) -> Result<Self, RewardError> {
        let detector = MaterialDetector::from_config(&config).map(Arc::new);
        let images = ImageHost::from_config(&config).map(Arc::new);
        let rewards = RewardClient::from_config(&config)?.map(Arc::new);
        log::info!(
            "Integrations: detection={} images={} rewards={}",
            detector.is_some(),
            images.is_some(),
            rewards.is_some()
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            detector,
            images,
            rewards,
        })
    }

    /// Runs a store call on the blocking pool.
    pub async fn db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&dyn MarketStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(ApiError::internal)?;
        Ok(result?)
    }
}

/// Validates the bearer token and hands the caller to the handler as an
/// `Extension<AuthUser>`.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing or malformed Authorization header".into()))?;
    let user = auth::validate_token(token, &state.config.jwt_secret).map_err(|e| {
        log::warn!("Rejected token: {}", e);
        ApiError::Unauthorized("invalid or expired token".into())
    })?;
    log::debug!("Authenticated user: {}", user.id);
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/profile", get(profile::get_profile).put(profile::update_profile))
        .route("/my/listings", get(listing::my_listings))
        .route("/listings", post(listing::create_listing))
        .route(
            "/listings/:id",
            axum::routing::patch(listing::update_listing).delete(listing::delete_listing),
        )
        .route("/listings/:id/status", post(listing::change_status))
        .route(
            "/listings/:id/negotiations",
            post(negotiation::create_negotiation).get(negotiation::listing_negotiations),
        )
        .route("/negotiations", get(negotiation::my_negotiations))
        .route("/negotiations/:id/counter", post(negotiation::counter_offer))
        .route("/negotiations/:id/accept", post(negotiation::accept_offer))
        .route("/negotiations/:id/reject", post(negotiation::reject_offer))
        .route(
            "/listings/:id/requests",
            post(request::create_request).get(request::listing_requests),
        )
        .route("/requests", get(request::my_requests))
        .route("/requests/:id/approve", post(request::approve_request))
        .route("/requests/:id/decline", post(request::decline_request))
        .route("/requests/:id/cancel", post(request::cancel_request))
        .route(
            "/detect",
            post(detection::detect_material).layer(DefaultBodyLimit::max(MAX_IMAGE_BODY_BYTES)),
        )
        .route(
            "/images",
            post(images::upload_image).layer(DefaultBodyLimit::max(MAX_IMAGE_BODY_BYTES)),
        )
        .route("/listings/:id/reward", post(rewards::prepare_reward))
        .route("/rewards/submit", post(rewards::submit_reward))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/", get(|| async { "ScrapX backend is running" }))
        .route("/auth/challenge", get(profile::challenge))
        .route("/auth/login", post(profile::login))
        .route("/materials", get(profile::material_types))
        .route("/ngos", get(profile::ngos))
        .route("/listings", get(listing::search_listings))
        .route("/listings/:id", get(listing::get_listing))
        .route("/listings/:id/coordinates", get(listing::listing_coordinates))
        .merge(protected_routes)
        .with_state(state)
}
