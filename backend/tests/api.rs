// HTTP-level tests: the full router over the in-memory store, driven with
// `tower::ServiceExt::oneshot`. Users log in the way a wallet would, by
// signing the challenge message with a fresh keypair.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine};
use chrono::Utc;
use serde_json::{json, Value};
use solana_sdk::signature::{Keypair, Signer};
use tower::ServiceExt;

use scrapx_backend::app::{self, AppState};
use scrapx_backend::auth::challenge_message;
use scrapx_backend::config::AppConfig;
use scrapx_backend::store::MemoryStore;

// ===========================================================================
// Test helpers
// ===========================================================================

fn test_app() -> Router {
    let state = AppState::new(AppConfig::local("test-secret"), Arc::new(MemoryStore::new()))
        .expect("no integrations configured");
    app::router(state)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

struct User {
    token: String,
    id: String,
}

async fn login(app: &Router) -> User {
    let keypair = Keypair::new();
    let message = challenge_message(Utc::now().timestamp());
    let signature = keypair.sign_message(message.as_bytes()).to_string();
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({
            "wallet_address": keypair.pubkey().to_string(),
            "signature": signature,
            "message": message,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    User {
        token: body["token"].as_str().unwrap().to_string(),
        id: body["profile"]["id"].as_str().unwrap().to_string(),
    }
}

fn copper_listing() -> Value {
    json!({
        "material_type_id": 1,
        "title": "Copper wire offcuts",
        "quantity": 12.5,
        "unit": "kg",
        "price": 90000,
        "latitude": 12.9716,
        "longitude": 77.5946,
        "address": "Indiranagar, Bengaluru",
    })
}

async fn create_listing(app: &Router, seller: &User) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/listings",
        Some(&seller.token),
        Some(copper_listing()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["id"].as_str().unwrap().to_string()
}

async fn offer(app: &Router, dealer: &User, listing_id: &str, amount: i64) -> (StatusCode, Value) {
    call(
        app,
        Method::POST,
        &format!("/listings/{listing_id}/negotiations"),
        Some(&dealer.token),
        Some(json!({ "offer_amount": amount })),
    )
    .await
}

// ===========================================================================
// Public surface and authentication
// ===========================================================================

#[tokio::test]
async fn reference_data_is_public() {
    let app = test_app();
    let (status, body) = call(&app, Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ScrapX backend is running");

    let (status, materials) = call(&app, Method::GET, "/materials", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(materials.as_array().unwrap().len(), 11);

    let (status, ngos) = call(&app, Method::GET, "/ngos", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ngos[0]["name"], "Green Earth Foundation");
}

#[tokio::test]
async fn challenge_carries_the_signing_prefix() {
    let app = test_app();
    let (status, body) = call(&app, Method::GET, "/auth/challenge", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().starts_with("Sign in to ScrapX at "));
    assert_eq!(body["expires_in"], 300);
}

#[tokio::test]
async fn login_refuses_bad_signatures() {
    let app = test_app();
    let keypair = Keypair::new();
    let message = challenge_message(Utc::now().timestamp());
    let forged = Keypair::new().sign_message(message.as_bytes()).to_string();
    let (status, _) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({
            "wallet_address": keypair.pubkey().to_string(),
            "signature": forged,
            "message": message,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stale = challenge_message(Utc::now().timestamp() - 3600);
    let signature = keypair.sign_message(stale.as_bytes()).to_string();
    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({
            "wallet_address": keypair.pubkey().to_string(),
            "signature": signature,
            "message": stale,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "login message expired");
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = test_app();
    let (status, body) = call(&app, Method::GET, "/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, Method::GET, "/profile", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::POST, "/listings", None, Some(copper_listing())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_can_be_updated() {
    let app = test_app();
    let user = login(&app).await;
    let (status, body) = call(
        &app,
        Method::PUT,
        "/profile",
        Some(&user.token),
        Some(json!({ "display_name": "Ravi Scrap Co", "role": "dealer" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["role"], "dealer");

    let (_, body) = call(&app, Method::GET, "/profile", Some(&user.token), None).await;
    assert_eq!(body["display_name"], "Ravi Scrap Co");
    assert_eq!(body["id"], user.id.as_str());
}

// ===========================================================================
// Listings
// ===========================================================================

#[tokio::test]
async fn listing_is_searchable_and_located() {
    let app = test_app();
    let seller = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;

    let (status, listings) = call(&app, Method::GET, "/listings", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listings.as_array().unwrap().len(), 1);
    assert_eq!(listings[0]["status"], "active");

    let (_, nearby) = call(
        &app,
        Method::GET,
        "/listings?lat=12.97&lng=77.59&radius_km=5",
        None,
        None,
    )
    .await;
    assert_eq!(nearby.as_array().unwrap().len(), 1);
    let (_, far) = call(&app, Method::GET, "/listings?lat=28.61&lng=77.21", None, None).await;
    assert!(far.as_array().unwrap().is_empty());

    let (status, coords) = call(
        &app,
        Method::GET,
        &format!("/listings/{listing_id}/coordinates"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(coords["formatted"], "12.971600, 77.594600");
    assert_eq!(coords["wkt"], "SRID=4326;POINT(77.5946 12.9716)");
}

#[tokio::test]
async fn listing_input_is_validated() {
    let app = test_app();
    let seller = login(&app).await;
    let mut body = copper_listing();
    body["longitude"] = Value::Null;
    let (status, _) = call(&app, Method::POST, "/listings", Some(&seller.token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = copper_listing();
    body["quantity"] = json!(0);
    let (status, _) = call(&app, Method::POST, "/listings", Some(&seller.token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = copper_listing();
    body["material_type_id"] = json!(999);
    let (status, _) = call(&app, Method::POST, "/listings", Some(&seller.token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_the_seller_edits_or_deletes() {
    let app = test_app();
    let seller = login(&app).await;
    let stranger = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;
    let uri = format!("/listings/{listing_id}");

    let (status, _) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&stranger.token),
        Some(json!({ "price": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::DELETE, &uri, Some(&stranger.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&seller.token),
        Some(json!({ "price": 85000, "title": "Copper wire, stripped" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["price"], 85000);
    assert_eq!(body["title"], "Copper wire, stripped");
}

#[tokio::test]
async fn deleted_listings_are_hidden_and_terminal() {
    let app = test_app();
    let seller = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;
    let uri = format!("/listings/{listing_id}");

    let (status, body) = call(&app, Method::DELETE, &uri, Some(&seller.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deleted");

    let (status, _) = call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listings) = call(&app, Method::GET, "/listings", None, None).await;
    assert!(listings.as_array().unwrap().is_empty());

    let (_, mine) = call(&app, Method::GET, "/my/listings", Some(&seller.token), None).await;
    assert_eq!(mine[0]["status"], "deleted");

    let (status, _) = call(&app, Method::DELETE, &uri, Some(&seller.token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ===========================================================================
// Negotiations
// ===========================================================================

#[tokio::test]
async fn one_open_negotiation_per_dealer() {
    let app = test_app();
    let seller = login(&app).await;
    let dealer = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;

    let (status, body) = offer(&app, &dealer, &listing_id, 80000).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "pending");

    let (status, _) = offer(&app, &dealer, &listing_id, 82000).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = offer(&app, &seller, &listing_id, 82000).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = offer(&app, &login(&app).await, &listing_id, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn counter_then_accept_reserves_the_listing() {
    let app = test_app();
    let seller = login(&app).await;
    let dealer = login(&app).await;
    let rival = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;

    let (_, negotiation) = offer(&app, &dealer, &listing_id, 80000).await;
    let negotiation_id = negotiation["id"].as_str().unwrap().to_string();
    let (_, rival_negotiation) = offer(&app, &rival, &listing_id, 78000).await;

    // the dealer cannot answer their own pending offer
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/accept"),
        Some(&dealer.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/counter"),
        Some(&seller.token),
        Some(json!({ "counter_offer": 86000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "countered");
    assert_eq!(body["counter_offer"], 86000);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/accept"),
        Some(&seller.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/accept"),
        Some(&dealer.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["negotiation"]["status"], "accepted");
    assert_eq!(body["listing"]["status"], "pending_pickup");
    assert_eq!(body["listing"]["buyer_id"], dealer.id.as_str());
    assert_eq!(body["listing"]["agreed_price"], 86000);

    let (_, threads) = call(
        &app,
        Method::GET,
        &format!("/listings/{listing_id}/negotiations"),
        Some(&seller.token),
        None,
    )
    .await;
    let rival_thread = threads
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["id"] == rival_negotiation["id"])
        .unwrap();
    assert_eq!(rival_thread["status"], "rejected");

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/reject"),
        Some(&dealer.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn outsiders_cannot_touch_a_negotiation() {
    let app = test_app();
    let seller = login(&app).await;
    let dealer = login(&app).await;
    let stranger = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;
    let (_, negotiation) = offer(&app, &dealer, &listing_id, 80000).await;
    let negotiation_id = negotiation["id"].as_str().unwrap();

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/reject"),
        Some(&stranger.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, threads) = call(
        &app,
        Method::GET,
        &format!("/listings/{listing_id}/negotiations"),
        Some(&stranger.token),
        None,
    )
    .await;
    assert!(threads.as_array().unwrap().is_empty());

    let (_, mine) = call(&app, Method::GET, "/negotiations", Some(&seller.token), None).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn buyer_confirms_pickup_and_sold_is_final() {
    let app = test_app();
    let seller = login(&app).await;
    let dealer = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;
    let (_, negotiation) = offer(&app, &dealer, &listing_id, 90000).await;
    let negotiation_id = negotiation["id"].as_str().unwrap();
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/accept"),
        Some(&seller.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let status_uri = format!("/listings/{listing_id}/status");
    let (status, _) = call(
        &app,
        Method::POST,
        &status_uri,
        Some(&dealer.token),
        Some(json!({ "status": "active" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        Method::POST,
        &status_uri,
        Some(&dealer.token),
        Some(json!({ "status": "sold" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "sold");

    let (status, _) = call(
        &app,
        Method::POST,
        &status_uri,
        Some(&seller.token),
        Some(json!({ "status": "active" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // no reward program configured
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/listings/{listing_id}/reward"),
        Some(&seller.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn reopening_a_pickup_clears_the_buyer() {
    let app = test_app();
    let seller = login(&app).await;
    let dealer = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;
    let (_, negotiation) = offer(&app, &dealer, &listing_id, 90000).await;
    let negotiation_id = negotiation["id"].as_str().unwrap();
    call(
        &app,
        Method::POST,
        &format!("/negotiations/{negotiation_id}/accept"),
        Some(&seller.token),
        None,
    )
    .await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/listings/{listing_id}/status"),
        Some(&seller.token),
        Some(json!({ "status": "active" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "active");
    assert!(body["buyer_id"].is_null());
    assert!(body["agreed_price"].is_null());
}

// ===========================================================================
// Requests and donations
// ===========================================================================

#[tokio::test]
async fn approving_a_request_sells_at_asking_price() {
    let app = test_app();
    let seller = login(&app).await;
    let buyer = login(&app).await;
    let other = login(&app).await;
    let listing_id = create_listing(&app, &seller).await;
    let requests_uri = format!("/listings/{listing_id}/requests");

    let (status, request) = call(
        &app,
        Method::POST,
        &requests_uri,
        Some(&buyer.token),
        Some(json!({ "message": "Can collect tomorrow" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{request}");
    let (status, _) = call(&app, Method::POST, &requests_uri, Some(&buyer.token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (_, other_request) =
        call(&app, Method::POST, &requests_uri, Some(&other.token), Some(json!({}))).await;

    let request_id = request["id"].as_str().unwrap();
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/requests/{request_id}/approve"),
        Some(&buyer.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/requests/{request_id}/approve"),
        Some(&seller.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["request"]["status"], "approved");
    assert_eq!(body["listing"]["status"], "pending_pickup");
    assert_eq!(body["listing"]["agreed_price"], 90000);
    assert_eq!(body["listing"]["buyer_id"], buyer.id.as_str());

    let (_, mine) = call(&app, Method::GET, "/requests", Some(&other.token), None).await;
    assert_eq!(mine[0]["id"], other_request["id"]);
    assert_eq!(mine[0]["status"], "declined");

    let other_id = other_request["id"].as_str().unwrap();
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/requests/{other_id}/cancel"),
        Some(&other.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn donations_need_an_ngo_and_are_not_negotiable() {
    let app = test_app();
    let seller = login(&app).await;
    let dealer = login(&app).await;

    let donation = json!({
        "material_type_id": 8,
        "title": "Cardboard boxes",
        "quantity": 20,
        "unit": "kg",
        "is_donation": true,
    });
    let (status, _) = call(
        &app,
        Method::POST,
        "/listings",
        Some(&seller.token),
        Some(donation.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut priced = donation.clone();
    priced["ngo_id"] = json!(1);
    priced["price"] = json!(500);
    let (status, _) = call(&app, Method::POST, "/listings", Some(&seller.token), Some(priced)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut valid = donation;
    valid["ngo_id"] = json!(2);
    let (status, listing) =
        call(&app, Method::POST, "/listings", Some(&seller.token), Some(valid)).await;
    assert_eq!(status, StatusCode::OK, "{listing}");
    assert_eq!(listing["price"], 0);

    let listing_id = listing["id"].as_str().unwrap();
    let (status, _) = offer(&app, &dealer, listing_id, 100).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, donations) = call(&app, Method::GET, "/listings?donation=true", None, None).await;
    assert_eq!(donations.as_array().unwrap().len(), 1);
}

// ===========================================================================
// Integrations
// ===========================================================================

#[tokio::test]
async fn unconfigured_integrations_answer_503() {
    let app = test_app();
    let user = login(&app).await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/detect",
        Some(&user.token),
        Some(json!({ "image_url": "https://example.com/scrap.jpg" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = call(&app, Method::POST, "/detect", Some(&user.token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let png = general_purpose::STANDARD.encode([0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    let (status, _) = call(
        &app,
        Method::POST,
        "/images",
        Some(&user.token),
        Some(json!({ "image_base64": png })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let gif = general_purpose::STANDARD.encode(b"GIF89a....");
    let (status, _) = call(
        &app,
        Method::POST,
        "/images",
        Some(&user.token),
        Some(json!({ "image_base64": gif })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn large_images_reach_the_upload_handler() {
    let app = test_app();
    let user = login(&app).await;

    let mut image = vec![0u8; 3 * 1024 * 1024];
    image[..8].copy_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    let encoded = general_purpose::STANDARD.encode(&image);

    let (status, body) = call(
        &app,
        Method::POST,
        "/images",
        Some(&user.token),
        Some(json!({ "image_base64": format!("data:image/png;base64,{encoded}") })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "image hosting is not configured");

    let (status, _) = call(
        &app,
        Method::POST,
        "/detect",
        Some(&user.token),
        Some(json!({ "image_base64": encoded })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn closing_a_listing_settles_its_open_threads() {
    let app = test_app();
    let seller = login(&app).await;
    let dealer = login(&app).await;
    let buyer = login(&app).await;

    for target in ["sold", "deleted"] {
        let listing_id = create_listing(&app, &seller).await;
        let (status, _) = offer(&app, &dealer, &listing_id, 70000).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/listings/{listing_id}/requests"),
            Some(&buyer.token),
            Some(json!({ "message": "can collect tomorrow" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = if target == "sold" {
            call(
                &app,
                Method::POST,
                &format!("/listings/{listing_id}/status"),
                Some(&seller.token),
                Some(json!({ "status": "sold" })),
            )
            .await
        } else {
            call(
                &app,
                Method::DELETE,
                &format!("/listings/{listing_id}"),
                Some(&seller.token),
                None,
            )
            .await
        };
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], target);

        let (_, negotiations) = call(&app, Method::GET, "/negotiations", Some(&dealer.token), None).await;
        let negotiation = negotiations
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["listing_id"] == listing_id)
            .unwrap();
        assert_eq!(negotiation["status"], "rejected");

        let (_, requests) = call(&app, Method::GET, "/requests", Some(&buyer.token), None).await;
        let request = requests
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["listing_id"] == listing_id)
            .unwrap();
        assert_eq!(request["status"], "declined");
    }
}
