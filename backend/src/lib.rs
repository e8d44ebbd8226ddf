pub mod app;
pub mod auth;
pub mod config;
pub mod detection;
pub mod error;
pub mod geo;
pub mod images;
pub mod listing;
pub mod models;
pub mod negotiation;
pub mod profile;
pub mod request;
pub mod rewards;
pub mod schema;
pub mod solana;
pub mod store;
