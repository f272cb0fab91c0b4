pub mod clock;
pub mod config;
pub mod duration;
pub mod engine;
pub mod market_data;
pub mod models;
pub mod portfolio;
pub mod reconcile;
pub mod store;
pub mod subscription;
