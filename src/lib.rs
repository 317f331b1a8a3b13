// src/lib.rs

//! Price Monitor Library
//!
//! Scrapes part prices from third-party sites, aggregates them per product
//! and syncs a canonical price to a storefront.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod storefront;
pub mod utils;
