//! Metahub - unified metadata aggregation across external media APIs
//!
//! This library crate exposes the provider adapters, the aggregation layer
//! and the relay server for integration testing.

pub mod aggregator;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod limiter;
pub mod media;
pub mod oauth;
pub mod providers;
pub mod relay;
