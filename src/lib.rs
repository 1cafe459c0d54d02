//! Multitenant ad-platform sync core.
//!
//! Connects user ad accounts over OAuth, keeps provider credentials encrypted
//! at rest, and pulls campaigns and daily metrics into local storage on a
//! schedule, on demand, or in response to signed provider webhooks.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod oauth;
pub mod providers;
pub mod store;
pub mod sync;
pub mod vault;
