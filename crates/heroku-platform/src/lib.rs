//! Heroku Platform API client
//!
//! Implements [`reina_core::Platform`] over the Platform API v3. Every
//! non-success response is surfaced as [`PlatformError::Api`] carrying the raw
//! response body, which is what Heroku uses to explain a failure.

mod client;

pub use client::{HerokuConfig, HerokuPlatform, ACCEPT_HEADER, DEFAULT_API_URL};
pub use reina_core::PlatformError;
