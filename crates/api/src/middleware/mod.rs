//! Request extractors guarding the API routes.
//!
//! - [`auth::ApiKey`] -- Checks the shared secret in `X-API-Key`.

pub mod auth;
