//! HTTP layer for the whitelist API.
//!
//! [`handler`] owns the axum router and the endpoint handlers;
//! [`params`] resolves request fields from the query string and JSON body.

pub mod handler;
pub mod params;
