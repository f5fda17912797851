//! Caller credentials.
//!
//! Credentials arrive per request as an HTTP Basic `Authorization` header and
//! are forwarded to the version-control host: embedded in the clone URL for
//! git operations, or as Basic auth for REST reads.  They are never stored.

pub mod basic;

pub use basic::{AuthError, Credentials};
