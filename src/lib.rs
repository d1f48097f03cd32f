//! verdiff crate
//!
//! This crate is an implementation detail of the `verdiff` tool. This crate's API is fluid and may change without warning
//! and in a semver-incompatible way.

/// Result type alias using `ohno::AppError` as the default error type.
pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[doc(hidden)]
pub mod managers;

#[doc(hidden)]
pub mod metrics;

#[doc(hidden)]
pub mod misc;

#[doc(hidden)]
pub mod repo;

#[doc(hidden)]
pub mod store;

#[doc(hidden)]
pub mod update;
