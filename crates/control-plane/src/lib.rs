//! Control-plane client for multipart uploads.
//!
//! Async HTTP client using `reqwest`. Every method performs exactly one
//! request; retry policy belongs to the caller.

pub mod client;

pub use client::{Client, Error, PutOutcome};
