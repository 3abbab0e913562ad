//! # dcas-api
//!
//! Client surface for the DataCrunch cloud API as seen by the autoscaler
//! provider.
//!
//! The provider core never talks HTTP directly. It depends on the
//! [`CloudApi`] trait, which has two implementations:
//!
//! - [`HttpClient`]: reqwest-backed client using OAuth2 client credentials
//! - [`MockCloudApi`]: in-memory fake with call counters and scripted
//!   failures, used by tests across the workspace
//!
//! ## Error classification
//!
//! Every failure is mapped onto [`ApiError`], which knows whether it is worth
//! retrying ([`ApiError::is_transient`]). Timeouts are terminal:
//! a create call that timed out may still have been accepted remotely.

mod client;
mod error;
mod http;
mod mock;
mod types;

pub use client::CloudApi;
pub use error::ApiError;
pub use http::{HttpClient, HttpClientConfig, DEFAULT_API_URL};
pub use mock::MockCloudApi;
pub use types::*;
