//! Drive REST API client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.
//! [`Client`] implements [`cloudrive_upload::DriveBackend`], so it can be
//! handed straight to an upload queue.

pub mod client;
pub mod types;

pub use client::{Client, ClientConfig, Error};
pub use types::ApiResponse;
