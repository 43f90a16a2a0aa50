//! Clients for the services the gateway relays to.
//!
//! # Services
//!
//! - [`inference`]: the facial-analysis service (mandatory, one call per analysis)
//! - [`history`]: the CRUD/history service (optional, best-effort)
//!
//! Both clients share one `reqwest::Client`, so the per-call timeout and
//! connection pool are configured in a single place.

use std::time::Duration;

use reqwest::redirect::Policy;

pub mod history;
pub mod inference;

pub use history::{HistoryClient, HistoryError, HistorySaved};
pub use inference::{InferenceClient, InferenceError, Passthrough};

/// Build the shared HTTP client. Every outbound call is bounded by `timeout`
/// and is attempted exactly once: redirects are not followed.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(Policy::none())
        .user_agent(concat!("sinout-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
}
