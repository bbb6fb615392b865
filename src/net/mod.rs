//! HTTP boundary to Nightscout and the optional cloud prediction
//! service. Every call is bounded by a timeout; failure is non-fatal
//! (spec.md §5 "Cancellation & timeouts").

pub mod cloud;
pub mod nightscout;

pub use cloud::CloudClient;
pub use nightscout::NightscoutClient;

use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
