//! HTTP API configuration

use serde::Deserialize;

/// Configuration for the HTTP API
///
/// ```ron
/// api: (
///     listen_address: "127.0.0.1:5000",
///     default_sender: "campaigns@example.com",
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the API server
    ///
    /// Common values:
    /// - `[::]:5000` (IPv6 any address, port 5000)
    /// - `0.0.0.0:5000` (IPv4 any address, port 5000)
    /// - `127.0.0.1:5000` (localhost only, port 5000)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Sender identity used when a schedule request does not name one
    #[serde(default = "default_sender")]
    pub default_sender: String,

    /// Requests taking longer than this are answered with 408
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_listen_address() -> String {
    "[::]:5000".to_string()
}

fn default_sender() -> String {
    "test@example.com".to_string()
}

const fn default_request_timeout() -> u64 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            default_sender: default_sender(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}
