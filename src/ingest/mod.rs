/// HTTP clients for upstream weather APIs.
///
/// - `archive`  — historical hourly archive: one multi-point request per window
/// - `forecast` — recent single-station samples
/// - `fixtures` (test only) — representative API response payloads

pub mod archive;
pub mod forecast;

#[cfg(test)]
pub(crate) mod fixtures;

use std::time::Duration;

/// Builds the blocking HTTP client shared by the weather API calls.
///
/// When `proxy_url` is set, every request is routed through it, which is
/// how egress rotation on the proxy controller takes effect.
pub fn build_http_client(
    timeout: Duration,
    proxy_url: Option<&str>,
) -> Result<reqwest::blocking::Client, reqwest::Error> {
    let mut builder = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("gridwx_service/", env!("CARGO_PKG_VERSION")));

    if let Some(url) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }

    builder.build()
}
