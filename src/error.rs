use std::time::Duration;

use thiserror::Error;

/// A page load that produced no usable data. Callers treat this as "no data"
/// for the one check that raised it.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("navigation to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("navigation to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("browser command failed for {url}: {source}")]
    WebDriver {
        url: String,
        #[source]
        source: thirtyfour::prelude::WebDriverError,
    },

    #[error("browser showed an error page for {url}: {shown}")]
    ErrorPage { url: String, shown: String },

    #[error("navigation limiter closed")]
    LimiterClosed,
}

#[derive(Debug, Error)]
pub enum SearchBackendError {
    #[error("{backend} request failed: {source}")]
    Request {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned status {status}")]
    Status { backend: &'static str, status: u16 },
}
