use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::browser;
use crate::config::DiscoveryConfig;
use crate::error::SearchBackendError;

const USER_AGENTS: &[&str] = &[
    browser::USER_AGENT,
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:131.0) Gecko/20100101 Firefox/131.0",
];

/// External search backends, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    DuckDuckGo,
    Bing,
}

impl SearchStrategy {
    pub const CHAIN: [SearchStrategy; 2] = [SearchStrategy::DuckDuckGo, SearchStrategy::Bing];

    pub fn label(self) -> &'static str {
        match self {
            SearchStrategy::DuckDuckGo => "duckduckgo-html",
            SearchStrategy::Bing => "bing-html",
        }
    }
}

/// HTTP client for the search backends, carrying browser-like headers.
pub struct SearchClient<'c> {
    client: reqwest::Client,
    config: &'c DiscoveryConfig,
}

impl<'c> SearchClient<'c> {
    pub fn new(config: &'c DiscoveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.search_timeout)
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self { client, config })
    }

    /// Up to `limit` normalized, non-aggregator candidate URLs for `query`.
    pub async fn search(
        &self,
        strategy: SearchStrategy,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, SearchBackendError> {
        let backend = strategy.label();
        let request = match strategy {
            SearchStrategy::DuckDuckGo => self
                .client
                .post(&self.config.duckduckgo_url)
                .form(&[("q", query)]),
            SearchStrategy::Bing => self.client.get(&self.config.bing_url).query(&[("q", query)]),
        };

        let response = request
            .headers(search_headers())
            .send()
            .await
            .map_err(|source| SearchBackendError::Request { backend, source })?;
        if !response.status().is_success() {
            return Err(SearchBackendError::Status {
                backend,
                status: response.status().as_u16(),
            });
        }
        let html = response
            .text()
            .await
            .map_err(|source| SearchBackendError::Request { backend, source })?;

        let aggregators = &self.config.keywords.aggregator_domains;
        let selector = match strategy {
            SearchStrategy::DuckDuckGo => "a.result__a",
            SearchStrategy::Bing => "li.b_algo h2 a",
        };
        let links = parse_result_links(&html, selector, limit, aggregators);
        debug!("{} returned {} candidates for '{}'", backend, links.len(), query);
        Ok(links)
    }
}

fn search_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let agent = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(browser::USER_AGENT);
    headers.insert(USER_AGENT, HeaderValue::from_static(agent));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, HeaderValue::from_static("https://duckduckgo.com/"));
    headers
}

/// Result hrefs under `selector`, unwrapped and with aggregators dropped.
fn parse_result_links(
    html: &str,
    selector: &str,
    limit: usize,
    aggregators: &[String],
) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for element in document.select(&selector) {
        if links.len() >= limit {
            break;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(cleaned) = normalize_search_result(href) {
            if !is_aggregator(&cleaned, aggregators) {
                links.push(cleaned);
            }
        }
    }
    links
}

/// Unwrap search-engine click-through redirects to their destination.
/// A redirect with no destination parameter, or an href that is not an
/// absolute URL, yields `None`. Anything else passes through untouched.
pub fn normalize_search_result(href: &str) -> Option<String> {
    let href = href.trim();
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;

    let is_ddg_redirect = parsed
        .host_str()
        .is_some_and(|host| host == "duckduckgo.com" || host.ends_with(".duckduckgo.com"))
        && parsed.path().starts_with("/l/");
    if is_ddg_redirect {
        return parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned())
            .filter(|target| !target.is_empty());
    }

    match parsed.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}

/// True when the URL's host equals a denylisted domain or is a subdomain of one.
pub fn is_aggregator(url: &str, aggregators: &[String]) -> bool {
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
    else {
        return false;
    };
    aggregators.iter().any(|bad| {
        host == *bad
            || host
                .strip_suffix(bad.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
