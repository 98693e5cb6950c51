use tracing::{debug, info, warn};
use url::Url;

use crate::browser::BrowserSession;
use crate::config::{DiscoveryConfig, contains_any};
use crate::search::{SearchClient, SearchStrategy, is_aggregator, normalize_search_result};
use crate::validator::is_valid_career_page;

/// Finds at most one verified careers URL per company.
pub struct CareerLocator<'a> {
    session: &'a BrowserSession,
    search: &'a SearchClient<'a>,
    config: &'a DiscoveryConfig,
}

impl<'a> CareerLocator<'a> {
    pub fn new(
        session: &'a BrowserSession,
        search: &'a SearchClient<'a>,
        config: &'a DiscoveryConfig,
    ) -> Self {
        Self {
            session,
            search,
            config,
        }
    }

    /// Run the strategy chain, then once more with corporate suffixes
    /// stripped. `None` means no discoverable careers page.
    pub async fn find_career_page(&self, company: &str, limit: Option<usize>) -> Option<String> {
        let limit = limit.unwrap_or(self.config.search_limit);

        if let Some(url) = self.locate_via_strategies(company, limit).await {
            return Some(url);
        }

        let suffixes = &self.config.keywords.safe_mode_suffixes;
        if let Some(trimmed) = safe_mode_variant(company, suffixes) {
            if !trimmed.eq_ignore_ascii_case(company) {
                info!("Safe-mode retry for {} via {}", company, trimmed);
                if let Some(url) = self.locate_via_strategies(&trimmed, limit).await {
                    return Some(url);
                }
            }
        }

        info!("No valid career page found for {}", company);
        None
    }

    /// Try an externally supplied URL first; it still has to validate.
    pub async fn verify_override(&self, company: &str, url: &str) -> Option<String> {
        self.first_valid_candidate(company, &[url.to_string()], "override").await
    }

    async fn locate_via_strategies(&self, company: &str, limit: usize) -> Option<String> {
        let query = format!("{} careers jobs", company);

        for strategy in SearchStrategy::CHAIN {
            let candidates = match self.search.search(strategy, &query, limit).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Strategy {} failed for {} ({})", strategy.label(), company, e);
                    continue;
                }
            };
            let found = self
                .first_valid_candidate(company, &candidates, strategy.label())
                .await;
            if found.is_some() {
                return found;
            }
        }

        if let Some(homepage) = self.discover_homepage(company, limit).await {
            let nav_links = self.discover_nav_links(&homepage).await;
            let found = self
                .first_valid_candidate(company, &nav_links, "homepage-nav")
                .await;
            if found.is_some() {
                return found;
            }
        }

        if self.config.guess_domains {
            let guesses = guessed_career_urls(company);
            if let Some(url) = self.first_valid_candidate(company, &guesses, "domain-guess").await {
                return Some(url);
            }
        }

        None
    }

    async fn first_valid_candidate(
        &self,
        company: &str,
        candidates: &[String],
        strategy: &str,
    ) -> Option<String> {
        let aggregators = &self.config.keywords.aggregator_domains;
        for raw in candidates {
            let Some(url) = normalize_search_result(raw) else {
                continue;
            };
            if is_aggregator(&url, aggregators) {
                continue;
            }
            if is_valid_career_page(self.session, &url, self.config).await {
                info!("Strategy {} succeeded for {} with {}", strategy, company, url);
                return Some(url);
            }
        }
        debug!("Strategy {} found no valid page for {}", strategy, company);
        None
    }

    /// First non-aggregator result for the bare company name.
    async fn discover_homepage(&self, company: &str, limit: usize) -> Option<String> {
        match self.search.search(SearchStrategy::DuckDuckGo, company, limit).await {
            Ok(candidates) => candidates
                .into_iter()
                .find(|url| !is_aggregator(url, &self.config.keywords.aggregator_domains)),
            Err(e) => {
                warn!("Homepage discovery failed for {} ({})", company, e);
                None
            }
        }
    }

    /// Absolute URLs of homepage anchors that look like careers navigation.
    async fn discover_nav_links(&self, homepage: &str) -> Vec<String> {
        let mut page = match self.session.acquire_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("No page available for {}: {}", homepage, e);
                return Vec::new();
            }
        };

        let links = match page.navigate(homepage).await {
            Ok(response) if response.status == 200 => {
                nav_links(&response.url, &page.anchors(), &self.config.keywords.nav)
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("Homepage {} failed to load: {}", homepage, e);
                Vec::new()
            }
        };
        page.close().await;
        links
    }
}

fn nav_links(
    base: &str,
    anchors: &[crate::browser::Anchor],
    nav_keywords: &[String],
) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let mut links: Vec<String> = Vec::new();
    for anchor in anchors {
        let Some(href) = anchor.href.as_deref() else {
            continue;
        };
        let text = anchor.text.to_lowercase();
        if !contains_any(&text, nav_keywords) && !contains_any(&href.to_lowercase(), nav_keywords) {
            continue;
        }
        if let Ok(joined) = base.join(href) {
            let joined = joined.to_string();
            if !links.contains(&joined) {
                links.push(joined);
            }
        }
    }
    links
}

/// The company name with one trailing corporate suffix removed, if any.
pub fn safe_mode_variant(company: &str, suffixes: &[String]) -> Option<String> {
    let trimmed_name = company.trim();
    let lower = trimmed_name.to_lowercase();
    for suffix in suffixes {
        if lower.ends_with(suffix.as_str()) && lower.len() >= suffix.len() {
            let cut = trimmed_name.len() - suffix.len();
            if !trimmed_name.is_char_boundary(cut) {
                continue;
            }
            let stripped = trimmed_name[..cut].trim_matches([' ', ',', '.', '-']);
            if !stripped.is_empty() {
                return Some(stripped.to_string());
            }
        }
    }
    None
}

fn guessed_career_urls(company: &str) -> Vec<String> {
    let slug: String = company
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if slug.is_empty() {
        return Vec::new();
    }
    vec![
        format!("https://{}.com/careers", slug),
        format!("https://{}.co.uk/careers", slug),
    ]
}
