use std::collections::HashSet;

use tracing::{debug, warn};
use url::Url;

use crate::browser::{Anchor, BrowserSession, collapse};
use crate::config::{DiscoveryConfig, contains_any};
use crate::error::NavigationError;
use crate::models::JobOpportunity;
use crate::search::is_aggregator;

/// A job link that survived keyword filtering, awaiting validation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    url: String,
    anchor_text: String,
}

pub struct JobExtractor<'a> {
    session: &'a BrowserSession,
    config: &'a DiscoveryConfig,
}

impl<'a> JobExtractor<'a> {
    pub fn new(session: &'a BrowserSession, config: &'a DiscoveryConfig) -> Self {
        Self { session, config }
    }

    /// Validated postings linked from a verified careers page. A careers page
    /// that fails to load yields no jobs.
    pub async fn extract_jobs(&self, career_url: &str, company: &str) -> Vec<JobOpportunity> {
        let candidates = match self.collect_candidates(career_url).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Could not read careers page {} for {}: {}", career_url, company, e);
                return Vec::new();
            }
        };
        debug!("{} job link candidates on {}", candidates.len(), career_url);

        let mut jobs = Vec::new();
        for candidate in candidates {
            match self.validate_job_link(&candidate, company, career_url).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => debug!("Rejected job link {}", candidate.url),
                Err(e) => warn!("Job link {} failed to load: {}", candidate.url, e),
            }
        }
        jobs
    }

    async fn collect_candidates(
        &self,
        career_url: &str,
    ) -> Result<Vec<Candidate>, NavigationError> {
        let mut page = self.session.acquire_page().await?;
        let result = match page.navigate(career_url).await {
            Ok(response) if response.status == 200 => Ok(job_link_candidates(
                &response.url,
                &page.anchors(),
                self.config,
            )),
            Ok(response) => Err(NavigationError::Status {
                url: career_url.to_string(),
                status: response.status,
            }),
            Err(e) => Err(e),
        };
        page.close().await;
        result
    }

    /// `Ok(None)` is a content rejection; `Err` is a failed load. Either way
    /// only this link is dropped.
    async fn validate_job_link(
        &self,
        candidate: &Candidate,
        company: &str,
        career_url: &str,
    ) -> Result<Option<JobOpportunity>, NavigationError> {
        let mut page = self.session.acquire_page().await?;
        let outcome = match page.navigate(&candidate.url).await {
            Ok(response) if response.status == 200 => Ok(assess_job_page(
                &candidate.anchor_text,
                &page.title(),
                &page.body_text(),
                self.config,
            )),
            Ok(response) => Err(NavigationError::Status {
                url: candidate.url.clone(),
                status: response.status,
            }),
            Err(e) => Err(e),
        };
        page.close().await;

        Ok(outcome?.map(|(title, snippet)| {
            JobOpportunity::new(company, &title, &candidate.url, career_url, snippet)
        }))
    }
}

/// Keyword-matching anchors resolved against `base`, first occurrence of each
/// absolute URL only, aggregators dropped.
fn job_link_candidates(base: &str, anchors: &[Anchor], config: &DiscoveryConfig) -> Vec<Candidate> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let keywords = &config.keywords;
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();

    for anchor in anchors {
        let Some(href) = anchor.href.as_deref().filter(|h| !h.trim().is_empty()) else {
            continue;
        };
        let combined = format!("{} {}", anchor.text, href).to_lowercase();
        if !contains_any(&combined, &keywords.job) {
            continue;
        }
        let Ok(absolute) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }
        let absolute = absolute.to_string();
        if !seen.insert(absolute.clone()) {
            continue;
        }
        if is_aggregator(&absolute, &keywords.aggregator_domains) {
            continue;
        }
        candidates.push(Candidate {
            url: absolute,
            anchor_text: collapse(&anchor.text),
        });
    }
    candidates
}

/// Content checks on a rendered job page. Returns the title and the collapsed
/// body as snippet.
fn assess_job_page(
    anchor_text: &str,
    page_title: &str,
    body: &str,
    config: &DiscoveryConfig,
) -> Option<(String, String)> {
    let body = collapse(body);
    if body.chars().count() < config.min_job_body_chars {
        return None;
    }
    if contains_any(&body.to_lowercase(), &config.keywords.exclusion) {
        return None;
    }

    let title = if anchor_text.trim().is_empty() {
        collapse(page_title)
    } else {
        collapse(anchor_text)
    };
    if title.is_empty() {
        return None;
    }
    Some((title, body))
}
