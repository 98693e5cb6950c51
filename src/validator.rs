use tracing::{debug, warn};

use crate::browser::{Anchor, BrowserSession};
use crate::config::{DiscoveryConfig, Keywords, ValidationPolicy, contains_any};
use crate::search::is_aggregator;

/// Render `url` and decide whether it is a genuine careers page. Aggregators
/// are rejected without navigating. Any failure is a `false` verdict.
pub async fn is_valid_career_page(
    session: &BrowserSession,
    url: &str,
    config: &DiscoveryConfig,
) -> bool {
    if is_aggregator(url, &config.keywords.aggregator_domains) {
        debug!("Skipping aggregator {}", url);
        return false;
    }

    let mut page = match session.acquire_page().await {
        Ok(page) => page,
        Err(e) => {
            warn!("No page available to validate {}: {}", url, e);
            return false;
        }
    };

    let verdict = match page.navigate(url).await {
        Ok(response) if response.status == 200 => assess_career_page(
            &page.title(),
            &page.body_text(),
            &page.anchors(),
            &config.keywords,
            config.validation,
        ),
        Ok(response) => {
            debug!("Career candidate {} returned status {}", url, response.status);
            false
        }
        Err(e) => {
            warn!("Career candidate {} failed to load: {}", url, e);
            false
        }
    };
    page.close().await;
    verdict
}

/// The verdict on an already rendered page.
pub fn assess_career_page(
    title: &str,
    body: &str,
    anchors: &[Anchor],
    keywords: &Keywords,
    policy: ValidationPolicy,
) -> bool {
    let title = title.to_lowercase();
    let body = body.to_lowercase();
    if !contains_any(&title, &keywords.career) && !contains_any(&body, &keywords.career) {
        return false;
    }

    match policy {
        ValidationPolicy::KeywordOnly => true,
        ValidationPolicy::KeywordAndLinks { min_links } => {
            career_link_count(anchors, keywords, min_links) >= min_links
        }
    }
}

/// Anchors whose text or href mention a career-related keyword, counting no
/// further than `stop_at`.
fn career_link_count(anchors: &[Anchor], keywords: &Keywords, stop_at: usize) -> usize {
    anchors
        .iter()
        .filter(|a| {
            let combined = format!(
                "{} {}",
                a.text.to_lowercase(),
                a.href.as_deref().unwrap_or("").to_lowercase()
            );
            contains_any(&combined, &keywords.career_link)
        })
        .take(stop_at)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrowserConfig, EnginePreference};
    use crate::testutil::{self, TestResponse, WarningCapture};
    use std::sync::atomic::Ordering;

    fn anchor(text: &str, href: &str) -> Anchor {
        Anchor {
            text: text.to_string(),
            href: Some(href.to_string()),
        }
    }

    fn strict() -> ValidationPolicy {
        ValidationPolicy::KeywordAndLinks { min_links: 3 }
    }

    fn session() -> BrowserSession {
        BrowserSession::static_engine(&BrowserConfig {
            engine: EnginePreference::Static,
            ..BrowserConfig::default()
        })
        .unwrap()
    }

    const CAREERS_HTML: &str = r#"<html><head><title>Careers | Acme</title></head><body>
        <a href="/jobs/1">Senior QA Engineer</a>
        <a href="/jobs/2">Platform Engineer</a>
        <a href="/vacancies">All vacancies</a>
        <a href="/about">About</a></body></html>"#;

    #[test]
    fn test_strict_policy_needs_enough_career_links() {
        let keywords = Keywords::default();
        let anchors = vec![
            anchor("Open roles", "/jobs/1"),
            anchor("Life at Acme", "/careers/life"),
            anchor("Current vacancies", "/v"),
        ];
        assert!(assess_career_page("Careers", "", &anchors, &keywords, strict()));
        assert!(!assess_career_page("Careers", "", &anchors[..2], &keywords, strict()));
    }

    #[test]
    fn test_keyword_required_under_both_policies() {
        let keywords = Keywords::default();
        let anchors = vec![
            anchor("Jobs", "/jobs"),
            anchor("Job 2", "/jobs/2"),
            anchor("Job 3", "/jobs/3"),
        ];
        let verdict =
            assess_career_page("Acme Widgets", "We sell widgets", &anchors, &keywords, strict());
        assert!(!verdict);
        assert!(!assess_career_page(
            "Acme Widgets",
            "We sell widgets",
            &anchors,
            &keywords,
            ValidationPolicy::KeywordOnly
        ));
    }

    #[test]
    fn test_keyword_only_policy_accepts_single_mention() {
        let keywords = Keywords::default();
        assert!(assess_career_page(
            "Acme",
            "Want to WORK WITH US? Get in touch.",
            &[],
            &keywords,
            ValidationPolicy::KeywordOnly
        ));
        assert!(!assess_career_page("Acme", "Want to WORK WITH US?", &[], &keywords, strict()));
    }

    #[tokio::test]
    async fn test_validates_rendered_careers_page() {
        let base = testutil::serve(|req, _base| match req.path.as_str() {
            "/careers" => TestResponse::html(CAREERS_HTML),
            "/marketing" => TestResponse::html(
                "<html><title>Acme</title><body>See our careers page.<a href='/x'>x</a></body></html>",
            ),
            _ => TestResponse::not_found(),
        });
        let session = session();
        let config = DiscoveryConfig::default();
        let capture = WarningCapture::start();

        assert!(is_valid_career_page(&session, &format!("{}careers", base), &config).await);
        assert!(!is_valid_career_page(&session, &format!("{}marketing", base), &config).await);
        assert!(!is_valid_career_page(&session, &format!("{}gone", base), &config).await);
        let dead = testutil::closed_url();
        assert!(!is_valid_career_page(&session, &dead, &config).await);

        // failed loads are warnings, a page that is simply not a careers page is not
        let warnings = capture.contents();
        assert!(warnings.contains(&format!("{}gone", base)));
        assert!(warnings.contains(&dead));
        assert!(!warnings.contains("marketing"));
    }

    #[tokio::test]
    async fn test_aggregator_rejected_without_navigation() {
        let (base, hits) = testutil::serve_counted(|_req, _base| TestResponse::html(CAREERS_HTML));
        let session = session();
        let mut config = DiscoveryConfig::default();
        config.keywords.aggregator_domains.push("127.0.0.1".to_string());

        assert!(!is_valid_career_page(&session, &format!("{}careers", base), &config).await);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
