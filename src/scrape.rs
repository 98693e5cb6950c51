use std::collections::HashMap;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::careers::CareerLocator;
use crate::config::{BrowserConfig, DiscoveryConfig};
use crate::extractor::JobExtractor;
use crate::models::{CareerPage, JobOpportunity};
use crate::search::SearchClient;

/// Everything one scrape found. Order carries no meaning.
#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub jobs: Vec<JobOpportunity>,
    pub career_pages: Vec<CareerPage>,
}

/// Launch one browser session, scrape every company, shut the session down.
/// Only a missing rendering engine fails the run.
pub async fn run(
    browser: &BrowserConfig,
    discovery: &DiscoveryConfig,
    overrides: &HashMap<String, String>,
    companies: &[String],
    workers: usize,
) -> Result<ScrapeOutcome> {
    let session = BrowserSession::launch(browser).await?;
    let outcome = scrape_with_session(&session, discovery, overrides, companies, workers).await;
    session.shutdown().await;
    outcome
}

pub async fn scrape_with_session(
    session: &BrowserSession,
    discovery: &DiscoveryConfig,
    overrides: &HashMap<String, String>,
    companies: &[String],
    workers: usize,
) -> Result<ScrapeOutcome> {
    let search = SearchClient::new(discovery)?;
    let locator = CareerLocator::new(session, &search, discovery);
    let extractor = JobExtractor::new(session, discovery);
    let fan_out = Semaphore::new(workers.max(1));

    info!("Scraping {} companies with {} workers", companies.len(), workers.max(1));

    let tasks = companies.iter().map(|company| {
        let locator = &locator;
        let extractor = &extractor;
        let fan_out = &fan_out;
        async move {
            let Ok(_permit) = fan_out.acquire().await else {
                return None;
            };
            scrape_company(locator, extractor, overrides.get(company), company).await
        }
    });

    let mut outcome = ScrapeOutcome::default();
    for (page, jobs) in join_all(tasks).await.into_iter().flatten() {
        outcome.career_pages.push(page);
        outcome.jobs.extend(jobs);
    }
    info!(
        "Scrape finished: {} career pages, {} jobs",
        outcome.career_pages.len(),
        outcome.jobs.len()
    );
    Ok(outcome)
}

/// Career page discovery for a single company, without extraction.
pub async fn locate(
    browser: &BrowserConfig,
    discovery: &DiscoveryConfig,
    overrides: &HashMap<String, String>,
    company: &str,
) -> Result<Option<String>> {
    let session = BrowserSession::launch(browser).await?;
    let found = match SearchClient::new(discovery) {
        Ok(search) => {
            let locator = CareerLocator::new(&session, &search, discovery);
            Ok(career_page_for(&locator, overrides.get(company), company).await)
        }
        Err(e) => Err(e),
    };
    session.shutdown().await;
    found
}

/// A validated override wins; otherwise the full strategy chain.
async fn career_page_for(
    locator: &CareerLocator<'_>,
    override_url: Option<&String>,
    company: &str,
) -> Option<String> {
    if let Some(url) = override_url {
        if let Some(found) = locator.verify_override(company, url).await {
            return Some(found);
        }
        warn!("Career page override for {} did not validate: {}", company, url);
    }
    locator.find_career_page(company, None).await
}

/// Discovery strictly before extraction for one company.
async fn scrape_company(
    locator: &CareerLocator<'_>,
    extractor: &JobExtractor<'_>,
    override_url: Option<&String>,
    company: &str,
) -> Option<(CareerPage, Vec<JobOpportunity>)> {
    let career_url = career_page_for(locator, override_url, company).await?;

    let jobs = extractor.extract_jobs(&career_url, company).await;
    if jobs.is_empty() {
        info!("No jobs found for {} on {}", company, career_url);
    } else {
        info!("Found {} jobs for {}", jobs.len(), company);
    }

    Some((
        CareerPage {
            company: company.to_string(),
            career_page_url: career_url,
        },
        jobs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnginePreference;
    use crate::testutil::{self, TestResponse, long_page};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CAREERS_HTML: &str = r#"<html><head><title>Careers</title></head><body>
        <a href="jobs/qa-lead">QA Lead</a>
        <a href="jobs/designer">Designer</a>
        <a href="vacancies">Vacancies</a></body></html>"#;

    fn static_browser() -> BrowserConfig {
        BrowserConfig {
            engine: EnginePreference::Static,
            navigation_timeout: Duration::from_secs(2),
            ..BrowserConfig::default()
        }
    }

    fn ddg_result(url: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        format!(r#"<a class="result__a" href="//duckduckgo.com/l/?uddg={}">r</a>"#, encoded)
    }

    fn site() -> String {
        testutil::serve(|req, base| match req.path.as_str() {
            "/ddg" if req.q() == "Acme careers jobs" => {
                TestResponse::html(ddg_result(&format!("{}acme/careers", base)))
            }
            "/ddg" if req.q() == "Empty careers jobs" => {
                TestResponse::html(ddg_result(&format!("{}empty/careers", base)))
            }
            "/ddg" | "/bing" => TestResponse::html("<html></html>"),
            "/acme/careers" | "/empty/careers" | "/override/careers" => {
                TestResponse::html(CAREERS_HTML)
            }
            "/acme/jobs/qa-lead" => TestResponse::html(long_page("QA Lead", "Own quality")),
            _ => TestResponse::not_found(),
        })
    }

    fn discovery(base: &str) -> DiscoveryConfig {
        DiscoveryConfig {
            duckduckgo_url: format!("{}ddg", base),
            bing_url: format!("{}bing", base),
            search_timeout: Duration::from_secs(2),
            ..DiscoveryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_mixed_companies_never_fail_the_run() {
        let base = site();
        let discovery = discovery(&base);
        let companies = vec![
            "Acme".to_string(),
            "Nowhere Ltd".to_string(),
            "Empty".to_string(),
        ];

        let outcome = run(&static_browser(), &discovery, &HashMap::new(), &companies, 2)
            .await
            .unwrap();

        let mut pages: Vec<(String, String)> = outcome
            .career_pages
            .iter()
            .map(|p| (p.company.clone(), p.career_page_url.clone()))
            .collect();
        pages.sort();
        assert_eq!(
            pages,
            vec![
                ("Acme".to_string(), format!("{}acme/careers", base)),
                ("Empty".to_string(), format!("{}empty/careers", base)),
            ]
        );
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.jobs[0].company, "Acme");
        assert_eq!(outcome.jobs[0].url, format!("{}acme/jobs/qa-lead", base));
        assert_eq!(outcome.jobs[0].source, format!("{}acme/careers", base));
    }

    #[tokio::test]
    async fn test_dead_search_backends_yield_empty_outcome() {
        let dead = testutil::closed_url();
        let discovery = discovery(&dead);
        let companies = vec!["Acme Ltd".to_string(), "Beta".to_string()];

        let outcome = run(&static_browser(), &discovery, &HashMap::new(), &companies, 4)
            .await
            .unwrap();
        assert!(outcome.career_pages.is_empty());
        assert!(outcome.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_valid_override_skips_search() {
        let (base, hits) = testutil::serve_counted(|req, _base| match req.path.as_str() {
            "/override/careers" => TestResponse::html(CAREERS_HTML),
            _ => TestResponse::not_found(),
        });
        let discovery = discovery(&base);
        let mut overrides = HashMap::new();
        overrides.insert("Zed".to_string(), format!("{}override/careers", base));

        let session = BrowserSession::static_engine(&static_browser()).unwrap();
        let outcome = scrape_with_session(&session, &discovery, &overrides, &["Zed".to_string()], 1)
            .await
            .unwrap();

        assert_eq!(outcome.career_pages.len(), 1);
        assert_eq!(outcome.career_pages[0].career_page_url, format!("{}override/careers", base));
        // override validation, careers read, one 404 job link; no search traffic
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_locate_single_company() {
        let base = site();
        let discovery = discovery(&base);
        let found = locate(&static_browser(), &discovery, &HashMap::new(), "Acme")
            .await
            .unwrap();
        assert_eq!(found, Some(format!("{}acme/careers", base)));

        let missing = locate(&static_browser(), &discovery, &HashMap::new(), "Nowhere")
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    /// Slow careers pages for `count` overridden companies; tracks the peak
    /// number of requests being served at once.
    fn slow_careers_site(count: usize) -> (HashMap<String, String>, Arc<AtomicUsize>) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (serving, seen_peak) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let base = testutil::serve(move |req, _base| {
            let now = serving.fetch_add(1, Ordering::SeqCst) + 1;
            seen_peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
            serving.fetch_sub(1, Ordering::SeqCst);
            if req.path.ends_with("/careers") {
                TestResponse::html(
                    r#"<html><title>Careers</title><body>
                       <a href="vacancies">Vacancies</a>
                       <a href="opportunities">Opportunities</a>
                       <a href="join">Join us</a></body></html>"#,
                )
            } else {
                TestResponse::not_found()
            }
        });
        let overrides = (0..count)
            .map(|n| (format!("Company {}", n), format!("{}c{}/careers", base, n)))
            .collect();
        (overrides, peak)
    }

    #[tokio::test]
    async fn test_navigation_limit_caps_in_flight_loads() {
        let (overrides, peak) = slow_careers_site(8);
        let companies: Vec<String> = overrides.keys().cloned().collect();
        let browser = BrowserConfig {
            navigation_limit: 3,
            navigation_timeout: Duration::from_secs(10),
            ..static_browser()
        };
        let session = BrowserSession::static_engine(&browser).unwrap();
        let discovery = discovery(&testutil::closed_url());

        let outcome = scrape_with_session(&session, &discovery, &overrides, &companies, 8)
            .await
            .unwrap();

        assert_eq!(outcome.career_pages.len(), 8);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "{} navigations in flight", peak);
        assert!(peak >= 2, "companies were not processed concurrently");
    }

    #[tokio::test]
    async fn test_worker_limit_caps_companies_in_progress() {
        let (overrides, peak) = slow_careers_site(6);
        let companies: Vec<String> = overrides.keys().cloned().collect();
        let browser = BrowserConfig {
            navigation_limit: 10,
            navigation_timeout: Duration::from_secs(10),
            ..static_browser()
        };
        let session = BrowserSession::static_engine(&browser).unwrap();
        let discovery = discovery(&testutil::closed_url());

        let outcome = scrape_with_session(&session, &discovery, &overrides, &companies, 2)
            .await
            .unwrap();

        assert_eq!(outcome.career_pages.len(), 6);
        // each company navigates sequentially, so workers bound concurrency
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "{} navigations in flight", peak);
    }

    #[tokio::test]
    async fn test_launch_fails_without_any_engine() {
        let browser = BrowserConfig {
            engine: EnginePreference::WebDriver,
            webdriver_url: testutil::closed_url(),
            ..BrowserConfig::default()
        };
        let result = run(&browser, &DiscoveryConfig::default(), &HashMap::new(), &[], 1).await;
        assert!(result.is_err());
    }
}
