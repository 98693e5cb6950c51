use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::ai::{AIProvider, JobEvaluator, OpenAIProvider};
use crate::config::AppConfig;
use crate::db::Database;
use crate::export;
use crate::models::{JobOpportunity, RankedJob};
use crate::resume::load_resumes;
use crate::scrape::{self, ScrapeOutcome};
use crate::sponsors;

#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub companies: usize,
    pub career_pages: usize,
    pub jobs_found: usize,
    pub jobs_new: usize,
    pub ranked: usize,
}

#[derive(Debug, Default)]
pub struct Ranking {
    pub ranked: Vec<RankedJob>,
    /// Identities of every job that was scored, ranked or not.
    pub evaluated: Vec<String>,
}

/// Full run: sponsor register, scrape, score, persist.
/// `register` skips the download and reads a local CSV instead.
pub fn run_pipeline(config: &AppConfig, register: Option<&Path>) -> Result<PipelineSummary> {
    config.ensure_directories()?;
    let mut db = Database::open_at(&config.db_path())?;

    let register_path = match register {
        Some(path) => path.to_path_buf(),
        None => {
            sponsors::download_register(&config.sponsor_register_url, &config.sponsor_csv_path())?;
            config.sponsor_csv_path()
        }
    };
    let targets = sponsors::load_tech_sponsors(
        &register_path,
        &config.discovery.keywords,
        config.max_companies,
    )?;
    let companies: Vec<String> = targets.iter().map(|s| s.name.clone()).collect();

    info!("Scraping {} companies for QA roles", companies.len());
    let outcome = scrape_blocking(config, &companies)?;
    info!("Discovered {} potential jobs", outcome.jobs.len());

    export::write_targets(&config.targets_path(), &targets, &outcome.career_pages)?;
    export::write_jobs(&config.raw_jobs_path(), &outcome.jobs)?;

    let mut summary = PipelineSummary {
        companies: companies.len(),
        career_pages: outcome.career_pages.len(),
        jobs_found: outcome.jobs.len(),
        ..PipelineSummary::default()
    };

    let unseen = db.filter_unseen(outcome.jobs)?;
    summary.jobs_new = unseen.len();

    let resumes = load_resumes(&config.resumes_dir)?;
    if resumes.is_empty() {
        warn!("No resumes to score against; leaving {} new jobs unseen", unseen.len());
        return Ok(summary);
    }

    let evaluator = JobEvaluator::new(build_provider(config));
    let ranking = rank_jobs(
        &unseen,
        &resumes,
        &evaluator,
        config.min_match_score,
        config.daily_job_limit,
    );

    let added = db.append_seen(&ranking.evaluated)?;
    info!("Recorded {} newly seen jobs", added);

    summary.ranked = ranking.ranked.len();
    if ranking.ranked.is_empty() {
        warn!("No jobs passed filtering or resume match threshold");
        return Ok(summary);
    }

    export::write_ranked(&config.ranked_jobs_path(), &ranking.ranked)?;
    let run_at = chrono::Utc::now().to_rfc3339();
    db.save_ranked(&run_at, &ranking.ranked)?;
    Ok(summary)
}

/// Scraping is single-threaded cooperative concurrency.
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

pub fn scrape_blocking(config: &AppConfig, companies: &[String]) -> Result<ScrapeOutcome> {
    runtime()?.block_on(scrape::run(
        &config.browser,
        &config.discovery,
        &config.career_page_overrides,
        companies,
        config.concurrent_browsers,
    ))
}

pub fn locate_blocking(config: &AppConfig, company: &str) -> Result<Option<String>> {
    runtime()?.block_on(scrape::locate(
        &config.browser,
        &config.discovery,
        &config.career_page_overrides,
        company,
    ))
}

fn build_provider(config: &AppConfig) -> Option<Box<dyn AIProvider>> {
    let key = config.openai_api_key.as_deref()?;
    match OpenAIProvider::new(key, &config.llm_model) {
        Ok(provider) => Some(Box::new(provider)),
        Err(e) => {
            warn!("OpenAI provider unavailable ({:#}); using heuristic scoring", e);
            None
        }
    }
}

/// Score each job against every resume. Stops taking new jobs once `limit`
/// records are ranked; output is best match first.
pub fn rank_jobs(
    jobs: &[JobOpportunity],
    resumes: &BTreeMap<String, String>,
    evaluator: &JobEvaluator,
    min_score: u8,
    limit: usize,
) -> Ranking {
    let mut ranking = Ranking::default();
    for job in jobs {
        if ranking.ranked.len() >= limit {
            break;
        }
        for (resume_name, resume_text) in resumes {
            let evaluation = evaluator.evaluate(job, resume_text);
            if evaluation.resume_match_score < min_score {
                continue;
            }
            let mut scored = job.clone();
            scored.qa_relevance = Some(evaluation.qa_relevance);
            scored.visa_likelihood = Some(evaluation.visa_likelihood);
            scored.resume_match_score = Some(evaluation.resume_match_score);
            scored.matched_resume = Some(resume_name.clone());
            ranking.ranked.push(RankedJob {
                job: scored,
                reason: evaluation.reason,
            });
        }
        ranking.evaluated.push(job.job_id());
    }

    ranking.ranked.sort_by(|a, b| {
        let key = |r: &RankedJob| (r.job.resume_match_score, r.job.qa_relevance);
        key(b).cmp(&key(a))
    });
    ranking.ranked.truncate(limit);
    ranking
}
