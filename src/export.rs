use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::models::{CareerPage, JobOpportunity, RankedJob, Sponsor};

#[derive(Debug, Serialize)]
struct JobRow<'a> {
    company: &'a str,
    title: &'a str,
    url: &'a str,
    source: &'a str,
    snippet: &'a str,
    qa_relevance: Option<u8>,
    visa_likelihood: Option<String>,
    resume_match_score: Option<u8>,
    matched_resume: Option<&'a str>,
}

impl<'a> From<&'a JobOpportunity> for JobRow<'a> {
    fn from(job: &'a JobOpportunity) -> Self {
        Self {
            company: &job.company,
            title: &job.title,
            url: &job.url,
            source: &job.source,
            snippet: &job.snippet,
            qa_relevance: job.qa_relevance,
            visa_likelihood: job.visa_likelihood.map(|v| v.to_string()),
            resume_match_score: job.resume_match_score,
            matched_resume: job.matched_resume.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TargetRow<'a> {
    company: &'a str,
    career_page_url: &'a str,
    #[serde(rename = "Town/City")]
    town: &'a str,
    #[serde(rename = "County")]
    county: &'a str,
    #[serde(rename = "Route")]
    route: &'a str,
    #[serde(rename = "Type & Rating")]
    rating: &'a str,
}

fn writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(csv::Writer::from_writer(file))
}

pub fn write_jobs(path: &Path, jobs: &[JobOpportunity]) -> Result<()> {
    let mut out = writer(path)?;
    if jobs.is_empty() {
        out.write_record(JOB_HEADERS)?;
    }
    for job in jobs {
        out.serialize(JobRow::from(job))?;
    }
    out.flush()?;
    info!("Saved {} jobs to {}", jobs.len(), path.display());
    Ok(())
}

pub fn write_ranked(path: &Path, ranked: &[RankedJob]) -> Result<()> {
    let mut out = writer(path)?;
    out.write_record(RANKED_HEADERS)?;
    for r in ranked {
        out.write_record(ranked_record(r))?;
    }
    out.flush()?;
    info!("Saved ranked jobs to {}", path.display());
    Ok(())
}

/// Every target sponsor, with its verified careers page where one was found.
pub fn write_targets(path: &Path, sponsors: &[Sponsor], pages: &[CareerPage]) -> Result<()> {
    let found: HashMap<&str, &str> = pages
        .iter()
        .map(|p| (p.company.as_str(), p.career_page_url.as_str()))
        .collect();

    let mut out = writer(path)?;
    if sponsors.is_empty() {
        out.write_record(TARGET_HEADERS)?;
    }
    for sponsor in sponsors {
        out.serialize(TargetRow {
            company: &sponsor.name,
            career_page_url: found.get(sponsor.name.as_str()).copied().unwrap_or(""),
            town: sponsor.town.as_deref().unwrap_or(""),
            county: sponsor.county.as_deref().unwrap_or(""),
            route: sponsor.route.as_deref().unwrap_or(""),
            rating: sponsor.rating.as_deref().unwrap_or(""),
        })?;
    }
    out.flush()?;
    info!("Saved sponsor job targets to {}", path.display());
    Ok(())
}

const JOB_HEADERS: [&str; 9] = [
    "company",
    "title",
    "url",
    "source",
    "snippet",
    "qa_relevance",
    "visa_likelihood",
    "resume_match_score",
    "matched_resume",
];

const RANKED_HEADERS: [&str; 10] = [
    "company",
    "title",
    "url",
    "source",
    "snippet",
    "qa_relevance",
    "visa_likelihood",
    "resume_match_score",
    "matched_resume",
    "reason",
];

const TARGET_HEADERS: [&str; 6] = [
    "company",
    "career_page_url",
    "Town/City",
    "County",
    "Route",
    "Type & Rating",
];

fn ranked_record(r: &RankedJob) -> Vec<String> {
    let job = &r.job;
    let opt = |v: Option<u8>| v.map(|n| n.to_string()).unwrap_or_default();
    vec![
        job.company.clone(),
        job.title.clone(),
        job.url.clone(),
        job.source.clone(),
        job.snippet.clone(),
        opt(job.qa_relevance),
        job.visa_likelihood.map(|v| v.to_string()).unwrap_or_default(),
        opt(job.resume_match_score),
        job.matched_resume.clone().unwrap_or_default(),
        r.reason.clone(),
    ]
}
