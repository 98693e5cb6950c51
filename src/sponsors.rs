use anyhow::{anyhow, Context, Result};
use scraper::{Html, Selector};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::{Keywords, contains_any};
use crate::models::Sponsor;

const COMPANY_COLUMNS: &[&str] = &[
    "Organisation Name",
    "Organisation",
    "Organization Name",
    "Company Name",
    "OrganisationName",
    "Name",
];

/// Names at least this similar (after suffix stripping) count as one company.
const DUPLICATE_SIMILARITY: f64 = 0.92;

/// Fetch the register to `dest`. The published URL is an HTML page linking
/// the CSV, so an HTML response is followed to its first `.csv` link.
pub fn download_register(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(crate::browser::USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let (final_url, body) = fetch(&client, url)?;
    let bytes = if looks_like_html(&body) {
        let page = String::from_utf8_lossy(&body);
        let csv_url = first_csv_link(&final_url, &page)
            .ok_or_else(|| anyhow!("No CSV link found on sponsor register page {}", url))?;
        info!("Following sponsor register link {}", csv_url);
        fetch(&client, &csv_url)?.1
    } else {
        body
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, &bytes)
        .with_context(|| format!("Failed to write sponsor register: {}", dest.display()))?;
    info!("Downloaded sponsor register to {} ({} bytes)", dest.display(), bytes.len());
    Ok(())
}

fn fetch(client: &reqwest::blocking::Client, url: &str) -> Result<(String, Vec<u8>)> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to download {}", url))?;
    if !response.status().is_success() {
        return Err(anyhow!("Download of {} failed with status {}", url, response.status()));
    }
    let final_url = response.url().to_string();
    let body = response
        .bytes()
        .with_context(|| format!("Failed to read body of {}", url))?;
    Ok((final_url, body.to_vec()))
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(512)]).to_lowercase();
    let head = head.trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<head")
}

fn first_csv_link(base: &str, html: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").ok()?;
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .find(|u| u.path().to_lowercase().ends_with(".csv"))
        .map(|u| u.to_string())
}

/// Tech-looking sponsors from a register CSV, near-duplicates collapsed,
/// capped at `max_companies`.
pub fn load_tech_sponsors(
    path: &Path,
    keywords: &Keywords,
    max_companies: usize,
) -> Result<Vec<Sponsor>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open sponsor register: {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim_start_matches('\u{feff}') == name);
    let name_idx = COMPANY_COLUMNS
        .iter()
        .find_map(|c| column(*c))
        .ok_or_else(|| anyhow!("Unable to locate company name column in sponsor register"))?;
    let town_idx = column("Town/City");
    let county_idx = column("County");
    let route_idx = column("Route");
    let rating_idx = column("Type & Rating");

    let mut sponsors: Vec<Sponsor> = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    let mut rows = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping malformed register row: {}", e);
                continue;
            }
        };
        rows += 1;
        let field = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let Some(name) = field(Some(name_idx)) else {
            continue;
        };
        if !contains_any(&name.to_lowercase(), &keywords.tech) {
            continue;
        }

        let key = dedupe_key(&name, &keywords.safe_mode_suffixes);
        if keys.iter().any(|k| is_near_duplicate(k, &key)) {
            continue;
        }
        keys.push(key);
        sponsors.push(Sponsor {
            name,
            town: field(town_idx),
            county: field(county_idx),
            route: field(route_idx),
            rating: field(rating_idx),
        });
        if sponsors.len() >= max_companies {
            break;
        }
    }

    info!("Selected {} tech sponsors from {} register rows", sponsors.len(), rows);
    Ok(sponsors)
}

fn dedupe_key(name: &str, suffixes: &[String]) -> String {
    let punctuation = [' ', ',', '.', '-'];
    let mut key = name.trim().to_lowercase().trim_end_matches(punctuation).to_string();
    for suffix in suffixes {
        if let Some(stripped) = key.strip_suffix(suffix.as_str()) {
            key = stripped.trim_end_matches(punctuation).to_string();
        }
    }
    key.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_near_duplicate(a: &str, b: &str) -> bool {
    a == b || strsim::normalized_levenshtein(a, b) >= DUPLICATE_SIMILARITY
}
