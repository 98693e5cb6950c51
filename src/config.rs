use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SPONSOR_URL: &str =
    "https://www.gov.uk/government/publications/register-of-licensed-sponsors-workers";
pub const DUCKDUCKGO_HTML_URL: &str = "https://duckduckgo.com/html/";
pub const BING_SEARCH_URL: &str = "https://www.bing.com/search";

/// Runtime configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sponsor_register_url: String,
    pub data_dir: PathBuf,
    pub resumes_dir: PathBuf,
    pub daily_job_limit: usize,
    pub max_companies: usize,
    pub concurrent_browsers: usize,
    pub min_match_score: u8,
    pub llm_model: String,
    pub openai_api_key: Option<String>,
    pub career_page_overrides: HashMap<String, String>,
    pub browser: BrowserConfig,
    pub discovery: DiscoveryConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let career_page_overrides = match env::var("CAREER_PAGES_FILE") {
            Ok(path) => load_overrides(Path::new(&path))?,
            Err(_) => HashMap::new(),
        };

        let keywords = match env::var("KEYWORDS_FILE") {
            Ok(path) => Keywords::from_file(Path::new(&path))?,
            Err(_) => Keywords::default(),
        };

        let browser = BrowserConfig {
            webdriver_url: env_or("WEBDRIVER_URL", "http://localhost:9515"),
            ..BrowserConfig::default()
        };

        Ok(Self {
            sponsor_register_url: env_or("SPONSOR_REGISTER_URL", DEFAULT_SPONSOR_URL),
            data_dir,
            resumes_dir: PathBuf::from(env_or("RESUMES_DIR", "resumes")),
            daily_job_limit: env_parse("DAILY_JOB_LIMIT", 25)?,
            max_companies: env_parse("MAX_COMPANIES", 150)?,
            concurrent_browsers: env_parse("CONCURRENT_BROWSERS", 4)?,
            min_match_score: env_parse("MIN_MATCH_SCORE", 60)?,
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            career_page_overrides,
            browser,
            discovery: DiscoveryConfig {
                keywords,
                ..DiscoveryConfig::default()
            },
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.resumes_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn raw_jobs_path(&self) -> PathBuf {
        self.data_dir.join("jobs_raw.csv")
    }

    pub fn ranked_jobs_path(&self) -> PathBuf {
        self.data_dir.join("jobs_ranked.csv")
    }

    pub fn targets_path(&self) -> PathBuf {
        self.data_dir.join("jobs.csv")
    }

    pub fn sponsor_csv_path(&self) -> PathBuf {
        self.data_dir.join("sponsor_register.csv")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("visa-hunt.db")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("run.log")
    }
}

fn default_data_dir() -> PathBuf {
    // XDG data directory, or the working directory
    directories::ProjectDirs::from("", "", "visa-hunt")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}

pub fn load_overrides(path: &Path) -> Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read career page overrides: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid career page overrides: {}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EnginePreference {
    /// WebDriver first, static HTTP rendering if no WebDriver is reachable
    Auto,
    #[value(name = "webdriver")]
    WebDriver,
    Static,
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub engine: EnginePreference,
    pub webdriver_url: String,
    pub headless: bool,
    /// Global cap on in-flight navigations across the whole run.
    pub navigation_limit: usize,
    pub navigation_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: EnginePreference::Auto,
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            navigation_limit: 3,
            navigation_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// A careers keyword in the title or body is enough.
    KeywordOnly,
    /// A careers keyword plus at least `min_links` career-related anchors.
    KeywordAndLinks { min_links: usize },
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub keywords: Keywords,
    pub search_limit: usize,
    pub search_timeout: Duration,
    pub duckduckgo_url: String,
    pub bing_url: String,
    pub validation: ValidationPolicy,
    pub min_job_body_chars: usize,
    pub guess_domains: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            keywords: Keywords::default(),
            search_limit: 5,
            search_timeout: Duration::from_secs(8),
            duckduckgo_url: DUCKDUCKGO_HTML_URL.to_string(),
            bing_url: BING_SEARCH_URL.to_string(),
            validation: ValidationPolicy::KeywordAndLinks { min_links: 3 },
            min_job_body_chars: 1000,
            guess_domains: false,
        }
    }
}

/// Keyword sets and the aggregator denylist. All matching is case-insensitive
/// substring matching, so entries are stored lowercase.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Keywords {
    pub career: Vec<String>,
    pub career_link: Vec<String>,
    pub nav: Vec<String>,
    pub job: Vec<String>,
    pub exclusion: Vec<String>,
    pub tech: Vec<String>,
    pub safe_mode_suffixes: Vec<String>,
    pub aggregator_domains: Vec<String>,
}

impl Default for Keywords {
    fn default() -> Self {
        Self {
            career: strings(&["career", "careers", "jobs", "join us", "work with us"]),
            career_link: strings(&[
                "job", "career", "vacanc", "opportun", "opening", "join", "work",
            ]),
            nav: strings(&["career", "careers", "jobs", "join", "work with us"]),
            job: strings(&["qa", "quality", "test", "testing", "sdet", "automation"]),
            exclusion: strings(&["contract", "intern", "graduate", "no sponsorship"]),
            tech: strings(&[
                "tech", "software", "digital", "ai", "data", "cloud", "robotics",
                "electronics", "automation", "solutions", "systems", "cyber",
            ]),
            safe_mode_suffixes: strings(&[" ltd", " limited", " europe", " uk"]),
            aggregator_domains: strings(&[
                "linkedin.com",
                "indeed.com",
                "glassdoor.com",
                "lever.co",
                "greenhouse.io",
                "myworkdayjobs.com",
                "workday.com",
                "workdayjobs.com",
                "smartrecruiters.com",
                "jobvite.com",
                "icims.com",
            ]),
        }
    }
}

impl Keywords {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read keywords file: {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid keywords file: {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: Keywords = serde_json::from_str(raw)?;
        Ok(parsed.normalized())
    }

    fn normalized(mut self) -> Self {
        for list in [
            &mut self.career,
            &mut self.career_link,
            &mut self.nav,
            &mut self.job,
            &mut self.exclusion,
            &mut self.tech,
            &mut self.aggregator_domains,
        ] {
            for entry in list.iter_mut() {
                *entry = entry.trim().to_lowercase();
            }
            list.retain(|entry| !entry.is_empty());
        }
        // suffixes keep their leading space
        for suffix in self.safe_mode_suffixes.iter_mut() {
            *suffix = suffix.to_lowercase();
        }
        self
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// True when `haystack` (already lowercase) contains any of `keywords`.
pub fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}
