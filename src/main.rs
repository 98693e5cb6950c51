mod ai;
mod browser;
mod careers;
mod config;
mod db;
mod error;
mod export;
mod extractor;
mod logging;
mod models;
mod pipeline;
mod resume;
mod scrape;
mod search;
mod sponsors;
#[cfg(test)]
mod testutil;
mod tui;
mod validator;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::{AppConfig, EnginePreference, ValidationPolicy};
use db::Database;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "visa-hunt")]
#[command(about = "Find QA roles at licensed visa sponsors - discover, score, track")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full run: sponsor register, career pages, job links, resume scoring
    Run {
        /// Read a local sponsor register CSV instead of downloading it
        #[arg(short, long)]
        register: Option<PathBuf>,

        /// Maximum number of sponsor companies to scrape
        #[arg(long)]
        max_companies: Option<usize>,

        /// Maximum number of ranked jobs to keep
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum resume match score (0-100)
        #[arg(long)]
        min_score: Option<u8>,

        #[command(flatten)]
        scrape: ScrapeArgs,
    },

    /// Find career pages and job links for the given companies
    Discover {
        /// Company names
        #[arg(required = true)]
        companies: Vec<String>,

        #[command(flatten)]
        scrape: ScrapeArgs,
    },

    /// Find the career page of a single company
    Locate {
        /// Company name
        company: String,

        #[command(flatten)]
        scrape: ScrapeArgs,
    },

    /// Inspect the seen-job set
    Seen {
        #[command(subcommand)]
        command: SeenCommands,
    },

    /// Show ranked jobs from previous runs
    Ranked {
        /// Number of jobs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Browse ranked jobs interactively
    Browse {
        /// Number of jobs to load
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum SeenCommands {
    /// Count seen jobs
    Count,

    /// List the most recently seen jobs
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Browser and discovery options shared by the scraping commands.
#[derive(Args)]
struct ScrapeArgs {
    /// Rendering engine
    #[arg(long, value_enum)]
    engine: Option<EnginePreference>,

    /// WebDriver endpoint (chromedriver, geckodriver)
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    visible: bool,

    /// Companies processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Accept any page mentioning careers, without counting career links
    #[arg(long)]
    keyword_only: bool,

    /// Try common careers URLs on guessed company domains
    #[arg(long)]
    guess_domains: bool,

    /// JSON file mapping company names to known career page URLs
    #[arg(long)]
    career_pages: Option<PathBuf>,
}

impl ScrapeArgs {
    fn apply(self, config: &mut AppConfig) -> Result<()> {
        if let Some(engine) = self.engine {
            config.browser.engine = engine;
        }
        if let Some(url) = self.webdriver_url {
            config.browser.webdriver_url = url;
        }
        if self.visible {
            config.browser.headless = false;
        }
        if let Some(workers) = self.workers {
            config.concurrent_browsers = workers.max(1);
        }
        if self.keyword_only {
            config.discovery.validation = ValidationPolicy::KeywordOnly;
        }
        if self.guess_domains {
            config.discovery.guess_domains = true;
        }
        if let Some(path) = self.career_pages {
            config.career_page_overrides = config::load_overrides(&path)?;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    match cli.command {
        Commands::Run {
            register,
            max_companies,
            limit,
            min_score,
            scrape,
        } => {
            scrape.apply(&mut config)?;
            if let Some(max) = max_companies {
                config.max_companies = max;
            }
            if let Some(limit) = limit {
                config.daily_job_limit = limit;
            }
            if let Some(score) = min_score {
                config.min_match_score = score.min(100);
            }
            config.ensure_directories()?;
            logging::init_logging(&config.log_path());

            let summary = pipeline::run_pipeline(&config, register.as_deref())?;
            println!("Companies scraped:  {}", summary.companies);
            println!("Career pages found: {}", summary.career_pages);
            println!("Jobs found:         {}", summary.jobs_found);
            println!("New jobs:           {}", summary.jobs_new);
            println!("Ranked:             {}", summary.ranked);
            if summary.ranked > 0 {
                println!("\nRanked jobs written to {}", config.ranked_jobs_path().display());
            }
        }

        Commands::Discover { companies, scrape } => {
            scrape.apply(&mut config)?;
            config.ensure_directories()?;
            logging::init_logging(&config.log_path());

            let outcome = pipeline::scrape_blocking(&config, &companies)?;
            if outcome.career_pages.is_empty() {
                println!("No career pages found.");
                return Ok(());
            }

            println!("{:<30} {}", "COMPANY", "CAREER PAGE");
            println!("{}", "-".repeat(80));
            for page in &outcome.career_pages {
                println!("{:<30} {}", truncate(&page.company, 28), page.career_page_url);
            }

            println!();
            if outcome.jobs.is_empty() {
                println!("No matching job links found.");
            } else {
                println!("{:<30} {:<40} {}", "COMPANY", "TITLE", "URL");
                println!("{}", "-".repeat(100));
                for job in &outcome.jobs {
                    println!(
                        "{:<30} {:<40} {}",
                        truncate(&job.company, 28),
                        truncate(&job.title, 38),
                        job.url
                    );
                }
            }
        }

        Commands::Locate { company, scrape } => {
            scrape.apply(&mut config)?;
            logging::init_logging_stderr();

            match pipeline::locate_blocking(&config, &company)? {
                Some(url) => println!("{}", url),
                None => println!("No career page found for {}", company),
            }
        }

        Commands::Seen { command } => {
            logging::init_logging_stderr();
            let db = Database::open_at(&config.db_path())?;
            match command {
                SeenCommands::Count => {
                    println!("{} jobs seen ({})", db.seen_count()?, db.path().display());
                }
                SeenCommands::List { limit } => {
                    let seen = db.list_seen(limit)?;
                    if seen.is_empty() {
                        println!("No jobs seen yet.");
                    } else {
                        println!("{:<27} {}", "FIRST SEEN", "JOB");
                        println!("{}", "-".repeat(80));
                        for (job_id, first_seen) in seen {
                            println!("{:<27} {}", first_seen, job_id);
                        }
                    }
                }
            }
        }

        Commands::Ranked { limit } => {
            logging::init_logging_stderr();
            let db = Database::open_at(&config.db_path())?;
            let rankings = db.list_ranked(limit)?;
            if rankings.is_empty() {
                println!("No ranked jobs yet. Run: visa-hunt run");
            } else {
                println!(
                    "{:>5} {:>3} {:<7} {:<30} {:<20} {:<16}",
                    "MATCH", "QA", "VISA", "TITLE", "COMPANY", "RESUME"
                );
                println!("{}", "-".repeat(86));
                for entry in rankings {
                    let job = &entry.ranked.job;
                    let visa = job
                        .visa_likelihood
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:>5} {:>3} {:<7} {:<30} {:<20} {:<16}",
                        score(job.resume_match_score),
                        score(job.qa_relevance),
                        visa,
                        truncate(&job.title, 28),
                        truncate(&job.company, 18),
                        truncate(job.matched_resume.as_deref().unwrap_or("-"), 16)
                    );
                    println!("      {}", job.url);
                }
            }
        }

        Commands::Browse { limit } => {
            let db = Database::open_at(&config.db_path())?;
            tui::run_browse(&db, limit)?;
        }
    }

    Ok(())
}

fn score(value: Option<u8>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max.saturating_sub(3)).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("QA Engineer", 20), "QA Engineer");
        assert_eq!(truncate("Ingénieur Qualité Logiciel", 12), "Ingénieur...");
    }

    #[test]
    fn test_cli_parses_discover_options() {
        let cli = Cli::try_parse_from([
            "visa-hunt",
            "discover",
            "Acme Software",
            "Beta Data",
            "--engine",
            "static",
            "--keyword-only",
            "-w",
            "2",
        ])
        .unwrap();
        let Commands::Discover { companies, scrape } = cli.command else {
            panic!("expected discover");
        };
        assert_eq!(companies, vec!["Acme Software", "Beta Data"]);
        assert_eq!(scrape.engine, Some(EnginePreference::Static));
        assert!(scrape.keyword_only);
        assert_eq!(scrape.workers, Some(2));
    }

    #[test]
    fn test_scrape_args_apply() {
        let cli = Cli::try_parse_from([
            "visa-hunt",
            "locate",
            "Acme",
            "--engine",
            "webdriver",
            "--guess-domains",
            "--visible",
        ])
        .unwrap();
        let Commands::Locate { scrape, .. } = cli.command else {
            panic!("expected locate");
        };
        let mut config = AppConfig::from_env().unwrap();
        scrape.apply(&mut config).unwrap();
        assert_eq!(config.browser.engine, EnginePreference::WebDriver);
        assert!(config.discovery.guess_domains);
        assert!(!config.browser.headless);
        assert_eq!(config.discovery.validation, ValidationPolicy::KeywordAndLinks { min_links: 3 });
    }
}
