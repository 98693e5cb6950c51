use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::{JobOpportunity, RankedJob, VisaLikelihood};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

/// A row of the ranked table, with the run it belongs to.
#[derive(Debug, Clone)]
pub struct StoredRanking {
    pub ranked: RankedJob,
    pub run_at: String,
}

impl Database {
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Self {
            conn,
            path: path.to_path_buf(),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS seen_jobs (
                job_id TEXT PRIMARY KEY,
                first_seen_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS ranked_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_at TEXT NOT NULL,
                job_id TEXT NOT NULL,
                company TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                source TEXT NOT NULL,
                snippet TEXT NOT NULL,
                qa_relevance INTEGER,
                visa_likelihood TEXT,
                resume_match_score INTEGER,
                matched_resume TEXT,
                reason TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_ranked_run ON ranked_jobs(run_at);
            "#,
        )?;
        Ok(())
    }

    // --- Seen set ---

    pub fn load_seen(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT job_id FROM seen_jobs")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<HashSet<_>, _>>()
            .context("Failed to load seen jobs")
    }

    /// Union `job_ids` into the seen set. Returns how many were new.
    pub fn append_seen<'a, I>(&mut self, job_ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO seen_jobs (job_id) VALUES (?1)")?;
            for id in job_ids {
                inserted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn seen_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM seen_jobs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn list_seen(&self, limit: usize) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, first_seen_at FROM seen_jobs ORDER BY first_seen_at DESC, job_id LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list seen jobs")
    }

    /// Jobs whose identity is not yet in the seen set, first occurrence only.
    pub fn filter_unseen(&self, jobs: Vec<JobOpportunity>) -> Result<Vec<JobOpportunity>> {
        let mut seen = self.load_seen()?;
        Ok(jobs
            .into_iter()
            .filter(|job| seen.insert(job.job_id()))
            .collect())
    }

    // --- Ranked results ---

    pub fn save_ranked(&mut self, run_at: &str, ranked: &[RankedJob]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ranked_jobs (run_at, job_id, company, title, url, source, snippet,
                    qa_relevance, visa_likelihood, resume_match_score, matched_resume, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for r in ranked {
                let job = &r.job;
                stmt.execute(params![
                    run_at,
                    job.job_id(),
                    job.company,
                    job.title,
                    job.url,
                    job.source,
                    job.snippet,
                    job.qa_relevance,
                    job.visa_likelihood.map(|v| v.to_string()),
                    job.resume_match_score,
                    job.matched_resume,
                    r.reason,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent runs first, best matches first within a run.
    pub fn list_ranked(&self, limit: usize) -> Result<Vec<StoredRanking>> {
        let mut stmt = self.conn.prepare(
            "SELECT company, title, url, source, snippet, qa_relevance, visa_likelihood,
                    resume_match_score, matched_resume, reason, run_at
             FROM ranked_jobs
             ORDER BY run_at DESC, resume_match_score DESC, qa_relevance DESC, id
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], Self::row_to_ranking)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list ranked jobs")
    }

    fn row_to_ranking(row: &rusqlite::Row) -> rusqlite::Result<StoredRanking> {
        let visa: Option<String> = row.get(6)?;
        Ok(StoredRanking {
            ranked: RankedJob {
                job: JobOpportunity {
                    company: row.get(0)?,
                    title: row.get(1)?,
                    url: row.get(2)?,
                    source: row.get(3)?,
                    snippet: row.get(4)?,
                    qa_relevance: row.get(5)?,
                    visa_likelihood: visa.as_deref().map(VisaLikelihood::parse),
                    resume_match_score: row.get(7)?,
                    matched_resume: row.get(8)?,
                },
                reason: row.get(9)?,
            },
            run_at: row.get(10)?,
        })
    }
}
