use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{JobOpportunity, VisaLikelihood};

// --- Provider trait ---

pub trait AIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

// --- OpenAI provider ---

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<OpenAIMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, model_id: &str) -> Result<Self> {
        Self::with_endpoint(api_key, model_id, OPENAI_API_URL)
    }

    pub fn with_endpoint(api_key: &str, model_id: &str, endpoint: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!(
                "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY=your-key-here"
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build OpenAI HTTP client")?;
        Ok(Self {
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

impl AIProvider for OpenAIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAIResponse = response
            .json()
            .context("Failed to parse OpenAI API response")?;

        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Job evaluation ---

/// Scores for one (job, resume) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub qa_relevance: u8,
    pub visa_likelihood: VisaLikelihood,
    pub resume_match_score: u8,
    pub reason: String,
}

const HEURISTIC_SKILLS: &[&str] = &[
    "automation",
    "selenium",
    "playwright",
    "cypress",
    "python",
    "pytest",
    "sdet",
    "qa",
];

const RESUME_EXCERPT_CHARS: usize = 3000;

/// Scores jobs against resumes with a completion provider when one is
/// configured, falling back to a keyword heuristic per job.
pub struct JobEvaluator {
    provider: Option<Box<dyn AIProvider>>,
}

impl JobEvaluator {
    pub fn new(provider: Option<Box<dyn AIProvider>>) -> Self {
        match &provider {
            Some(p) => info!("Scoring jobs with {}", p.model_name()),
            None => info!("OPENAI_API_KEY not set; using heuristic scoring"),
        }
        Self { provider }
    }

    pub fn heuristic() -> Self {
        Self { provider: None }
    }

    pub fn evaluate(&self, job: &JobOpportunity, resume_text: &str) -> Evaluation {
        let Some(provider) = &self.provider else {
            return heuristic_score(job, resume_text);
        };
        let prompt = evaluation_prompt(job, resume_text);
        match provider.complete(&prompt, 512).and_then(|raw| parse_evaluation(&raw)) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!("Scoring failed for {} ({:#}); using heuristic", job.url, e);
                heuristic_score(job, resume_text)
            }
        }
    }
}

fn evaluation_prompt(job: &JobOpportunity, resume_text: &str) -> String {
    let excerpt: String = resume_text.chars().take(RESUME_EXCERPT_CHARS).collect();
    format!(
        "You are assessing a job listing for a UK Skilled Worker visa sponsored QA/Automation position.\n\
        Return a STRICT JSON object with keys: qa_relevance (0-10), visa_likelihood (Low|Medium|High), \
        resume_match_score (0-100), reason (max 2 lines).\n\
        Consider these filters:\n\
        - Reject junior, graduate, intern, contract, or manual-only roles.\n\
        - Focus on QA / SDET / Automation / QE / QA Manager responsibilities.\n\
        - Rate visa likelihood based on the company being a licensed sponsor.\n\n\
        Job detail:\n\
        Title: {}\n\
        Company: {}\n\
        Description: {}\n\
        Resume excerpt: {}",
        job.title, job.company, job.snippet, excerpt
    )
}

/// Pull the first JSON object out of a completion and coerce its fields.
pub fn parse_evaluation(raw: &str) -> Result<Evaluation> {
    let re = Regex::new(r"(?s)\{.*\}").context("Invalid evaluation pattern")?;
    let json = re
        .find(raw)
        .map(|m| m.as_str())
        .ok_or_else(|| anyhow!("No JSON object in completion"))?;
    let value: Value = serde_json::from_str(json).context("Completion is not valid JSON")?;
    debug!("Raw evaluation: {}", value);

    Ok(Evaluation {
        qa_relevance: number_field(&value, "qa_relevance").min(10.0) as u8,
        visa_likelihood: value
            .get("visa_likelihood")
            .and_then(Value::as_str)
            .map(VisaLikelihood::parse)
            .unwrap_or(VisaLikelihood::Low),
        resume_match_score: number_field(&value, "resume_match_score").min(100.0) as u8,
        reason: value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

/// Numbers or numeric strings; anything else is 0.
fn number_field(value: &Value, key: &str) -> f64 {
    let n = match value.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    n.max(0.0)
}

pub fn heuristic_score(job: &JobOpportunity, resume_text: &str) -> Evaluation {
    let title = job.title.to_lowercase();
    let description = job.snippet.to_lowercase();
    let resume = resume_text.to_lowercase();

    let overlap = HEURISTIC_SKILLS.iter().filter(|s| resume.contains(*s)).count();
    let title_bonus = usize::from(title.contains("qa")) + usize::from(title.contains("sdet"));
    let qa_relevance = (overlap + title_bonus).min(10) as u8;
    let resume_match_score = (40 + overlap * 10).min(100) as u8;

    let visa_likelihood = if title.contains("contract") || description.contains("contract") {
        VisaLikelihood::Low
    } else {
        VisaLikelihood::High
    };

    Evaluation {
        qa_relevance,
        visa_likelihood,
        resume_match_score,
        reason: "Heuristic match without API".to_string(),
    }
}
