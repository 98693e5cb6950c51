use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOpportunity {
    pub company: String,
    pub title: String,
    pub url: String,
    pub source: String, // verified careers page the posting was found on
    pub snippet: String,
    pub qa_relevance: Option<u8>,
    pub visa_likelihood: Option<VisaLikelihood>,
    pub resume_match_score: Option<u8>,
    pub matched_resume: Option<String>,
}

impl JobOpportunity {
    pub fn new(company: &str, title: &str, url: &str, source: &str, snippet: String) -> Self {
        Self {
            company: company.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            source: source.to_string(),
            snippet,
            qa_relevance: None,
            visa_likelihood: None,
            resume_match_score: None,
            matched_resume: None,
        }
    }

    /// Identity used for deduplication across runs.
    pub fn job_id(&self) -> String {
        format!("{}|{}|{}", self.company, self.title, self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisaLikelihood {
    Low,
    Medium,
    High,
}

impl VisaLikelihood {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high" => VisaLikelihood::High,
            "medium" => VisaLikelihood::Medium,
            _ => VisaLikelihood::Low,
        }
    }
}

impl fmt::Display for VisaLikelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VisaLikelihood::Low => "Low",
            VisaLikelihood::Medium => "Medium",
            VisaLikelihood::High => "High",
        };
        f.write_str(label)
    }
}

/// A company whose careers page passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareerPage {
    pub company: String,
    pub career_page_url: String,
}

/// One row of the licensed sponsor register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sponsor {
    pub name: String,
    pub town: Option<String>,
    pub county: Option<String>,
    pub route: Option<String>,
    pub rating: Option<String>,
}

/// A scored job that cleared the match threshold for one resume.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedJob {
    pub job: JobOpportunity,
    pub reason: String,
}
