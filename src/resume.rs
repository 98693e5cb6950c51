use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Every readable resume in `dir`, keyed by file name. Unreadable files are
/// skipped with a warning; a missing directory is simply empty.
pub fn load_resumes(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut resumes = BTreeMap::new();
    if !dir.exists() {
        warn!("Resume directory {} does not exist", dir.display());
        return Ok(resumes);
    }

    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read resume directory: {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        match read_resume(&path) {
            Ok(Some(text)) => {
                info!("Loaded resume {} ({} chars)", name, text.chars().count());
                resumes.insert(name, text);
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping resume {}: {:#}", name, e),
        }
    }

    if resumes.is_empty() {
        warn!("No resumes found in {}", dir.display());
    }
    Ok(resumes)
}

/// `Ok(None)` for files that are not resumes.
fn read_resume(path: &Path) -> Result<Option<String>> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let text = match extension.as_str() {
        "pdf" => pdf_extract::extract_text(path)
            .map_err(|e| anyhow!("PDF extraction failed: {}", e))?,
        "txt" | "md" => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        _ => return Ok(None),
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(anyhow!("no text extracted"));
    }
    Ok(Some(text))
}
