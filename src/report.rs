// Report retrieval - turns the retained analysis result into a PDF on disk
use crate::error::AnalysisError;
use crate::models::{AnalysisResult, ErrorPayload};
use crate::transport::{Transport, DOWNLOAD_REPORT_PATH};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const REPORT_PREFIX: &str = "Sedq_Analysis_Report_";

lazy_static! {
    static ref FILENAME_RE: Regex = Regex::new(r#"(?i)\bfilename\s*=\s*["']?([^"';]*)"#).unwrap();
}

/// Downloaded report bytes plus the name to save them under. Never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub bytes: Vec<u8>,
    pub suggested_filename: String,
}

impl ReportArtifact {
    /// Write into `dir` without clobbering an existing file; the handle is
    /// closed before this returns.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = unique_path(dir, &self.suggested_filename);
        fs::write(&path, &self.bytes)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Saved report to {}", path.display());
        Ok(path)
    }
}

/// Post the retained result and collect the PDF.
///
/// Every failure is a `ReportGeneration` error (or `Validation` when nothing has
/// been analyzed yet). The result is only borrowed, so a failure cannot
/// invalidate it and the call can be retried.
pub async fn retrieve<T: Transport>(
    transport: &T,
    last_result: Option<&AnalysisResult>,
) -> Result<ReportArtifact, AnalysisError> {
    let result = last_result.ok_or_else(|| {
        AnalysisError::Validation(
            "Please run an analysis before downloading a report.".to_string(),
        )
    })?;

    let body = serde_json::to_value(result)
        .map_err(|e| AnalysisError::ReportGeneration(e.to_string()))?;

    let reply = transport
        .post_json(DOWNLOAD_REPORT_PATH, &body)
        .await
        .map_err(|e| AnalysisError::ReportGeneration(e.to_string()))?;

    if !reply.is_success() {
        let detail = serde_json::from_slice::<ErrorPayload>(&reply.body)
            .ok()
            .and_then(|p| p.error)
            .unwrap_or_else(|| reply.body_text());
        return Err(AnalysisError::ReportGeneration(format!(
            "HTTP {} - {}",
            reply.status,
            detail.trim()
        )));
    }

    let suggested_filename = resolve_filename(
        reply.content_disposition.as_deref(),
        Utc::now().date_naive(),
    );
    debug!(
        "Report received: {} bytes as {}",
        reply.body.len(),
        suggested_filename
    );

    Ok(ReportArtifact {
        bytes: reply.body,
        suggested_filename,
    })
}

/// Name from `Content-Disposition`, or the dated fallback
pub fn resolve_filename(content_disposition: Option<&str>, today: NaiveDate) -> String {
    content_disposition
        .and_then(|header| FILENAME_RE.captures(header))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().trim_matches(|c| c == '"' || c == '\''))
        // Keep only the final path component of whatever the server sent.
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback_filename(today))
}

pub fn fallback_filename(today: NaiveDate) -> String {
    format!("{}{}.pdf", REPORT_PREFIX, today.format("%Y-%m-%d"))
}

fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
