// Forensic map export - decode the base64 overlays that come with a result
use crate::models::AnalysisResult;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    Ela,
    Prnu,
    Gradcam,
}

impl MapKind {
    pub fn file_suffix(&self) -> &'static str {
        match self {
            MapKind::Ela => "ela",
            MapKind::Prnu => "prnu",
            MapKind::Gradcam => "gradcam",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            MapKind::Ela => "ELA map",
            MapKind::Prnu => "PRNU noise map",
            MapKind::Gradcam => "Grad-CAM map (AI focus regions)",
        }
    }

    fn payload(self, result: &AnalysisResult) -> Option<&str> {
        match self {
            MapKind::Ela => result.ela_base64_image.as_deref(),
            MapKind::Prnu => result.prnu_base64_image.as_deref(),
            MapKind::Gradcam => result.gradcam_base64_image.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum MapOutcome {
    Saved { path: PathBuf },
    Missing { note: &'static str },
    Invalid { reason: String },
}

/// Decode one overlay; `None` when the server did not send it
pub fn decode_map(result: &AnalysisResult, kind: MapKind) -> Option<Result<Vec<u8>>> {
    kind.payload(result).map(|data| {
        // Tolerate data-URL prefixes and line-wrapped payloads.
        let data = data.split_once("base64,").map_or(data, |(_, rest)| rest);
        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .with_context(|| format!("{} is not valid base64", kind.title()))
    })
}

/// Write every overlay as `<stem>_<kind>.png` in `dir`.
///
/// A broken or missing map is reported per entry and never fails the batch.
pub fn export_maps(result: &AnalysisResult, dir: &Path, stem: &str) -> Result<Vec<(MapKind, MapOutcome)>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut outcomes = Vec::new();
    for kind in [MapKind::Ela, MapKind::Prnu, MapKind::Gradcam] {
        let outcome = match decode_map(result, kind) {
            None => MapOutcome::Missing {
                note: missing_note(kind),
            },
            Some(Err(e)) => {
                warn!("{}", e);
                MapOutcome::Invalid {
                    reason: e.to_string(),
                }
            }
            Some(Ok(bytes)) => {
                let path = dir.join(format!("{}_{}.png", stem, kind.file_suffix()));
                fs::write(&path, bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                MapOutcome::Saved { path }
            }
        };
        outcomes.push((kind, outcome));
    }

    Ok(outcomes)
}

fn missing_note(kind: MapKind) -> &'static str {
    match kind {
        MapKind::Gradcam => "Grad-CAM map was not generated",
        MapKind::Ela => "ELA map was not returned",
        MapKind::Prnu => "PRNU map was not returned",
    }
}
