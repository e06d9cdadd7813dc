// Wire types for the analysis server and the Abshr bridge
use crate::verdict::{classify, Verdict};
use serde::{Deserialize, Serialize};

/// Body of a successful `/api/analyze` call.
///
/// Also the request body for `/api/download_report`, so every field the server
/// sent is serialized back unchanged (unknown keys included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ela_score: f64,
    pub prnu_score: f64,
    pub ai_score_raw: f64,
    pub final_combined_score: f64,
    #[serde(default)]
    pub ela_message: String,
    #[serde(default)]
    pub prnu_message: String,
    #[serde(default)]
    pub ai_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ela_base64_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prnu_base64_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradcam_base64_image: Option<String>,
    /// Only present when the server changed the quota
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tries_left: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisResult {
    pub fn verdict(&self) -> Verdict {
        classify(self.final_combined_score)
    }
}

/// Error body returned with 402 and most other failures
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tries_left: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriesPayload {
    pub tries_left: i64,
    #[serde(default)]
    pub is_subscribed: Option<bool>,
}

/// Verdict vocabulary of the verification service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AbshrVerdict {
    Clean,
    Caution,
    Forged,
    Other(String),
}

impl From<String> for AbshrVerdict {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CLEAN" => AbshrVerdict::Clean,
            "CAUTION" => AbshrVerdict::Caution,
            "FORGED" => AbshrVerdict::Forged,
            _ => AbshrVerdict::Other(s),
        }
    }
}

impl From<AbshrVerdict> for String {
    fn from(v: AbshrVerdict) -> Self {
        match v {
            AbshrVerdict::Clean => "CLEAN".to_string(),
            AbshrVerdict::Caution => "CAUTION".to_string(),
            AbshrVerdict::Forged => "FORGED".to_string(),
            AbshrVerdict::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityForensicsResult {
    pub confidence_score: f64,
    pub abshr_verdict: AbshrVerdict,
    pub report_url: String,
}

/// `{status: "success", ...}` or `{status: "error", message}`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AbshrResponse {
    Success(SecurityForensicsResult),
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        message_ar: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest<'a> {
    pub plan: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_subscribed: bool,
}

#[cfg(test)]
pub(crate) fn sample_result(final_score: f64, tries_left: i64) -> AnalysisResult {
    AnalysisResult {
        ela_score: 12.3,
        prnu_score: 45.0,
        ai_score_raw: 90.1,
        final_combined_score: final_score,
        ela_message: "ELA: compression inconsistencies".to_string(),
        prnu_message: "PRNU: noise pattern mismatch".to_string(),
        ai_message: "AI: likely generated".to_string(),
        ela_base64_image: None,
        prnu_base64_image: None,
        gradcam_base64_image: None,
        tries_left: Some(tries_left),
        extra: serde_json::Map::new(),
    }
}
