// Abshr security-forensics bridge - independent verification workflow
use crate::analysis::ImageUpload;
use crate::error::AnalysisError;
use crate::models::{AbshrResponse, AbshrVerdict, SecurityForensicsResult};
use crate::transport::{FormData, HttpReply, Transport, TransportError, ABSHR_PATH};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};

pub const FILE_REPORT_ACK: &str = "A security report has been recorded for this document. \
You will be referred to the competent authority to follow up.";

const UNKNOWN_ERROR: &str = "An unknown error occurred";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictTone {
    Clean,
    Caution,
    Tainted,
}

/// Rendered outcome of one successful bridge call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbshrView {
    pub tone: VerdictTone,
    pub message: &'static str,
    pub confidence: f64,
    pub confidence_label: String,
    pub show_download: bool,
    pub show_file_report: bool,
    /// `report_url` exactly as the service sent it
    pub report_url: String,
}

/// Single verdict mapping; anything that is not CLEAN or CAUTION is a forgery.
pub fn map_verdict(result: &SecurityForensicsResult) -> AbshrView {
    let (tone, message, show_file_report) = match result.abshr_verdict {
        AbshrVerdict::Clean => (
            VerdictTone::Clean,
            "Authenticity confirmed: the document is clean and trustworthy.",
            false,
        ),
        AbshrVerdict::Caution => (
            VerdictTone::Caution,
            "Warning: possible manipulation, please review the report.",
            true,
        ),
        AbshrVerdict::Forged | AbshrVerdict::Other(_) => (
            VerdictTone::Tainted,
            "Forgery confirmed: significant manipulation of the document was detected.",
            true,
        ),
    };

    AbshrView {
        tone,
        message,
        confidence: result.confidence_score,
        confidence_label: format!("{:.2}%", result.confidence_score),
        show_download: true,
        show_file_report,
        report_url: result.report_url.clone(),
    }
}

/// Where "download report" navigates. Absolute URLs are used as-is; relative
/// ones resolve against the server origin like a browser would.
pub fn report_link(base: &Url, report_url: &str) -> String {
    if Url::parse(report_url).is_ok() {
        return report_url.to_string();
    }
    base.join(report_url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| report_url.to_string())
}

/// Open the report in the system browser
pub fn open_report(base: &Url, view: &AbshrView) -> anyhow::Result<String> {
    let link = report_link(base, &view.report_url);
    info!("Opening report {}", link);
    open::that(&link)?;
    Ok(link)
}

/// "File a security report" is an acknowledgement only; nothing is submitted.
pub fn file_report(view: &AbshrView) -> Option<&'static str> {
    if !view.show_file_report {
        return None;
    }
    debug!("Security report acknowledged locally (no submission)");
    Some(FILE_REPORT_ACK)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

/// Image plus any extra form fields the service expects
#[derive(Debug, Clone)]
pub struct AbshrForm {
    pub image: ImageUpload,
    pub fields: Vec<(String, String)>,
}

impl AbshrForm {
    fn into_form_data(self) -> FormData {
        let form = FormData::new().file("image", &self.image.file_name, self.image.bytes);
        self.fields
            .iter()
            .fold(form, |form, (name, value)| form.text(name, value))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeView {
    pub state: BridgeState,
    pub busy: bool,
    pub submit_enabled: bool,
    pub status_message: String,
    pub result: Option<AbshrView>,
}

/// Drives the bridge. Shares nothing with the analysis controller.
pub struct SecurityForensicsBridge<T: Transport> {
    transport: T,
    state: BridgeState,
    status_message: String,
    result: Option<AbshrView>,
}

impl<T: Transport> SecurityForensicsBridge<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: BridgeState::Idle,
            status_message: String::new(),
            result: None,
        }
    }

    pub fn begin_submit(&mut self, form: &AbshrForm) -> Result<(), AnalysisError> {
        if self.state == BridgeState::Submitting {
            return Err(AnalysisError::Validation(
                "A verification is already in progress.".to_string(),
            ));
        }
        if form.image.bytes.is_empty() {
            return Err(self.fail(AnalysisError::Validation(
                "Please choose an image first.".to_string(),
            )));
        }

        self.state = BridgeState::Submitting;
        self.result = None;
        self.status_message = "Sending the file and starting the security analysis...".to_string();
        Ok(())
    }

    pub fn complete(
        &mut self,
        outcome: Result<HttpReply, TransportError>,
    ) -> Result<&AbshrView, AnalysisError> {
        if self.state != BridgeState::Submitting {
            return Err(AnalysisError::Validation(
                "No verification is in progress.".to_string(),
            ));
        }

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e.into())),
        };

        let parsed: AbshrResponse = match serde_json::from_slice(&reply.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Unreadable bridge response (HTTP {}): {}", reply.status, e);
                return Err(self.fail(AnalysisError::Network(format!(
                    "the verification service sent an unreadable response ({})",
                    e
                ))));
            }
        };

        match parsed {
            AbshrResponse::Success(result) => {
                let view = map_verdict(&result);
                info!(
                    "Bridge verdict {:?} ({})",
                    result.abshr_verdict, view.confidence_label
                );
                self.state = BridgeState::Succeeded;
                self.status_message = "Security analysis completed successfully.".to_string();
                let shown: &AbshrView = self.result.insert(view);
                Ok(shown)
            }
            AbshrResponse::Error {
                message,
                message_ar,
            } => {
                let message = message
                    .or(message_ar)
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                Err(self.fail(AnalysisError::Server(message)))
            }
        }
    }

    fn fail(&mut self, e: AnalysisError) -> AnalysisError {
        self.state = BridgeState::Failed;
        self.result = None;
        self.status_message = format!("Analysis failed: {}", e);
        e
    }

    pub async fn submit(&mut self, form: AbshrForm) -> Result<&AbshrView, AnalysisError> {
        self.begin_submit(&form)?;

        info!("Submitting {} to the verification service", form.image.file_name);
        let outcome = self
            .transport
            .post_form(ABSHR_PATH, form.into_form_data())
            .await;
        self.complete(outcome)
    }

    pub fn view(&self) -> BridgeView {
        let busy = self.state == BridgeState::Submitting;
        BridgeView {
            state: self.state,
            busy,
            submit_enabled: !busy,
            status_message: self.status_message.clone(),
            result: self.result.clone(),
        }
    }
}
