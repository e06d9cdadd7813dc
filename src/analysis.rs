// Analysis workflow - quota-gated upload, one analyze call, verdict, retained result
use crate::error::AnalysisError;
use crate::models::{AnalysisResult, ErrorPayload};
use crate::quota::{QuotaInitStrategy, QuotaStatus, QuotaTracker};
use crate::report::{self, ReportArtifact};
use crate::subscription;
use crate::transport::{FormData, HttpReply, Transport, TransportError, ANALYZE_PATH};
use crate::verdict::Verdict;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Ceiling enforced by the server; the client only warns about it
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const QUOTA_EXHAUSTED_DEFAULT: &str =
    "Your free analysis is used up. Please upgrade or subscribe for more analyses.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

/// One image chosen by the user
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

/// Displayed scores of the current result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub ela_score: f64,
    pub prnu_score: f64,
    pub ai_score: f64,
    pub final_score: f64,
    pub verdict: Verdict,
    pub ela_message: String,
    pub prnu_message: String,
    pub ai_message: String,
    pub has_gradcam: bool,
}

impl From<&AnalysisResult> for ResultView {
    fn from(r: &AnalysisResult) -> Self {
        Self {
            ela_score: r.ela_score,
            prnu_score: r.prnu_score,
            ai_score: r.ai_score_raw,
            final_score: r.final_combined_score,
            verdict: r.verdict(),
            ela_message: r.ela_message.clone(),
            prnu_message: r.prnu_message.clone(),
            ai_message: r.ai_message.clone(),
            has_gradcam: r.gradcam_base64_image.is_some(),
        }
    }
}

/// Everything a renderer needs, derived from workflow state
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisView {
    pub state: RequestState,
    pub busy: bool,
    pub submit_enabled: bool,
    pub submit_label: &'static str,
    pub quota: QuotaStatus,
    pub quota_label: String,
    pub result: Option<ResultView>,
    pub error: Option<String>,
    pub report_available: bool,
}

/// Pure state machine: `Idle -> Submitting -> {Succeeded | Failed}`.
///
/// Owns the quota and the single retained result. No I/O happens here; the
/// controller feeds it the transport outcome.
#[derive(Debug)]
pub struct AnalysisWorkflow {
    quota: QuotaTracker,
    state: RequestState,
    last_result: Option<AnalysisResult>,
    showing_result: bool,
    last_error: Option<AnalysisError>,
}

impl AnalysisWorkflow {
    pub fn new(quota: QuotaTracker) -> Self {
        Self {
            quota,
            state: RequestState::Idle,
            last_result: None,
            showing_result: false,
            last_error: None,
        }
    }

    /// Gate a submission and enter `Submitting`.
    ///
    /// A rejection while a request is pending leaves that request untouched.
    pub fn begin_submit(&mut self, upload: &ImageUpload) -> Result<(), AnalysisError> {
        if self.state == RequestState::Submitting {
            return Err(AnalysisError::Validation(
                "An analysis is already in progress.".to_string(),
            ));
        }

        if upload.bytes.is_empty() {
            return Err(self.fail(AnalysisError::Validation(
                "Please choose an image to analyze first.".to_string(),
            )));
        }

        if !self.quota.can_submit() {
            let locked = AnalysisError::QuotaExhausted {
                message: self.quota.status().label(),
                tries_left: Some(self.quota.tries_left()),
            };
            return Err(self.fail(locked));
        }

        if upload.bytes.len() > MAX_UPLOAD_BYTES {
            warn!(
                "{} is {} bytes; the server rejects uploads over 10 MB",
                upload.file_name,
                upload.bytes.len()
            );
        }

        self.state = RequestState::Submitting;
        self.showing_result = false;
        self.last_error = None;
        Ok(())
    }

    /// Apply the outcome of the analyze call
    pub fn complete(
        &mut self,
        outcome: Result<HttpReply, TransportError>,
    ) -> Result<&AnalysisResult, AnalysisError> {
        if self.state != RequestState::Submitting {
            return Err(AnalysisError::Validation(
                "No analysis is in progress.".to_string(),
            ));
        }

        match classify_reply(outcome) {
            Ok(result) => {
                if let Some(tries) = result.tries_left {
                    self.quota.update(tries);
                }
                self.state = RequestState::Succeeded;
                self.showing_result = true;
                debug!(
                    "Analysis succeeded: score {:.1} -> {}",
                    result.final_combined_score,
                    result.verdict()
                );
                let retained: &AnalysisResult = self.last_result.insert(result);
                Ok(retained)
            }
            Err(e) => {
                if let AnalysisError::QuotaExhausted {
                    tries_left: Some(tries),
                    ..
                } = e
                {
                    self.quota.update(tries);
                }
                Err(self.fail(e))
            }
        }
    }

    fn fail(&mut self, e: AnalysisError) -> AnalysisError {
        self.state = RequestState::Failed;
        self.showing_result = false;
        self.last_error = Some(e.clone());
        e
    }

    /// Return to `Idle` once the outcome has been rendered
    pub fn acknowledge(&mut self) {
        if self.state != RequestState::Submitting {
            self.state = RequestState::Idle;
        }
    }

    /// Server-confirmed quota change outside an analysis (subscription)
    pub fn apply_server_tries(&mut self, tries_left: i64) {
        self.quota.update(tries_left);
    }

    /// The result kept for report retrieval; survives failed submissions
    pub fn last_result(&self) -> Option<&AnalysisResult> {
        self.last_result.as_ref()
    }

    pub fn view(&self) -> AnalysisView {
        let quota = self.quota.status();
        let busy = self.state == RequestState::Submitting;
        AnalysisView {
            state: self.state,
            busy,
            submit_enabled: !busy && quota.submission_enabled(),
            submit_label: if busy {
                "Analyzing..."
            } else {
                quota.button_label()
            },
            quota,
            quota_label: quota.label(),
            result: if self.showing_result {
                self.last_result.as_ref().map(ResultView::from)
            } else {
                None
            },
            error: self.last_error.as_ref().map(|e| e.to_string()),
            report_available: self.last_result.is_some(),
        }
    }
}

/// Map one analyze outcome to a result or an error kind
pub fn classify_reply(
    outcome: Result<HttpReply, TransportError>,
) -> Result<AnalysisResult, AnalysisError> {
    let reply = outcome?;

    if reply.is_success() {
        let value: serde_json::Value = serde_json::from_slice(&reply.body).map_err(|e| {
            AnalysisError::Network(format!("the server sent an unreadable response ({})", e))
        })?;
        // Valid JSON in the wrong shape is the server's fault, not the connection's.
        return serde_json::from_value(value).map_err(|e| {
            AnalysisError::Server(format!("Unexpected analysis result from the server: {}", e))
        });
    }

    let payload: Option<ErrorPayload> = serde_json::from_slice(&reply.body).ok();
    let server_message = payload.as_ref().and_then(|p| p.error.clone());

    match reply.status {
        402 => Err(AnalysisError::QuotaExhausted {
            message: server_message.unwrap_or_else(|| QUOTA_EXHAUSTED_DEFAULT.to_string()),
            tries_left: payload.and_then(|p| p.tries_left),
        }),
        413 => Err(AnalysisError::PayloadTooLarge),
        status => Err(AnalysisError::Server(server_message.unwrap_or_else(|| {
            format!("HTTP Error: {} {}", status, reply.status_text)
                .trim_end()
                .to_string()
        }))),
    }
}

/// Drives the workflow against a transport. One instance per session.
pub struct AnalysisController<T: Transport> {
    transport: T,
    workflow: AnalysisWorkflow,
}

impl<T: Transport> AnalysisController<T> {
    pub fn new(transport: T, quota: QuotaTracker) -> Self {
        Self {
            transport,
            workflow: AnalysisWorkflow::new(quota),
        }
    }

    /// Initialize the quota with `strategy`, then build the controller
    pub async fn start(transport: T, strategy: QuotaInitStrategy, default_tries: i64) -> Self {
        let quota = QuotaTracker::initialize(&transport, strategy, default_tries).await;
        info!("{}", quota.status().label());
        Self::new(transport, quota)
    }

    /// Upload one image and classify the reply.
    ///
    /// `&mut self` keeps this single-flight; the workflow also refuses a second
    /// `begin_submit` while one is pending.
    pub async fn submit(&mut self, upload: &ImageUpload) -> Result<&AnalysisResult, AnalysisError> {
        self.workflow.acknowledge();
        self.workflow.begin_submit(upload)?;

        info!(
            "Submitting {} ({} bytes) for analysis",
            upload.file_name,
            upload.bytes.len()
        );
        let form = FormData::new().file("image", &upload.file_name, upload.bytes.clone());
        let outcome = self.transport.post_form(ANALYZE_PATH, form).await;

        self.workflow.complete(outcome)
    }

    /// Fetch the PDF for the retained result; never touches quota or the result
    pub async fn download_report(&self) -> Result<ReportArtifact, AnalysisError> {
        report::retrieve(&self.transport, self.workflow.last_result()).await
    }

    /// Activate a plan and apply the server's unlimited quota
    pub async fn activate_subscription(&mut self, plan: &str) -> Result<String, AnalysisError> {
        let activation = subscription::activate(&self.transport, plan).await?;
        self.workflow.apply_server_tries(activation.tries_left);
        Ok(activation.message)
    }

    pub fn last_result(&self) -> Option<&AnalysisResult> {
        self.workflow.last_result()
    }

    pub fn view(&self) -> AnalysisView {
        self.workflow.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::UNLIMITED;
    use crate::transport::testing::{ScriptedTransport, Step};
    use crate::transport::FormPart;

    const FORGED_LAST_TRY: &str = r#"{"ela_score":12.3,"prnu_score":45.0,"ai_score_raw":90.1,"final_combined_score":30,"tries_left":0}"#;

    const TRUSTED_SUBSCRIBED: &str = r#"{"ela_score":90,"prnu_score":88,"ai_score_raw":5,"final_combined_score":91.5,"tries_left":-1}"#;

    fn image() -> ImageUpload {
        ImageUpload::new("photo.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0])
    }

    fn controller(steps: Vec<Step>, tries: i64) -> AnalysisController<ScriptedTransport> {
        AnalysisController::new(ScriptedTransport::new(steps), QuotaTracker::new(tries))
    }

    #[tokio::test]
    async fn test_forged_result_locks_quota() {
        let mut ctl = controller(vec![Step::json(200, FORGED_LAST_TRY)], 1);

        let result = ctl.submit(&image()).await.unwrap();
        assert_eq!(result.verdict(), Verdict::Forged);

        let view = ctl.view();
        assert_eq!(view.state, RequestState::Succeeded);
        assert!(!view.submit_enabled);
        assert_eq!(view.result.as_ref().unwrap().verdict, Verdict::Forged);
        assert!(view.report_available);
    }

    #[tokio::test]
    async fn test_upload_uses_image_field() {
        let mut ctl = controller(vec![Step::json(200, FORGED_LAST_TRY)], 1);
        ctl.submit(&image()).await.unwrap();

        let sent = ctl.transport.recorded();
        assert_eq!(sent[0].path, ANALYZE_PATH);
        let form = sent[0].form.as_ref().unwrap();
        assert!(matches!(
            &form.parts[0],
            FormPart::File { name, file_name, .. } if name == "image" && file_name == "photo.jpg"
        ));
    }

    #[tokio::test]
    async fn test_402_quota_exhausted() {
        let mut ctl = controller(
            vec![Step::json(402, r#"{"error":"no tries","tries_left":0}"#)],
            1,
        );

        let err = ctl.submit(&image()).await.unwrap_err();
        assert_eq!(
            err,
            AnalysisError::QuotaExhausted {
                message: "no tries".to_string(),
                tries_left: Some(0)
            }
        );

        let view = ctl.view();
        assert!(!view.submit_enabled);
        assert!(view.result.is_none());
        assert_eq!(view.error.as_deref(), Some("no tries"));
    }

    #[tokio::test]
    async fn test_402_without_tries_keeps_quota() {
        let mut ctl = controller(vec![Step::json(402, "<html>")], 2);
        let err = ctl.submit(&image()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::QuotaExhausted { tries_left: None, .. }));
        assert_eq!(ctl.view().quota, QuotaStatus::from_tries(2));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let mut ctl = controller(vec![Step::refused()], 3);

        let err = ctl.submit(&image()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Network(_)));
        assert!(err.to_string().contains("Check your connection"));
        assert_eq!(ctl.view().quota, QuotaStatus::from_tries(3));
        assert!(ctl.view().submit_enabled);
    }

    #[tokio::test]
    async fn test_413_fixed_message_quota_untouched() {
        let mut ctl = controller(vec![Step::json(413, "")], 2);
        let err = ctl.submit(&image()).await.unwrap_err();
        assert_eq!(err, AnalysisError::PayloadTooLarge);
        assert_eq!(ctl.view().quota, QuotaStatus::from_tries(2));
    }

    #[tokio::test]
    async fn test_other_status_messages() {
        let mut ctl = controller(
            vec![
                Step::json(500, r#"{"error":"model not loaded"}"#),
                Step::json(502, "gateway down"),
            ],
            UNLIMITED,
        );

        let err = ctl.submit(&image()).await.unwrap_err();
        assert_eq!(err, AnalysisError::Server("model not loaded".to_string()));

        let err = ctl.submit(&image()).await.unwrap_err();
        assert_eq!(
            err,
            AnalysisError::Server("HTTP Error: 502 Bad Gateway".to_string())
        );
        assert_eq!(ctl.view().quota, QuotaStatus::from_tries(UNLIMITED));
    }

    #[tokio::test]
    async fn test_success_with_garbage_body_is_network() {
        let mut ctl = controller(vec![Step::json(200, "<html>oops</html>")], 1);
        let err = ctl.submit(&image()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Network(_)));
        assert_eq!(ctl.view().quota, QuotaStatus::from_tries(1));
    }

    #[tokio::test]
    async fn test_empty_file_sends_nothing() {
        let mut ctl = controller(vec![], 1);
        let err = ctl
            .submit(&ImageUpload::new("empty.png", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
        assert!(ctl.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_locked_quota_sends_nothing() {
        let mut ctl = controller(vec![], 0);
        let err = ctl.submit(&image()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::QuotaExhausted { .. }));
        assert!(ctl.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_retained_result() {
        let mut ctl = controller(
            vec![
                Step::json(200, TRUSTED_SUBSCRIBED),
                Step::json(500, r#"{"error":"boom"}"#),
            ],
            1,
        );

        ctl.submit(&image()).await.unwrap();
        assert!(ctl.submit(&image()).await.is_err());

        let view = ctl.view();
        assert!(view.result.is_none());
        assert!(view.report_available);
        assert_eq!(ctl.last_result().unwrap().final_combined_score, 91.5);
        assert!(view.submit_enabled);
    }

    #[test]
    fn test_single_flight_guard() {
        let mut wf = AnalysisWorkflow::new(QuotaTracker::new(UNLIMITED));
        wf.begin_submit(&image()).unwrap();

        let view = wf.view();
        assert!(view.busy);
        assert!(!view.submit_enabled);
        assert_eq!(view.submit_label, "Analyzing...");

        let err = wf.begin_submit(&image()).unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
        assert_eq!(wf.view().state, RequestState::Submitting);
    }

    #[test]
    fn test_submit_clears_displayed_result() {
        let mut wf = AnalysisWorkflow::new(QuotaTracker::new(UNLIMITED));
        wf.begin_submit(&image()).unwrap();
        let reply = match Step::json(200, TRUSTED_SUBSCRIBED) {
            Step::Reply(r) => r,
            Step::Fail(_) => unreachable!(),
        };
        wf.complete(Ok(reply)).unwrap();
        assert!(wf.view().result.is_some());

        wf.acknowledge();
        wf.begin_submit(&image()).unwrap();
        let view = wf.view();
        assert_eq!(view.state, RequestState::Submitting);
        assert!(view.result.is_none());
        assert!(view.report_available);
        assert_eq!(wf.last_result().unwrap().final_combined_score, 91.5);
    }

    #[tokio::test]
    async fn test_rejected_resubmit_hides_previous_verdict() {
        let mut ctl = controller(vec![Step::json(200, TRUSTED_SUBSCRIBED)], 1);
        ctl.submit(&image()).await.unwrap();
        assert!(ctl.view().result.is_some());

        let err = ctl
            .submit(&ImageUpload::new("empty.png", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));

        let view = ctl.view();
        assert_eq!(view.state, RequestState::Failed);
        assert!(view.result.is_none());
        assert_eq!(view.error, Some(err.to_string()));
        assert!(ctl.last_result().is_some());
    }

    #[tokio::test]
    async fn test_success_without_tries_keeps_quota() {
        let mut ctl = controller(
            vec![Step::json(
                200,
                r#"{"ela_score":90,"prnu_score":88,"ai_score_raw":5,"final_combined_score":91.5}"#,
            )],
            2,
        );

        let result = ctl.submit(&image()).await.unwrap();
        assert_eq!(result.verdict(), Verdict::Trusted);
        assert_eq!(result.tries_left, None);
        assert_eq!(ctl.view().quota, QuotaStatus::from_tries(2));
        assert_eq!(ctl.view().state, RequestState::Succeeded);
    }

    #[tokio::test]
    async fn test_success_with_wrong_shape_is_server_error() {
        let mut ctl = controller(vec![Step::json(200, r#"{"status":"queued"}"#)], 2);
        let err = ctl.submit(&image()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Server(_)));
        assert!(!err.to_string().contains("Check your connection"));
        assert_eq!(ctl.view().quota, QuotaStatus::from_tries(2));
    }

    #[test]
    fn test_complete_without_submit_rejected() {
        let mut wf = AnalysisWorkflow::new(QuotaTracker::new(1));
        assert!(wf
            .complete(Err(TransportError::Connect("x".to_string())))
            .is_err());
        assert_eq!(wf.view().state, RequestState::Idle);
    }
}
