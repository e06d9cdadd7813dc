// Subscription activation - the server switches the session to unlimited
use crate::error::AnalysisError;
use crate::models::{ErrorPayload, SubscriptionReply, SubscriptionRequest};
use crate::quota::UNLIMITED;
use crate::transport::{Transport, SUBSCRIBE_PATH};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Activation {
    pub message: String,
    pub tries_left: i64,
}

/// Activate `plan`. Payment itself happens elsewhere; this only flips the session.
pub async fn activate<T: Transport>(transport: &T, plan: &str) -> Result<Activation, AnalysisError> {
    let plan = plan.trim();
    if plan.is_empty() {
        return Err(AnalysisError::Validation(
            "Please choose a payment plan first.".to_string(),
        ));
    }

    let body = serde_json::to_value(SubscriptionRequest { plan })
        .map_err(|e| AnalysisError::Server(e.to_string()))?;
    let reply = transport.post_json(SUBSCRIBE_PATH, &body).await?;

    if !reply.is_success() {
        let message = serde_json::from_slice::<ErrorPayload>(&reply.body)
            .ok()
            .and_then(|p| p.error)
            .unwrap_or_else(|| format!("HTTP Error: {} {}", reply.status, reply.status_text));
        return Err(AnalysisError::Server(message));
    }

    let parsed: SubscriptionReply = serde_json::from_slice(&reply.body).map_err(|e| {
        AnalysisError::Network(format!("the server sent an unreadable response ({})", e))
    })?;

    if !parsed.success || !parsed.is_subscribed {
        return Err(AnalysisError::Server(
            parsed
                .message
                .unwrap_or_else(|| "Subscription was not activated.".to_string()),
        ));
    }

    info!("Subscription activated for plan {}", plan);
    Ok(Activation {
        message: parsed
            .message
            .unwrap_or_else(|| format!("Subscription activated: {}", plan)),
        tries_left: UNLIMITED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisController, ImageUpload};
    use crate::quota::{QuotaStatus, QuotaTracker};
    use crate::transport::testing::{ScriptedTransport, Step};

    #[tokio::test]
    async fn test_activation_unlocks_quota() {
        let transport = ScriptedTransport::new(vec![
            Step::json(
                200,
                r#"{"success":true,"message":"Activated: pro","is_subscribed":true}"#,
            ),
            Step::json(
                200,
                r#"{"ela_score":70,"prnu_score":60,"ai_score_raw":20,"final_combined_score":65,"tries_left":-1}"#,
            ),
        ]);
        let mut ctl = AnalysisController::new(transport, QuotaTracker::new(0));
        assert!(!ctl.view().submit_enabled);

        let message = ctl.activate_subscription("pro").await.unwrap();
        assert_eq!(message, "Activated: pro");
        assert_eq!(ctl.view().quota, QuotaStatus::Unlimited);

        ctl.submit(&ImageUpload::new("a.png", vec![1])).await.unwrap();
        assert!(ctl.view().submit_enabled);
    }

    #[tokio::test]
    async fn test_rejected_plan_keeps_quota() {
        let transport = ScriptedTransport::new(vec![Step::json(
            400,
            r#"{"error":"Please choose a valid plan"}"#,
        )]);
        let mut ctl = AnalysisController::new(transport, QuotaTracker::new(0));

        let err = ctl.activate_subscription("gold").await.unwrap_err();
        assert_eq!(err, AnalysisError::Server("Please choose a valid plan".to_string()));
        assert_eq!(ctl.view().quota, QuotaStatus::Locked);
    }

    #[tokio::test]
    async fn test_empty_plan_sends_nothing() {
        let transport = ScriptedTransport::new(vec![]);
        let err = activate(&transport, "  ").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
        assert!(transport.requests().is_empty());
    }
}
