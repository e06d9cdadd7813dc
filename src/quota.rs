// Usage quota - free analyses left, or unlimited once subscribed
use crate::models::TriesPayload;
use crate::transport::{Transport, CHECK_TRIES_PATH};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Sentinel the server uses for an active subscription
pub const UNLIMITED: i64 = -1;

/// Seed used when the server is not asked (or cannot answer)
pub const OPTIMISTIC_DEFAULT: i64 = 1;

// Anything under the sentinel still means "no tries".
fn normalize(tries_left: i64) -> i64 {
    if tries_left < UNLIMITED {
        0
    } else {
        tries_left
    }
}

/// How the tracker learns its first value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaInitStrategy {
    /// Seed the default without a round trip; corrected by the first analysis
    Optimistic,
    /// Ask `/api/check_tries` first, fall back to the default on any failure
    Server,
}

impl QuotaInitStrategy {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "optimistic" => Ok(Self::Optimistic),
            "server" => Ok(Self::Server),
            _ => Err(anyhow::anyhow!(
                "Unknown quota init strategy: {}. Supported: optimistic, server",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tries", rename_all = "lowercase")]
pub enum QuotaStatus {
    Unlimited,
    Remaining(i64),
    Locked,
}

impl QuotaStatus {
    pub fn from_tries(tries_left: i64) -> Self {
        if tries_left == UNLIMITED {
            QuotaStatus::Unlimited
        } else if tries_left > 0 {
            QuotaStatus::Remaining(tries_left)
        } else {
            QuotaStatus::Locked
        }
    }

    pub fn submission_enabled(&self) -> bool {
        !matches!(self, QuotaStatus::Locked)
    }

    pub fn label(&self) -> String {
        match self {
            QuotaStatus::Unlimited => "Active subscription: unlimited analyses.".to_string(),
            QuotaStatus::Remaining(1) => "You have 1 free analysis left.".to_string(),
            QuotaStatus::Remaining(n) => format!("You have {} free analyses left.", n),
            QuotaStatus::Locked => {
                "Your free analyses are used up. Please subscribe for more.".to_string()
            }
        }
    }

    pub fn button_label(&self) -> &'static str {
        match self {
            QuotaStatus::Unlimited => "Analyze another image",
            QuotaStatus::Remaining(_) => "Analyze image",
            QuotaStatus::Locked => "Subscription required",
        }
    }
}

/// Holds the latest known `tries_left`; the only source of submission eligibility
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    tries_left: i64,
}

impl QuotaTracker {
    pub fn new(tries_left: i64) -> Self {
        Self {
            tries_left: normalize(tries_left),
        }
    }

    /// Build a tracker using the chosen strategy
    pub async fn initialize<T: Transport>(
        transport: &T,
        strategy: QuotaInitStrategy,
        default_tries: i64,
    ) -> Self {
        match strategy {
            QuotaInitStrategy::Optimistic => {
                debug!("Seeding quota optimistically with {}", default_tries);
                Self::new(default_tries)
            }
            QuotaInitStrategy::Server => match Self::fetch(transport).await {
                Some(tries) => Self::new(tries),
                None => {
                    warn!(
                        "Quota lookup failed, assuming {} free analysis left",
                        default_tries
                    );
                    Self::new(default_tries)
                }
            },
        }
    }

    async fn fetch<T: Transport>(transport: &T) -> Option<i64> {
        let reply = match transport.get(CHECK_TRIES_PATH).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("check_tries transport error: {}", e);
                return None;
            }
        };

        if !reply.is_success() {
            debug!("check_tries returned HTTP {}", reply.status);
            return None;
        }

        let payload: TriesPayload = serde_json::from_slice(&reply.body).ok()?;
        if payload.is_subscribed == Some(true) {
            return Some(UNLIMITED);
        }
        Some(payload.tries_left)
    }

    /// Apply a server-supplied value. Values below -1 are treated as locked.
    pub fn update(&mut self, tries_left: i64) {
        self.tries_left = normalize(tries_left);
        debug!("Quota updated: {:?}", self.status());
    }

    pub fn tries_left(&self) -> i64 {
        self.tries_left
    }

    pub fn status(&self) -> QuotaStatus {
        QuotaStatus::from_tries(self.tries_left)
    }

    pub fn can_submit(&self) -> bool {
        self.status().submission_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{ScriptedTransport, Step};

    #[test]
    fn test_unlimited_always_enabled() {
        let mut quota = QuotaTracker::new(0);
        quota.update(UNLIMITED);
        assert!(quota.can_submit());
        assert_eq!(quota.status(), QuotaStatus::Unlimited);
    }

    #[test]
    fn test_zero_locks_until_positive() {
        let mut quota = QuotaTracker::new(3);
        quota.update(0);
        assert!(!quota.can_submit());
        assert_eq!(quota.status().button_label(), "Subscription required");
        quota.update(2);
        assert!(quota.can_submit());
        quota.update(0);
        quota.update(UNLIMITED);
        assert!(quota.can_submit());
    }

    #[test]
    fn test_positive_label_reflects_count() {
        let quota = QuotaTracker::new(4);
        assert!(quota.can_submit());
        assert_eq!(quota.status(), QuotaStatus::Remaining(4));
        assert!(quota.status().label().contains('4'));
    }

    #[test]
    fn test_below_sentinel_is_locked() {
        let mut quota = QuotaTracker::new(1);
        quota.update(-7);
        assert_eq!(quota.tries_left(), 0);
        assert!(!quota.can_submit());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            QuotaInitStrategy::from_str("Server").unwrap(),
            QuotaInitStrategy::Server
        );
        assert_eq!(
            QuotaInitStrategy::from_str("optimistic").unwrap(),
            QuotaInitStrategy::Optimistic
        );
        assert!(QuotaInitStrategy::from_str("lazy").is_err());
    }

    #[tokio::test]
    async fn test_server_init_uses_reply() {
        let transport = ScriptedTransport::new(vec![Step::json(200, r#"{"tries_left": 3}"#)]);
        let quota = QuotaTracker::initialize(&transport, QuotaInitStrategy::Server, 1).await;
        assert_eq!(quota.tries_left(), 3);
        assert_eq!(transport.requests(), vec!["GET /api/check_tries".to_string()]);
    }

    #[tokio::test]
    async fn test_server_init_subscribed_flag() {
        let transport = ScriptedTransport::new(vec![Step::json(
            200,
            r#"{"tries_left": 0, "is_subscribed": true}"#,
        )]);
        let quota = QuotaTracker::initialize(&transport, QuotaInitStrategy::Server, 1).await;
        assert_eq!(quota.status(), QuotaStatus::Unlimited);
    }

    #[tokio::test]
    async fn test_server_init_falls_back() {
        let transport = ScriptedTransport::new(vec![Step::json(500, r#"{"error": "boom"}"#)]);
        let quota = QuotaTracker::initialize(&transport, QuotaInitStrategy::Server, 1).await;
        assert_eq!(quota.tries_left(), 1);

        let transport = ScriptedTransport::new(vec![Step::refused()]);
        let quota = QuotaTracker::initialize(&transport, QuotaInitStrategy::Server, 1).await;
        assert_eq!(quota.tries_left(), 1);

        let transport = ScriptedTransport::new(vec![Step::json(200, "not json")]);
        let quota = QuotaTracker::initialize(&transport, QuotaInitStrategy::Server, 1).await;
        assert_eq!(quota.tries_left(), 1);
    }

    #[tokio::test]
    async fn test_optimistic_init_skips_network() {
        let transport = ScriptedTransport::new(vec![]);
        let quota = QuotaTracker::initialize(&transport, QuotaInitStrategy::Optimistic, 1).await;
        assert_eq!(quota.tries_left(), 1);
        assert!(transport.requests().is_empty());
    }
}
