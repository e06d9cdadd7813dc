// Verdict classification - maps the server's combined score to a trust tier
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lower bound (inclusive) of the trusted band
pub const TRUSTED_THRESHOLD: f64 = 80.0;
/// Lower bound (inclusive) of the caution band
pub const CAUTION_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Trusted,
    Caution,
    Forged,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Trusted => "Authentic / trusted",
            Verdict::Caution => "Possibly manipulated (caution)",
            Verdict::Forged => "Forged / manipulated",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Trusted => "TRUSTED",
            Verdict::Caution => "CAUTION",
            Verdict::Forged => "FORGED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify a combined score (0-100).
///
/// Only the final number is classified; the ELA, PRNU and AI sub-scores are
/// combined server-side. NaN falls through to `Forged`.
pub fn classify(score: f64) -> Verdict {
    if score >= TRUSTED_THRESHOLD {
        Verdict::Trusted
    } else if score >= CAUTION_THRESHOLD {
        Verdict::Caution
    } else {
        Verdict::Forged
    }
}
