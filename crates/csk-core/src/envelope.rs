//! The decision envelope every operation returns: one `summary`, a machine
//! `status`, exactly one recommended `next` action, artifact `refs`,
//! `errors`, and free-form `data`.

use crate::error::CskError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EnvelopeStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Ok,
    GateFailed,
    Error,
    ReplayFailed,
}

impl EnvelopeStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            EnvelopeStatus::Ok => 0,
            EnvelopeStatus::GateFailed => 10,
            EnvelopeStatus::Error => 10,
            EnvelopeStatus::ReplayFailed => 30,
        }
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeStatus::Ok => "ok",
            EnvelopeStatus::GateFailed => "gate_failed",
            EnvelopeStatus::Error => "error",
            EnvelopeStatus::ReplayFailed => "replay_failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// NextAction / Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextAction {
    pub recommended: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl NextAction {
    pub fn new(recommended: impl Into<String>) -> Self {
        Self {
            recommended: recommended.into(),
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // At most two alternatives are surfaced.
        self.alternatives = alternatives.into_iter().map(Into::into).take(2).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub summary: String,
    pub status: EnvelopeStatus,
    pub next: NextAction,
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn ok(summary: impl Into<String>, next: NextAction) -> Self {
        Self {
            summary: summary.into(),
            status: EnvelopeStatus::Ok,
            next,
            refs: Vec::new(),
            errors: Vec::new(),
            data: serde_json::Value::Null,
        }
    }

    pub fn gate_failed(summary: impl Into<String>, next: NextAction) -> Self {
        Self {
            summary: summary.into(),
            status: EnvelopeStatus::GateFailed,
            next,
            refs: Vec::new(),
            errors: Vec::new(),
            data: serde_json::Value::Null,
        }
    }

    /// Envelope for an operation error, carrying the error kind in
    /// `errors[0]` and a recovery action in `next`.
    pub fn from_error(error: &CskError, next: NextAction) -> Self {
        let status = match error {
            CskError::ReplayInvariantViolation(_) => EnvelopeStatus::ReplayFailed,
            _ => EnvelopeStatus::Error,
        };
        Self {
            summary: error.to_string(),
            status,
            next,
            refs: Vec::new(),
            errors: vec![format!("{}: {error}", error.kind())],
            data: serde_json::Value::Null,
        }
    }

    pub fn with_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refs = refs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors = errors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn exit_code(&self) -> i32 {
        if self.status == EnvelopeStatus::Error && !self.errors.is_empty() {
            // Schema/internal corruption escalates to 20
            if self.errors.iter().any(|e| {
                e.starts_with("schema_violation") || e.starts_with("internal_error")
            }) {
                return 20;
            }
        }
        self.status.exit_code()
    }

    /// Three labelled blocks for text mode; JSON mode prints the envelope
    /// itself.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("SUMMARY\n");
        out.push_str(&format!("  {}\n", self.summary));
        out.push_str("STATUS\n");
        out.push_str(&format!("  {}\n", self.status));
        if !self.errors.is_empty() {
            for error in &self.errors {
                out.push_str(&format!("  error: {error}\n"));
            }
        }
        out.push_str("NEXT\n");
        out.push_str(&format!("  {}\n", self.next.recommended));
        for alternative in &self.next.alternatives {
            out.push_str(&format!("  (alt) {alternative}\n"));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
