// Poll representation and create-poll input validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::session::SessionError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier of a poll, assigned by the session manager at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(String);

impl PollId {
    pub fn generate() -> Self {
        PollId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PollId {
    fn from(s: &str) -> Self {
        PollId(s.to_string())
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one option, unique within (and across) polls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(String);

impl OptionId {
    pub fn generate() -> Self {
        OptionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OptionId {
    fn from(s: &str) -> Self {
        OptionId(s.to_string())
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// Lifecycle state of a poll. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PollStatus {
    Active,
    Closed,
}

/// One selectable answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
}

/// A question with its ordered options and the per-participant answer
/// window length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    /// Length of each participant's client-local answer window. The server
    /// never expires a poll on this value.
    pub duration_seconds: u32,
    pub status: PollStatus,
}

impl Poll {
    /// Build an active poll from validated input, assigning fresh identifiers
    /// in input order.
    pub(crate) fn from_spec(spec: PollSpec) -> Self {
        let options = spec
            .options
            .into_iter()
            .map(|text| PollOption {
                id: OptionId::generate(),
                text,
            })
            .collect();

        Poll {
            id: PollId::generate(),
            question: spec.question,
            options,
            duration_seconds: spec.duration_seconds,
            status: PollStatus::Active,
        }
    }

    /// Position of `option_id` within this poll's options.
    pub fn option_index(&self, option_id: &OptionId) -> Option<usize> {
        self.options.iter().position(|o| &o.id == option_id)
    }

    /// Look up an option id by its display text (first match).
    pub fn option_id_of(&self, text: &str) -> Option<&OptionId> {
        self.options.iter().find(|o| o.text == text).map(|o| &o.id)
    }
}

// ---------------------------------------------------------------------------
// Create-poll input
// ---------------------------------------------------------------------------

/// Minimum number of non-blank options a poll must carry.
pub const MIN_OPTIONS: usize = 2;

/// Validated create-poll input: trimmed question, trimmed non-blank options,
/// positive duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    pub question: String,
    pub options: Vec<String>,
    pub duration_seconds: u32,
}

impl PollSpec {
    /// Validate raw presenter input.
    ///
    /// Options are trimmed and blank entries dropped before counting, so
    /// `["A", "  ", "B"]` yields two options. `duration_seconds` is signed so
    /// that negative input surfaces as a validation failure rather than a
    /// decode error.
    pub fn validate(
        question: &str,
        options: &[String],
        duration_seconds: i64,
    ) -> Result<Self, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::Validation(
                "question must not be blank".into(),
            ));
        }

        let options: Vec<String> = options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if options.len() < MIN_OPTIONS {
            return Err(SessionError::Validation(format!(
                "at least {MIN_OPTIONS} non-blank options are required, got {}",
                options.len()
            )));
        }

        if duration_seconds <= 0 {
            return Err(SessionError::Validation(format!(
                "durationSeconds must be positive, got {duration_seconds}"
            )));
        }
        let duration_seconds = u32::try_from(duration_seconds).map_err(|_| {
            SessionError::Validation(format!(
                "durationSeconds is too large: {duration_seconds}"
            ))
        })?;

        Ok(PollSpec {
            question: question.to_string(),
            options,
            duration_seconds,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
