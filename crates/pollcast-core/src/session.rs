// Poll session manager: the single authoritative active poll and its answers.
//
// Holds at most one active poll. All mutating operations take `&mut self`, so
// whoever owns the manager (the coordinator task) serializes them; a rejected
// operation returns before touching any state.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::poll::{OptionId, Poll, PollId, PollSpec, PollStatus};
use crate::protocol::RejectionKind;
use crate::results::ResultAggregate;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("poll {active} is still active; close it before creating another")]
    Conflict { active: PollId },

    #[error("poll {poll_id} is no longer active")]
    Stale { poll_id: PollId },

    #[error("{participant} has already answered poll {poll_id}")]
    AlreadyAnswered { poll_id: PollId, participant: String },

    #[error("option {option_id} does not belong to poll {poll_id}")]
    InvalidOption { poll_id: PollId, option_id: OptionId },
}

impl SessionError {
    /// Wire-level classification of this rejection.
    pub fn kind(&self) -> RejectionKind {
        match self {
            SessionError::Validation(_) => RejectionKind::Validation,
            SessionError::Conflict { .. } => RejectionKind::Conflict,
            SessionError::Stale { .. } => RejectionKind::Stale,
            SessionError::AlreadyAnswered { .. } => RejectionKind::AlreadyAnswered,
            SessionError::InvalidOption { .. } => RejectionKind::InvalidOption,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// The active poll together with its recorded answers.
#[derive(Debug)]
struct ActivePoll {
    poll: Poll,
    /// Tally per option, parallel to `poll.options`.
    counts: Vec<u64>,
    /// participant identity -> chosen option
    answers: HashMap<String, OptionId>,
}

impl ActivePoll {
    fn aggregate(&self) -> ResultAggregate {
        ResultAggregate::compute(&self.poll, &self.counts)
    }
}

/// Owns the lifecycle of the single current poll.
#[derive(Debug, Default)]
pub struct SessionManager {
    active: Option<ActivePoll>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate presenter input and install it as the active poll.
    ///
    /// Fails with `Conflict` while another poll is active; the existing poll
    /// and its answers are left untouched.
    pub fn create(
        &mut self,
        question: &str,
        options: &[String],
        duration_seconds: i64,
    ) -> Result<Poll, SessionError> {
        let spec = PollSpec::validate(question, options, duration_seconds)?;

        if let Some(active) = &self.active {
            return Err(SessionError::Conflict {
                active: active.poll.id.clone(),
            });
        }

        let poll = Poll::from_spec(spec);
        info!(
            "Poll {} created: {:?} with {} options, {}s window",
            poll.id,
            poll.question,
            poll.options.len(),
            poll.duration_seconds
        );

        self.active = Some(ActivePoll {
            counts: vec![0; poll.options.len()],
            answers: HashMap::new(),
            poll: poll.clone(),
        });

        Ok(poll)
    }

    /// Record one participant's answer and return the recomputed aggregate.
    ///
    /// Checks run in order: stale poll, duplicate participant, unknown option.
    pub fn submit_answer(
        &mut self,
        poll_id: &PollId,
        option_id: &OptionId,
        participant: &str,
    ) -> Result<ResultAggregate, SessionError> {
        let participant = participant.trim();
        if participant.is_empty() {
            return Err(SessionError::Validation(
                "participantIdentity must not be blank".into(),
            ));
        }

        let active = match &mut self.active {
            Some(active) if &active.poll.id == poll_id => active,
            _ => {
                return Err(SessionError::Stale {
                    poll_id: poll_id.clone(),
                })
            }
        };

        if active.answers.contains_key(participant) {
            return Err(SessionError::AlreadyAnswered {
                poll_id: poll_id.clone(),
                participant: participant.to_string(),
            });
        }

        let index = active
            .poll
            .option_index(option_id)
            .ok_or_else(|| SessionError::InvalidOption {
                poll_id: poll_id.clone(),
                option_id: option_id.clone(),
            })?;

        active
            .answers
            .insert(participant.to_string(), option_id.clone());
        active.counts[index] += 1;
        debug!(
            "Answer recorded for poll {}: {} -> {} ({} total)",
            poll_id,
            participant,
            option_id,
            active.answers.len()
        );

        Ok(active.aggregate())
    }

    /// Aggregate for the active poll, or `None` when nothing is active.
    pub fn current_results(&self) -> Option<ResultAggregate> {
        self.active.as_ref().map(ActivePoll::aggregate)
    }

    /// The active poll, if any.
    pub fn active_poll(&self) -> Option<&Poll> {
        self.active.as_ref().map(|a| &a.poll)
    }

    /// Number of participants who have answered the active poll.
    pub fn answer_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.answers.len())
    }

    /// Presenter-confirmed closure. Discards the answers and hands back the
    /// poll marked `Closed`; a no-op returning `None` when nothing is active.
    pub fn close(&mut self) -> Option<Poll> {
        let mut closed = self.active.take()?;
        closed.poll.status = PollStatus::Closed;
        info!(
            "Poll {} closed with {} answers",
            closed.poll.id,
            closed.answers.len()
        );
        Some(closed.poll)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
