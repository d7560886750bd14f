// Participant-side model: what one participant has observed and may do next.
//
// Driven entirely by server messages plus the local clock. The answer window
// starts when this participant first observes a poll, independent of every
// other participant.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::poll::{OptionId, PollId};
use crate::protocol::{
    ClientMessage, PollAnnouncement, RejectionKind, ServerMessage, SubmitAnswerRequest,
};
use crate::results::ResultAggregate;
use crate::window;

/// Why the participant's client refused to send an answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalRejection {
    #[error("please enter your name")]
    BlankIdentity,
    #[error("there is no active poll")]
    NoActivePoll,
    #[error("the presenter has closed this poll")]
    PollClosed,
    #[error("your time for this poll has ended")]
    WindowExpired,
    #[error("you have already submitted an answer for this poll")]
    AlreadySubmitted,
    #[error("that option is not part of this poll")]
    UnknownOption,
}

/// What the participant should currently be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantStatus {
    NoActivePoll,
    Answering { remaining: Duration },
    Answered,
    /// The server rejected a duplicate answer from this identity.
    AlreadyAnswered { message: String },
    /// The local answer window ran out before an answer was sent.
    WindowExpired,
    /// The presenter closed the poll.
    PollClosed,
}

impl ParticipantStatus {
    /// Human-readable status line. Window expiry, presenter closure and
    /// duplicate answers each have their own text.
    pub fn message(&self) -> String {
        match self {
            ParticipantStatus::NoActivePoll => {
                "No active poll at the moment. Please wait for the presenter to create one."
                    .to_string()
            }
            ParticipantStatus::Answering { remaining } => {
                format!("Time remaining: {}", window::format_remaining(*remaining))
            }
            ParticipantStatus::Answered => "Thank you for your response!".to_string(),
            ParticipantStatus::AlreadyAnswered { message } => message.clone(),
            ParticipantStatus::WindowExpired => "Your time for this poll has ended.".to_string(),
            ParticipantStatus::PollClosed => {
                "This poll has been closed by the presenter.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AnswerState {
    Unanswered,
    Submitted(OptionId),
    Accepted(OptionId),
    AlreadyAnswered(String),
}

#[derive(Debug, Clone)]
struct ObservedPoll {
    poll: PollAnnouncement,
    observed_at: Instant,
    answer: AnswerState,
    closed: bool,
}

/// One participant's view of the live session.
#[derive(Debug, Clone)]
pub struct ParticipantSession {
    identity: String,
    current: Option<ObservedPoll>,
    results: Option<ResultAggregate>,
    last_rejection: Option<String>,
}

impl ParticipantSession {
    pub fn new(identity: &str) -> Result<Self, LocalRejection> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(LocalRejection::BlankIdentity);
        }
        Ok(ParticipantSession {
            identity: identity.to_string(),
            current: None,
            results: None,
            last_rejection: None,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The poll currently on screen, if any.
    pub fn poll(&self) -> Option<&PollAnnouncement> {
        self.current.as_ref().map(|c| &c.poll)
    }

    pub fn results(&self) -> Option<&ResultAggregate> {
        self.results.as_ref()
    }

    /// Message from the last non-duplicate rejection, e.g. an invalid option.
    pub fn last_rejection(&self) -> Option<&str> {
        self.last_rejection.as_deref()
    }

    fn observing(&mut self, poll_id: &PollId) -> Option<&mut ObservedPoll> {
        self.current.as_mut().filter(|c| &c.poll.poll_id == poll_id)
    }

    /// Fold one server message into the view. `now` is the local clock at
    /// receipt and becomes the window start for newly announced polls.
    pub fn apply(&mut self, msg: &ServerMessage, now: Instant) {
        match msg {
            ServerMessage::PollAnnounced { payload } => {
                if self.poll().is_some_and(|p| p.poll_id == payload.poll_id) {
                    return;
                }
                self.current = Some(ObservedPoll {
                    poll: payload.clone(),
                    observed_at: now,
                    answer: AnswerState::Unanswered,
                    closed: false,
                });
                self.results = None;
                self.last_rejection = None;
            }
            ServerMessage::ResultsUpdated { payload } => {
                if self.observing(&payload.poll_id).is_some() {
                    self.results = Some(payload.clone());
                }
            }
            ServerMessage::PollClosed { payload } => {
                if let Some(current) = self.observing(&payload.poll_id) {
                    current.closed = true;
                }
            }
            ServerMessage::AnswerAccepted { payload } => {
                if let Some(current) = self.observing(&payload.poll_id) {
                    current.answer = AnswerState::Accepted(payload.option_id.clone());
                }
            }
            ServerMessage::AlreadyAnswered { payload } => {
                if let Some(current) = self.observing(&payload.poll_id) {
                    current.answer = AnswerState::AlreadyAnswered(payload.message.clone());
                }
            }
            ServerMessage::RequestRejected { payload } => {
                let Some(poll_id) = payload.poll_id.as_ref() else {
                    self.last_rejection = Some(payload.message.clone());
                    return;
                };
                let Some(current) = self.observing(poll_id) else {
                    return;
                };
                if payload.kind == RejectionKind::Stale {
                    current.closed = true;
                } else if matches!(current.answer, AnswerState::Submitted(_)) {
                    current.answer = AnswerState::Unanswered;
                }
                self.last_rejection = Some(payload.message.clone());
            }
            ServerMessage::PollCreated { .. } | ServerMessage::CloseAcknowledged { .. } => {}
        }
    }

    pub fn status(&self, now: Instant) -> ParticipantStatus {
        let Some(current) = &self.current else {
            return ParticipantStatus::NoActivePoll;
        };
        if current.closed {
            return ParticipantStatus::PollClosed;
        }
        match &current.answer {
            AnswerState::AlreadyAnswered(message) => ParticipantStatus::AlreadyAnswered {
                message: message.clone(),
            },
            AnswerState::Submitted(_) | AnswerState::Accepted(_) => ParticipantStatus::Answered,
            AnswerState::Unanswered => {
                let remaining =
                    window::remaining(current.poll.duration_seconds, current.observed_at, now);
                if remaining.is_zero() {
                    ParticipantStatus::WindowExpired
                } else {
                    ParticipantStatus::Answering { remaining }
                }
            }
        }
    }

    /// Build the answer request for `option_id`, refusing locally when the
    /// window is shut or an answer was already sent.
    pub fn submit(
        &mut self,
        option_id: &OptionId,
        now: Instant,
    ) -> Result<ClientMessage, LocalRejection> {
        let status = self.status(now);
        let current = self.current.as_mut().ok_or(LocalRejection::NoActivePoll)?;
        match status {
            ParticipantStatus::Answering { .. } => {}
            ParticipantStatus::NoActivePoll => return Err(LocalRejection::NoActivePoll),
            ParticipantStatus::PollClosed => return Err(LocalRejection::PollClosed),
            ParticipantStatus::WindowExpired => return Err(LocalRejection::WindowExpired),
            ParticipantStatus::Answered | ParticipantStatus::AlreadyAnswered { .. } => {
                return Err(LocalRejection::AlreadySubmitted)
            }
        }
        if !current.poll.options.iter().any(|o| &o.id == option_id) {
            return Err(LocalRejection::UnknownOption);
        }

        current.answer = AnswerState::Submitted(option_id.clone());
        Ok(ClientMessage::SubmitAnswer {
            payload: SubmitAnswerRequest {
                poll_id: current.poll.poll_id.clone(),
                option_id: option_id.clone(),
                participant_identity: self.identity.clone(),
            },
        })
    }
}
