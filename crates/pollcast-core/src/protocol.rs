// Wire protocol between the server and its clients.
//
// Every frame is a JSON object tagged by `type`; data travels in a `payload`
// object with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::poll::{OptionId, Poll, PollId, PollOption};
use crate::results::ResultAggregate;
use crate::session::SessionError;

/// Text delivered with `ALREADY_ANSWERED`.
pub const ALREADY_ANSWERED_MESSAGE: &str = "You have already submitted an answer for this poll.";

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Presenter asks for a new active poll.
    CreatePoll { payload: CreatePollRequest },
    /// Participant answers the active poll.
    SubmitAnswer { payload: SubmitAnswerRequest },
    /// Presenter confirms the current poll is done.
    ClosePoll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub participant_identity: String,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    // Broadcast to every connection.
    PollAnnounced { payload: PollAnnouncement },
    ResultsUpdated { payload: ResultAggregate },
    PollClosed { payload: PollRef },

    // Delivered only to the requesting connection.
    PollCreated { payload: PollRef },
    AnswerAccepted { payload: AnswerReceipt },
    AlreadyAnswered { payload: AlreadyAnsweredNotice },
    CloseAcknowledged { payload: CloseAck },
    RequestRejected { payload: Rejection },
}

/// Everything a participant needs to render the poll and start its own
/// answer window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollAnnouncement {
    pub poll_id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub duration_seconds: u32,
}

impl From<&Poll> for PollAnnouncement {
    fn from(poll: &Poll) -> Self {
        PollAnnouncement {
            poll_id: poll.id.clone(),
            question: poll.question.clone(),
            options: poll.options.clone(),
            duration_seconds: poll.duration_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRef {
    pub poll_id: PollId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReceipt {
    pub poll_id: PollId,
    pub option_id: OptionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlreadyAnsweredNotice {
    pub poll_id: PollId,
    pub message: String,
}

/// `poll_id` is `None` when there was no active poll to close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseAck {
    pub poll_id: Option<PollId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectionKind {
    Validation,
    Conflict,
    Stale,
    AlreadyAnswered,
    InvalidOption,
    /// The frame was not a recognizable client message.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub kind: RejectionKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<PollId>,
}

impl ServerMessage {
    pub fn announced(poll: &Poll) -> Self {
        ServerMessage::PollAnnounced {
            payload: PollAnnouncement::from(poll),
        }
    }

    pub fn results(aggregate: ResultAggregate) -> Self {
        ServerMessage::ResultsUpdated { payload: aggregate }
    }

    pub fn closed(poll_id: PollId) -> Self {
        ServerMessage::PollClosed {
            payload: PollRef { poll_id },
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        ServerMessage::RequestRejected {
            payload: Rejection {
                kind: RejectionKind::Malformed,
                message: message.into(),
                poll_id: None,
            },
        }
    }

    /// Whether this message goes to every connection rather than one.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            ServerMessage::PollAnnounced { .. }
                | ServerMessage::ResultsUpdated { .. }
                | ServerMessage::PollClosed { .. }
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&SessionError> for ServerMessage {
    /// Reply sent to the originator of a rejected request. Duplicate answers
    /// get their own event so clients can show a distinct status.
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::AlreadyAnswered { poll_id, .. } => ServerMessage::AlreadyAnswered {
                payload: AlreadyAnsweredNotice {
                    poll_id: poll_id.clone(),
                    message: ALREADY_ANSWERED_MESSAGE.to_string(),
                },
            },
            other => {
                let poll_id = match other {
                    SessionError::Conflict { active } => Some(active.clone()),
                    SessionError::Stale { poll_id } | SessionError::InvalidOption { poll_id, .. } => {
                        Some(poll_id.clone())
                    }
                    _ => None,
                };
                ServerMessage::RequestRejected {
                    payload: Rejection {
                        kind: other.kind(),
                        message: other.to_string(),
                        poll_id,
                    },
                }
            }
        }
    }
}
