// Presenter-side model: gates poll creation on the absence of an active poll
// and tracks live results for display.

use crate::poll::PollSpec;
use crate::protocol::{ClientMessage, CreatePollRequest, PollAnnouncement, Rejection, ServerMessage};
use crate::results::ResultAggregate;
use crate::session::SessionError;

#[derive(Debug, Clone, Default)]
pub struct PresenterSession {
    active: Option<PollAnnouncement>,
    results: Option<ResultAggregate>,
    last_rejection: Option<Rejection>,
}

impl PresenterSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new poll may only be created once the current one is confirmed done.
    pub fn can_create(&self) -> bool {
        self.active.is_none()
    }

    pub fn active_poll(&self) -> Option<&PollAnnouncement> {
        self.active.as_ref()
    }

    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.last_rejection.as_ref()
    }

    /// Validate the form locally with the server's rules and build the
    /// request. Blank options are dropped and text is trimmed before sending.
    pub fn create_request(
        &self,
        question: &str,
        options: &[String],
        duration_seconds: i64,
    ) -> Result<ClientMessage, SessionError> {
        if let Some(active) = &self.active {
            return Err(SessionError::Conflict {
                active: active.poll_id.clone(),
            });
        }
        let spec = PollSpec::validate(question, options, duration_seconds)?;
        Ok(ClientMessage::CreatePoll {
            payload: CreatePollRequest {
                question: spec.question,
                options: spec.options,
                duration_seconds: i64::from(spec.duration_seconds),
            },
        })
    }

    /// Confirmation that participants are done. `None` when there is nothing
    /// to close.
    pub fn confirm_close(&self) -> Option<ClientMessage> {
        self.active.as_ref().map(|_| ClientMessage::ClosePoll)
    }

    /// Option texts paired with their live percentage, in poll order.
    /// Options without a result entry show 0.
    pub fn option_shares(&self) -> Vec<(String, f64)> {
        let Some(poll) = &self.active else {
            return Vec::new();
        };
        poll.options
            .iter()
            .map(|option| {
                let percentage = self
                    .results
                    .as_ref()
                    .and_then(|r| r.get(&option.id))
                    .map_or(0.0, |r| r.percentage);
                (option.text.clone(), percentage)
            })
            .collect()
    }

    pub fn apply(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::PollAnnounced { payload } => {
                self.active = Some(payload.clone());
                self.results = None;
                self.last_rejection = None;
            }
            ServerMessage::ResultsUpdated { payload } => {
                if self
                    .active
                    .as_ref()
                    .is_some_and(|p| p.poll_id == payload.poll_id)
                {
                    self.results = Some(payload.clone());
                }
            }
            ServerMessage::PollClosed { payload } => {
                if self
                    .active
                    .as_ref()
                    .is_some_and(|p| p.poll_id == payload.poll_id)
                {
                    self.active = None;
                    self.results = None;
                }
            }
            ServerMessage::RequestRejected { payload } => {
                self.last_rejection = Some(payload.clone());
            }
            ServerMessage::PollCreated { .. }
            | ServerMessage::AnswerAccepted { .. }
            | ServerMessage::AlreadyAnswered { .. }
            | ServerMessage::CloseAcknowledged { .. } => {}
        }
    }
}
