// Broadcast coordinator and its event loop.
//
// A single task owns the `SessionManager` and the subscriber registry and
// handles one event at a time, so create, submit and close never interleave.
// Each connection's outbound queue is FIFO, which gives every party
// POLL_ANNOUNCED before any RESULTS_UPDATED for that poll, and POLL_CLOSED
// after them.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use pollcast_core::poll::{OptionId, PollId};
use pollcast_core::protocol::{
    AnswerReceipt, ClientMessage, CloseAck, CreatePollRequest, PollRef, ServerMessage,
    SubmitAnswerRequest,
};
use pollcast_core::results::ResultAggregate;
use pollcast_core::session::SessionManager;
use pollcast_core::ws_server::{ConnectionId, WsEvent};

use crate::registry::SubscriberRegistry;

/// Out-of-band instructions for the event loop.
#[derive(Debug)]
pub enum ControlCommand {
    /// Stop the loop.
    Shutdown,
    /// Reply with the active poll's current aggregate.
    QueryResults(oneshot::Sender<Option<ResultAggregate>>),
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Session state plus the connections it is broadcast to.
#[derive(Debug, Default)]
pub struct Coordinator {
    pub session: SessionManager,
    pub subscribers: SubscriberRegistry,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event from the WebSocket server.
    pub fn handle_event(&mut self, event: WsEvent) {
        match event {
            WsEvent::Connected { id, addr, outbound } => {
                info!("Client #{id} connected from {addr}");
                self.subscribers.add(id, addr, outbound);
                self.send_snapshot(id);
            }
            WsEvent::Disconnected { id } => {
                if self.subscribers.remove(id) {
                    info!("Client #{id} disconnected");
                }
            }
            WsEvent::Message { id, text } => self.handle_message(id, &text),
        }
    }

    /// Bring a newly connected client up to date with the active poll.
    fn send_snapshot(&mut self, id: ConnectionId) {
        let Some(poll) = self.session.active_poll() else {
            return;
        };
        let announce = ServerMessage::announced(poll);
        let results = self.session.current_results().map(ServerMessage::results);

        self.reply(id, &announce);
        if let Some(results) = results {
            self.reply(id, &results);
        }
    }

    fn handle_message(&mut self, id: ConnectionId, text: &str) {
        // Clients the registry dropped as slow no longer act on the session.
        if !self.subscribers.contains(id) {
            debug!("Ignoring frame from unsubscribed client #{id}");
            return;
        }

        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to parse message from client #{id}: {e}");
                self.reply(id, &ServerMessage::malformed(format!("unrecognized message: {e}")));
                return;
            }
        };

        match msg {
            ClientMessage::CreatePoll { payload } => self.handle_create(id, payload),
            ClientMessage::SubmitAnswer { payload } => self.handle_submit(id, payload),
            ClientMessage::ClosePoll => self.handle_close(id),
        }
    }

    fn handle_create(&mut self, id: ConnectionId, req: CreatePollRequest) {
        match self
            .session
            .create(&req.question, &req.options, req.duration_seconds)
        {
            Ok(poll) => {
                self.reply(
                    id,
                    &ServerMessage::PollCreated {
                        payload: PollRef {
                            poll_id: poll.id.clone(),
                        },
                    },
                );
                self.broadcast(&ServerMessage::announced(&poll));
            }
            Err(e) => {
                info!("Create-poll from client #{id} rejected: {e}");
                self.reply(id, &ServerMessage::from(&e));
            }
        }
    }

    fn handle_submit(&mut self, id: ConnectionId, req: SubmitAnswerRequest) {
        let SubmitAnswerRequest {
            poll_id,
            option_id,
            participant_identity,
        } = req;

        match self
            .session
            .submit_answer(&poll_id, &option_id, &participant_identity)
        {
            Ok(aggregate) => {
                self.reply(id, &accepted(poll_id, option_id));
                self.broadcast(&ServerMessage::results(aggregate));
            }
            Err(e) => {
                info!("Answer from client #{id} ({participant_identity}) rejected: {e}");
                self.reply(id, &ServerMessage::from(&e));
            }
        }
    }

    fn handle_close(&mut self, id: ConnectionId) {
        let closed = self.session.close().map(|poll| poll.id);
        self.reply(
            id,
            &ServerMessage::CloseAcknowledged {
                payload: CloseAck {
                    poll_id: closed.clone(),
                },
            },
        );
        match closed {
            Some(poll_id) => self.broadcast(&ServerMessage::closed(poll_id)),
            None => debug!("Close from client #{id} with no active poll"),
        }
    }

    fn reply(&mut self, id: ConnectionId, msg: &ServerMessage) {
        match msg.to_json() {
            Ok(text) => {
                self.subscribers.send_to(id, text);
            }
            Err(e) => warn!("Failed to serialize reply: {e}"),
        }
    }

    fn broadcast(&mut self, msg: &ServerMessage) {
        match msg.to_json() {
            Ok(text) => {
                let delivered = self.subscribers.broadcast(&text);
                debug!("Broadcast delivered to {delivered} clients");
            }
            Err(e) => warn!("Failed to serialize broadcast: {e}"),
        }
    }
}

fn accepted(poll_id: PollId, option_id: OptionId) -> ServerMessage {
    ServerMessage::AnswerAccepted {
        payload: AnswerReceipt { poll_id, option_id },
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the coordinator until shutdown.
///
/// Listens on two channels using `tokio::select!`:
/// 1. Connection events from the WebSocket server
/// 2. Control commands from the process (shutdown, queries)
pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    mut cmd_rx: mpsc::Receiver<ControlCommand>,
    mut coordinator: Coordinator,
) -> anyhow::Result<()> {
    info!("Coordinator event loop started");

    loop {
        tokio::select! {
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(event) => coordinator.handle_event(event),
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ControlCommand::Shutdown) => {
                        info!("Shutdown command received");
                        break;
                    }
                    Some(ControlCommand::QueryResults(reply)) => {
                        let _ = reply.send(coordinator.session.current_results());
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    info!(
        "Coordinator event loop exiting ({} clients connected)",
        coordinator.subscribers.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
