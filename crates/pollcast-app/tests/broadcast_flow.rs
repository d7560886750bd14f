// End-to-end tests for the live poll server.
//
// These run the real WebSocket server and coordinator tasks against clients
// connected over in-memory duplex pipes, and drive them with the same
// presenter and participant models a front end would use.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use pollcast_app::coordinator::{self, ControlCommand, Coordinator};
use pollcast_core::participant::{ParticipantSession, ParticipantStatus};
use pollcast_core::presenter::PresenterSession;
use pollcast_core::protocol::{ClientMessage, RejectionKind, ServerMessage};
use pollcast_core::ws_server::{self, Listener};

// ===========================================================================
// Test harness
// ===========================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Hands the server whatever pipes the test pushes into `rx`.
struct PipeListener {
    rx: mpsc::Receiver<DuplexStream>,
}

#[async_trait]
impl Listener for PipeListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> std::io::Result<(DuplexStream, String)> {
        match self.rx.recv().await {
            Some(stream) => Ok((stream, "pipe".to_string())),
            None => std::future::pending().await,
        }
    }
}

struct Harness {
    pipes: mpsc::Sender<DuplexStream>,
    cmd_tx: mpsc::Sender<ControlCommand>,
    coordinator: JoinHandle<anyhow::Result<()>>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start() -> Self {
        let (pipes, pipe_rx) = mpsc::channel(8);
        let (ws_tx, ws_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let server = tokio::spawn(ws_server::run(PipeListener { rx: pipe_rx }, ws_tx, 64));
        let coordinator = tokio::spawn(coordinator::run(ws_rx, cmd_rx, Coordinator::new()));

        Harness {
            pipes,
            cmd_tx,
            coordinator,
            server,
        }
    }

    /// Open a WebSocket client and wait until the coordinator knows about it.
    async fn connect(&self) -> Client {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        self.pipes.send(server_io).await.unwrap();
        let (ws, _) = tokio_tungstenite::client_async("ws://localhost/", client_io)
            .await
            .unwrap();
        let mut client = Client {
            ws,
            backlog: VecDeque::new(),
        };

        // Any frame from this connection is handled after its registration,
        // so a reply to a junk frame proves the client is subscribed. Frames
        // queued ahead of the reply (a snapshot) are kept for the test.
        client.send_raw("{}").await;
        let mut early = VecDeque::new();
        loop {
            match client.recv().await {
                ServerMessage::RequestRejected { payload }
                    if payload.kind == RejectionKind::Malformed =>
                {
                    break
                }
                other => early.push_back(other),
            }
        }
        client.backlog = early;
        client
    }

    async fn query_results(&self) -> Option<pollcast_core::results::ResultAggregate> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ControlCommand::QueryResults(tx))
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn shutdown(self) {
        self.cmd_tx.send(ControlCommand::Shutdown).await.unwrap();
        assert!(self.coordinator.await.unwrap().is_ok());
        drop(self.pipes);
        let _ = self.server.await.unwrap();
    }
}

struct Client {
    ws: WebSocketStream<DuplexStream>,
    backlog: VecDeque<ServerMessage>,
}

impl Client {
    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    async fn send(&mut self, msg: &ClientMessage) {
        let text = serde_json::to_string(msg).unwrap();
        self.send_raw(&text).await;
    }

    async fn recv(&mut self) -> ServerMessage {
        if let Some(msg) = self.backlog.pop_front() {
            return msg;
        }
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn assert_quiet(&mut self) {
        assert!(self.backlog.is_empty(), "unread frames: {:?}", self.backlog);
        if let Ok(Some(frame)) = tokio::time::timeout(QUIET_PERIOD, self.ws.next()).await {
            panic!("unexpected frame: {frame:?}");
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Presenter creates a poll; returns once every listed client has seen it.
async fn open_poll(
    presenter: &mut Client,
    model: &mut PresenterSession,
    options: &[&str],
    others: &mut [&mut Client],
) -> ServerMessage {
    let request = model
        .create_request("Pick one", &strings(options), 30)
        .unwrap();
    presenter.send(&request).await;

    assert!(matches!(presenter.recv().await, ServerMessage::PollCreated { .. }));
    let announced = presenter.recv().await;
    assert!(matches!(announced, ServerMessage::PollAnnounced { .. }));
    model.apply(&announced);

    for client in others.iter_mut() {
        assert_eq!(client.recv().await, announced);
    }
    announced
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn pick_one_scenario_end_to_end() {
    let harness = Harness::start();
    let mut presenter = harness.connect().await;
    let mut alice_ws = harness.connect().await;
    let mut bob_ws = harness.connect().await;

    let mut model = PresenterSession::new();
    let announced = open_poll(
        &mut presenter,
        &mut model,
        &["A", "B"],
        &mut [&mut alice_ws, &mut bob_ws],
    )
    .await;

    let mut alice = ParticipantSession::new("alice").unwrap();
    let mut bob = ParticipantSession::new("bob").unwrap();
    let now = Instant::now();
    alice.apply(&announced, now);
    bob.apply(&announced, now);

    let option_a = alice.poll().unwrap().options[0].id.clone();
    let option_b = bob.poll().unwrap().options[1].id.clone();

    // alice -> A
    alice_ws.send(&alice.submit(&option_a, now).unwrap()).await;
    let accepted = alice_ws.recv().await;
    assert!(matches!(accepted, ServerMessage::AnswerAccepted { .. }));
    alice.apply(&accepted, now);
    let update = alice_ws.recv().await;
    alice.apply(&update, now);
    assert_eq!(bob_ws.recv().await, update);
    assert_eq!(presenter.recv().await, update);
    model.apply(&update);
    assert_eq!(
        model.option_shares(),
        vec![("A".to_string(), 100.0), ("B".to_string(), 0.0)]
    );

    // bob -> B
    bob_ws.send(&bob.submit(&option_b, now).unwrap()).await;
    assert!(matches!(bob_ws.recv().await, ServerMessage::AnswerAccepted { .. }));
    let update = bob_ws.recv().await;
    assert_eq!(alice_ws.recv().await, update);
    assert_eq!(presenter.recv().await, update);
    model.apply(&update);
    assert_eq!(
        model.option_shares(),
        vec![("A".to_string(), 50.0), ("B".to_string(), 50.0)]
    );

    // alice again, bypassing the local guard: only alice hears about it.
    let duplicate = ClientMessage::SubmitAnswer {
        payload: pollcast_core::protocol::SubmitAnswerRequest {
            poll_id: alice.poll().unwrap().poll_id.clone(),
            option_id: option_a.clone(),
            participant_identity: "alice".into(),
        },
    };
    alice_ws.send(&duplicate).await;
    let notice = alice_ws.recv().await;
    assert!(matches!(notice, ServerMessage::AlreadyAnswered { .. }));
    alice.apply(&notice, now);
    assert!(matches!(
        alice.status(now),
        ParticipantStatus::AlreadyAnswered { .. }
    ));
    bob_ws.assert_quiet().await;
    presenter.assert_quiet().await;

    let results = harness.query_results().await.unwrap();
    assert_eq!(results.total(), 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn close_reaches_everyone_after_results() {
    let harness = Harness::start();
    let mut presenter = harness.connect().await;
    let mut alice_ws = harness.connect().await;

    let mut model = PresenterSession::new();
    let announced = open_poll(&mut presenter, &mut model, &["A", "B"], &mut [&mut alice_ws]).await;

    let mut alice = ParticipantSession::new("alice").unwrap();
    let now = Instant::now();
    alice.apply(&announced, now);
    let option = alice.poll().unwrap().options[1].id.clone();
    alice_ws.send(&alice.submit(&option, now).unwrap()).await;
    assert!(matches!(alice_ws.recv().await, ServerMessage::AnswerAccepted { .. }));
    let update = alice_ws.recv().await;
    assert!(matches!(update, ServerMessage::ResultsUpdated { .. }));
    assert_eq!(presenter.recv().await, update);

    presenter.send(&model.confirm_close().unwrap()).await;
    assert!(matches!(
        presenter.recv().await,
        ServerMessage::CloseAcknowledged { .. }
    ));
    let closed = presenter.recv().await;
    assert!(matches!(closed, ServerMessage::PollClosed { .. }));
    model.apply(&closed);
    assert!(model.can_create());

    assert_eq!(alice_ws.recv().await, closed);
    alice.apply(&closed, now);
    assert_eq!(alice.status(now), ParticipantStatus::PollClosed);
    assert!(harness.query_results().await.is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn conflicting_create_is_rejected_without_broadcast() {
    let harness = Harness::start();
    let mut presenter = harness.connect().await;
    let mut alice_ws = harness.connect().await;

    let mut model = PresenterSession::new();
    open_poll(&mut presenter, &mut model, &["A", "B"], &mut [&mut alice_ws]).await;

    // A second presenter tab that has not seen the first poll.
    let mut other_tab = harness.connect().await;
    assert!(matches!(other_tab.recv().await, ServerMessage::PollAnnounced { .. }));
    assert!(matches!(other_tab.recv().await, ServerMessage::ResultsUpdated { .. }));

    let fresh = PresenterSession::new();
    other_tab
        .send(&fresh.create_request("Another", &strings(&["X", "Y"]), 10).unwrap())
        .await;
    match other_tab.recv().await {
        ServerMessage::RequestRejected { payload } => {
            assert_eq!(payload.kind, RejectionKind::Conflict)
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    alice_ws.assert_quiet().await;
    presenter.assert_quiet().await;

    harness.shutdown().await;
}

#[tokio::test]
async fn answer_for_closed_poll_is_stale() {
    let harness = Harness::start();
    let mut presenter = harness.connect().await;
    let mut alice_ws = harness.connect().await;

    let mut model = PresenterSession::new();
    let announced = open_poll(&mut presenter, &mut model, &["A", "B"], &mut [&mut alice_ws]).await;

    let mut alice = ParticipantSession::new("alice").unwrap();
    let now = Instant::now();
    alice.apply(&announced, now);
    let option = alice.poll().unwrap().options[0].id.clone();
    // Build the answer before the close arrives, as a slow client would.
    let late_answer = alice.submit(&option, now).unwrap();

    presenter.send(&ClientMessage::ClosePoll).await;
    assert!(matches!(alice_ws.recv().await, ServerMessage::PollClosed { .. }));

    alice_ws.send(&late_answer).await;
    let reply = alice_ws.recv().await;
    match &reply {
        ServerMessage::RequestRejected { payload } => {
            assert_eq!(payload.kind, RejectionKind::Stale)
        }
        other => panic!("expected stale, got {other:?}"),
    }
    alice.apply(&reply, now);
    assert_eq!(alice.status(now), ParticipantStatus::PollClosed);

    harness.shutdown().await;
}

#[tokio::test]
async fn late_joiner_gets_poll_and_current_results() {
    let harness = Harness::start();
    let mut presenter = harness.connect().await;
    let mut alice_ws = harness.connect().await;

    let mut model = PresenterSession::new();
    let announced = open_poll(&mut presenter, &mut model, &["A", "B"], &mut [&mut alice_ws]).await;

    let mut alice = ParticipantSession::new("alice").unwrap();
    let now = Instant::now();
    alice.apply(&announced, now);
    let option = alice.poll().unwrap().options[0].id.clone();
    alice_ws.send(&alice.submit(&option, now).unwrap()).await;
    assert!(matches!(alice_ws.recv().await, ServerMessage::AnswerAccepted { .. }));
    let update = alice_ws.recv().await;

    let mut carol_ws = harness.connect().await;
    assert_eq!(carol_ws.recv().await, announced);
    assert_eq!(carol_ws.recv().await, update);

    let mut carol = ParticipantSession::new("carol").unwrap();
    carol.apply(&announced, now);
    carol.apply(&update, now);
    assert!(matches!(
        carol.status(now),
        ParticipantStatus::Answering { .. }
    ));
    assert_eq!(carol.results().unwrap().total(), 1);

    harness.shutdown().await;
}
