//! The authoritative loop.
//!
//! One task owns the [`BoardWriter`] and applies requests strictly one at a
//! time, in queue order. That ordering is the arbitration rule: when two
//! sessions race for the same cell, whichever request was enqueued first
//! wins and the other is rejected by the board.
//!
//! ```text
//! sessions ──submit──→ [request queue] ──→ GameServer ──→ [fanout queue] ──→ fanout task
//!                                             │                                  │
//!                                   ValidMove/InvalidMove              deltas / broadcasts
//!                                     to the submitter                  to zone audiences
//! ```
//!
//! # States
//!
//! ```text
//! Running ──(terminal condition)──→ GameOver ──→ Draining ──→ Stopped
//!    └──────────(shutdown)──────────────────────→ Draining ──→ Stopped
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gridsync_board::{
    AdoptionRequest, BoardError, BoardWriter, BulkCaptureRequest, MoveIntent, MoveResult,
};
use gridsync_protocol::{
    BincodeCodec, CapturedPiece, Codec, FrameEncoder, MovedPiece, PieceData, ServerMessage,
};
use gridsync_session::BotDetector;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::{ActionSink, ClientManager, LoopConfig};

// ---------------------------------------------------------------------------
// Requests and events
// ---------------------------------------------------------------------------

/// A move from a session, already bounds-checked and rate-limited.
#[derive(Debug)]
pub struct MoveRequest {
    pub client: Arc<Client>,
    pub intent: MoveIntent,
    pub move_token: u32,
}

/// Work for the authoritative loop.
#[derive(Debug)]
pub enum Request {
    Move(MoveRequest),
    Adopt(AdoptionRequest),
    BulkCapture(BulkCaptureRequest),
}

/// An applied mutation on its way to interested sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutEvent {
    Moves {
        moved: Vec<MovedPiece>,
        captured: Option<CapturedPiece>,
    },
    Adoption {
        seqnum: u64,
        adopted: Vec<PieceData>,
    },
    BulkCapture {
        seqnum: u64,
        captured: Vec<CapturedPiece>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Running,
    /// A terminal condition was reached. Nothing is mutated any more.
    GameOver,
    /// Remaining queued requests are being answered.
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The queue stayed full for the whole enqueue timeout.
    Timeout,
    /// The submitting session closed while waiting.
    SessionClosed,
    /// The loop has stopped accepting requests.
    LoopStopped,
}

// ---------------------------------------------------------------------------
// GameServerHandle
// ---------------------------------------------------------------------------

/// Cloneable submit side of the authoritative loop.
#[derive(Debug, Clone)]
pub struct GameServerHandle {
    requests: mpsc::Sender<Request>,
    scope: CancellationToken,
    state: watch::Receiver<GameState>,
    game_over: Arc<AtomicBool>,
    enqueue_timeout: Duration,
}

impl GameServerHandle {
    /// Offers a request to the loop.
    ///
    /// Waits for queue space for at most the enqueue timeout, and gives up
    /// early if either the submitting session or the loop is cancelled.
    /// A dropped request has had no effect on the board.
    pub async fn submit(
        &self,
        request: Request,
        session_scope: &CancellationToken,
    ) -> SubmitOutcome {
        if self.scope.is_cancelled() {
            return SubmitOutcome::Dropped(DropReason::LoopStopped);
        }
        tokio::select! {
            biased;
            _ = session_scope.cancelled() => SubmitOutcome::Dropped(DropReason::SessionClosed),
            _ = self.scope.cancelled() => SubmitOutcome::Dropped(DropReason::LoopStopped),
            sent = tokio::time::timeout(self.enqueue_timeout, self.requests.send(request)) => {
                match sent {
                    Ok(Ok(())) => SubmitOutcome::Queued,
                    Ok(Err(_)) => SubmitOutcome::Dropped(DropReason::LoopStopped),
                    Err(_) => SubmitOutcome::Dropped(DropReason::Timeout),
                }
            }
        }
    }

    pub fn state(&self) -> GameState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<GameState> {
        self.state.clone()
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// GameServer
// ---------------------------------------------------------------------------

/// The single writer. Run it with [`GameServer::run`].
pub struct GameServer {
    writer: BoardWriter,
    requests: mpsc::Receiver<Request>,
    fanout: mpsc::Sender<FanoutEvent>,
    sink: Arc<dyn ActionSink>,
    bots: Arc<BotDetector>,
    state: watch::Sender<GameState>,
    /// Cancelled on game over or shutdown; new submits fail fast after.
    scope: CancellationToken,
    game_over: Arc<AtomicBool>,
    drain_grace: Duration,
}

impl GameServer {
    /// Creates the loop, its submit handle, and the receiving end of the
    /// fanout queue (to be handed to [`run_fanout`]).
    pub fn new(
        writer: BoardWriter,
        config: &LoopConfig,
        sink: Arc<dyn ActionSink>,
        bots: Arc<BotDetector>,
    ) -> (Self, GameServerHandle, mpsc::Receiver<FanoutEvent>) {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue.max(1));
        let (fanout_tx, fanout_rx) = mpsc::channel(config.fanout_queue.max(1));
        let (state_tx, state_rx) = watch::channel(GameState::Running);
        let scope = CancellationToken::new();
        let game_over = Arc::new(AtomicBool::new(false));

        let server = Self {
            writer,
            requests: request_rx,
            fanout: fanout_tx,
            sink,
            bots,
            state: state_tx,
            scope: scope.clone(),
            game_over: Arc::clone(&game_over),
            drain_grace: config.drain_grace,
        };
        let handle = GameServerHandle {
            requests: request_tx,
            scope,
            state: state_rx,
            game_over,
            enqueue_timeout: config.enqueue_timeout,
        };
        (server, handle, fanout_rx)
    }

    /// Processes requests until the game ends or `shutdown` fires, then
    /// drains what is left in the queue.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("game loop running");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.scope.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(request) => self.process(request).await,
                    None => break,
                },
            }
        }
        self.drain().await;
    }

    async fn drain(&mut self) {
        self.scope.cancel();
        self.requests.close();
        self.state.send_replace(GameState::Draining);

        let deadline = Instant::now() + self.drain_grace;
        let mut drained = 0usize;
        loop {
            match tokio::time::timeout_at(deadline, self.requests.recv()).await {
                Ok(Some(request)) => {
                    self.process(request).await;
                    drained += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(drained, "drain grace elapsed with requests still queued");
                    break;
                }
            }
        }

        self.state.send_replace(GameState::Stopped);
        tracing::info!(drained, seqnum = self.writer.reader().seqnum(), "game loop stopped");
    }

    async fn process(&mut self, request: Request) {
        match request {
            Request::Move(request) => self.process_move(request).await,
            Request::Adopt(request) => {
                if self.game_over.load(Ordering::Acquire) {
                    tracing::debug!("adoption dropped after game over");
                    return;
                }
                self.process_adoption(&request).await;
            }
            Request::BulkCapture(request) => self.process_bulk_capture(&request).await,
        }
    }

    async fn process_move(&mut self, request: MoveRequest) {
        let MoveRequest {
            client,
            intent,
            move_token,
        } = request;

        let result = match self.writer.apply_move(&intent) {
            Ok(result) => result,
            Err(rejection) => {
                tracing::debug!(
                    client_id = %client.id(),
                    piece = %intent.piece_id,
                    %rejection,
                    "move rejected"
                );
                client.send_message(&ServerMessage::InvalidMove { move_token });
                return;
            }
        };

        client.send_message(&ServerMessage::ValidMove {
            move_token,
            as_of_seqnum: result.seqnum,
            captured_piece_id: result.captured.map(|c| c.piece_id),
        });
        tracing::trace!(client_id = %client.id(), seqnum = result.seqnum, "move applied");
        self.bots.record_move(client.ip());
        self.sink.add_move(&result);

        let MoveResult {
            moved,
            captured,
            game_over,
            follow_up,
            ..
        } = result;
        self.publish(FanoutEvent::Moves { moved, captured }).await;

        // The follow-up completes the capture, so it runs even when that
        // capture ended the game.
        if let Some(follow_up) = follow_up {
            self.process_adoption(&follow_up).await;
        }
        if game_over {
            self.enter_game_over();
        }
    }

    async fn process_adoption(&mut self, request: &AdoptionRequest) {
        match self.writer.adopt(request) {
            Ok(result) => {
                tracing::debug!(
                    seqnum = result.seqnum,
                    adopted = result.adopted.len(),
                    to = %request.to_side,
                    "pieces adopted"
                );
                self.sink.add_adoption(&result);
                let game_over = result.game_over;
                self.publish(FanoutEvent::Adoption {
                    seqnum: result.seqnum,
                    adopted: result.adopted,
                })
                .await;
                if game_over {
                    self.enter_game_over();
                }
            }
            Err(e) => tracing::debug!(error = %e, "adoption not applied"),
        }
    }

    async fn process_bulk_capture(&mut self, request: &BulkCaptureRequest) {
        match self.writer.bulk_capture(request) {
            Ok(result) => {
                tracing::debug!(
                    seqnum = result.seqnum,
                    captured = result.captured.len(),
                    "bulk capture applied"
                );
                self.sink.add_bulk_capture(&result);
                let game_over = result.game_over;
                self.publish(FanoutEvent::BulkCapture {
                    seqnum: result.seqnum,
                    captured: result.captured,
                })
                .await;
                if game_over {
                    self.enter_game_over();
                }
            }
            Err(BoardError::GameOver) => tracing::debug!("bulk capture dropped after game over"),
            Err(e) => tracing::debug!(error = %e, "bulk capture not applied"),
        }
    }

    async fn publish(&self, event: FanoutEvent) {
        if self.fanout.send(event).await.is_err() {
            tracing::warn!("fanout task gone, event dropped");
        }
    }

    fn enter_game_over(&mut self) {
        if self.game_over.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.send_replace(GameState::GameOver);
        self.scope.cancel();
        tracing::info!(seqnum = self.writer.reader().seqnum(), "game over");
    }
}

// ---------------------------------------------------------------------------
// Fanout
// ---------------------------------------------------------------------------

/// Delivers applied mutations to the sessions that can see them. Runs until
/// the loop drops its end of the queue.
pub async fn run_fanout(
    mut events: mpsc::Receiver<FanoutEvent>,
    clients: Arc<ClientManager>,
    encoder: FrameEncoder,
) {
    while let Some(event) = events.recv().await {
        fan_out(&clients, &encoder, event);
    }
    tracing::debug!("fanout task stopped");
}

fn fan_out(clients: &ClientManager, encoder: &FrameEncoder, event: FanoutEvent) {
    let zones = clients.affected_zones_for(&event);
    let audience = clients.clients_for_zones(&zones);
    if audience.is_empty() {
        return;
    }

    match event {
        FanoutEvent::Moves { moved, captured } => {
            for client in audience.iter() {
                let moves: Vec<MovedPiece> = moved
                    .iter()
                    .filter(|m| client.is_interested(m.from) || client.is_interested(m.piece.position))
                    .copied()
                    .collect();
                let captures: Vec<CapturedPiece> = captured
                    .iter()
                    .filter(|c| client.is_interested(c.position))
                    .copied()
                    .collect();
                if moves.is_empty() && captures.is_empty() {
                    continue;
                }
                client.push_deltas(moves, captures);
            }
        }
        FanoutEvent::Adoption { seqnum, adopted } => {
            broadcast(&audience, encoder, &ServerMessage::Adoption { seqnum, adopted });
        }
        FanoutEvent::BulkCapture { seqnum, captured } => {
            broadcast(&audience, encoder, &ServerMessage::BulkCapture { seqnum, captured });
        }
    }
}

/// Encodes and frames `message` once and queues the same frame for every
/// session in `audience`.
fn broadcast(audience: &[Arc<Client>], encoder: &FrameEncoder, message: &ServerMessage) {
    let frame = match BincodeCodec
        .encode(message)
        .and_then(|payload| encoder.frame(&payload))
    {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode broadcast");
            return;
        }
    };
    let delivered = audience
        .iter()
        .filter(|client| client.send_frame(frame.clone()))
        .count();
    tracing::trace!(delivered, audience = audience.len(), "broadcast sent");
}
