//! Per-connection tasks.
//!
//! Every established connection runs three tasks bound to the session's
//! cancellation scope:
//!
//!   1. **inbound**: reads frames, enforces the read deadline and inbound
//!      limits, and turns client messages into requests or replies.
//!   2. **outbound**: the only writer to the transport. Drains the outbound
//!      queue and sends keepalive pings.
//!   3. **actor**: owns the session's single-task state (delta buffers,
//!      snapshot bookkeeping) and runs the batching, heartbeat, and
//!      snapshot timers.
//!
//! Whichever task notices a problem first calls [`Client::close`]; that
//! cancels the scope and the other two follow.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gridsync_board::geometry::{checked_position, chebyshev};
use gridsync_board::{Board, MoveIntent};
use gridsync_protocol::{
    BincodeCodec, CapturedPiece, ClientMessage, ClientMove, Codec, DISGUISED_SEQNUM, MoveKind,
    MovedPiece, PieceId, Position, ServerMessage, SnapshotMessage,
};
use gridsync_session::ConnectionPermit;
use gridsync_transport::{Connection, Inbound, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::{Client, ClientSetup, SessionChannels, SessionCommand};
use crate::game::{DropReason, MoveRequest, Request, SubmitOutcome};
use crate::server::ServerState;
use crate::{ClientManager, SessionConfig};

/// Creates the session for an established connection and spawns its
/// tasks on `tracker`.
pub(crate) fn spawn_session(
    conn: WebSocketConnection,
    permit: ConnectionPermit,
    state: &Arc<ServerState>,
    scope: CancellationToken,
    tracker: &TaskTracker,
) {
    let config = &state.config;
    let soft = permit.is_risky();
    let limits = if soft {
        &config.soft_limits
    } else {
        &config.limits
    };
    let (client, channels) = Client::new(ClientSetup {
        id: state.next_client_id(),
        ip: permit.ip(),
        side: state.assign_side(),
        position: state.spawn_position(),
        config: &config.session,
        limits,
        encoder: state.encoder.clone(),
        index: &state.clients,
        scope,
        permit: Some(permit),
    });
    let mut actor = SessionActor::new(Arc::clone(&client), state.board.clone(), &config.session);
    actor.open(&state.clients);

    tracing::info!(
        client_id = %client.id(),
        conn_id = %conn.id(),
        ip = %client.ip(),
        side = %client.side(),
        position = %client.position(),
        soft,
        "session started"
    );

    let SessionChannels { outbound, commands } = channels;
    let conn = Arc::new(conn);

    tracker.spawn(inbound(Arc::clone(&conn), Arc::clone(&client), Arc::clone(state)));
    tracker.spawn(outbound_loop(
        conn,
        Arc::clone(&client),
        outbound,
        config.session.ping_interval,
    ));
    tracker.spawn(actor.run(commands));
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

async fn inbound(conn: Arc<WebSocketConnection>, client: Arc<Client>, state: Arc<ServerState>) {
    let read_timeout = state.config.session.read_timeout;
    let scope = client.scope().clone();

    let reason = loop {
        let received = tokio::select! {
            biased;
            _ = scope.cancelled() => break "cancelled",
            received = tokio::time::timeout(read_timeout, conn.recv()) => received,
        };

        let frame = match received {
            Ok(Ok(Some(Inbound::Frame(frame)))) => frame,
            // Any traffic renews the deadline; the next loop starts a new one.
            Ok(Ok(Some(Inbound::Pong))) => continue,
            Ok(Ok(None)) => break "peer closed",
            Ok(Err(e)) => {
                tracing::debug!(client_id = %client.id(), error = %e, "receive failed");
                break "receive failed";
            }
            Err(_) => break "read timeout",
        };

        if !client.limiters().messages.allow() {
            tracing::warn!(client_id = %client.id(), ip = %client.ip(), "inbound message rate exceeded");
            break "message rate exceeded";
        }

        let message: ClientMessage = match BincodeCodec.decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::trace!(client_id = %client.id(), error = %e, "undecodable frame dropped");
                continue;
            }
        };

        match message {
            ClientMessage::Move(mv) => handle_move(&client, &state, mv).await,
            ClientMessage::Subscribe { center_x, center_y } => {
                handle_subscribe(&client, &state, center_x, center_y);
            }
            ClientMessage::Ping => {
                client.send_message(&ServerMessage::Pong);
            }
        }
    };

    client.close(reason);
}

async fn handle_move(client: &Arc<Client>, state: &ServerState, mv: ClientMove) {
    let size = state.board.size();
    let (Some(from), Some(to)) = (
        checked_position(mv.from_x, mv.from_y, size),
        checked_position(mv.to_x, mv.to_y, size),
    ) else {
        tracing::trace!(client_id = %client.id(), "move with out-of-bounds coordinates dropped");
        return;
    };
    let Ok(kind) = MoveKind::try_from(mv.kind) else {
        tracing::trace!(client_id = %client.id(), kind = mv.kind, "move with unknown kind dropped");
        return;
    };
    client.touch();
    let limiters = client.limiters();
    let token = mv.move_token;

    if state.game.is_game_over() {
        if limiters.game_over_notices.allow() {
            client.send_message(&ServerMessage::InvalidMove { move_token: token });
        }
        return;
    }

    // Banned and suspected addresses get a reply that looks like success
    // and nothing else.
    let ip = client.ip();
    if state.bans.is_banned(ip) || state.bots.is_suspected(ip) {
        tracing::debug!(client_id = %client.id(), %ip, "move from flagged address discarded");
        if limiters.rejections.allow() {
            client.send_message(&ServerMessage::ValidMove {
                move_token: token,
                as_of_seqnum: DISGUISED_SEQNUM,
                captured_piece_id: None,
            });
        }
        return;
    }

    if !limiters.moves.allow() {
        tracing::debug!(client_id = %client.id(), "move rate exceeded");
        if limiters.rejections.allow() {
            client.send_message(&ServerMessage::InvalidMove { move_token: token });
        }
        return;
    }

    let request = Request::Move(MoveRequest {
        client: Arc::clone(client),
        intent: MoveIntent {
            piece_id: PieceId(mv.piece_id),
            from,
            to,
            kind,
            side: client.side(),
        },
        move_token: token,
    });
    match state.game.submit(request, client.scope()).await {
        SubmitOutcome::Queued => {}
        SubmitOutcome::Dropped(DropReason::Timeout) => {
            tracing::warn!(client_id = %client.id(), "request queue full, move dropped");
            if limiters.rejections.allow() {
                client.send_message(&ServerMessage::InvalidMove { move_token: token });
            }
        }
        SubmitOutcome::Dropped(reason) => {
            tracing::trace!(client_id = %client.id(), ?reason, "move not submitted");
        }
    }
}

fn handle_subscribe(client: &Arc<Client>, state: &ServerState, x: u32, y: u32) {
    let Some(center) = checked_position(x, y, state.board.size()) else {
        tracing::trace!(client_id = %client.id(), x, y, "subscribe out of bounds dropped");
        return;
    };
    client.touch();
    let old = client.set_position(center);
    state.clients.update_client_position(client, center, old);
    client.notify_position(center);
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

async fn outbound_loop(
    conn: Arc<WebSocketConnection>,
    client: Arc<Client>,
    mut frames: mpsc::Receiver<Bytes>,
    ping_interval: Duration,
) {
    let scope = client.scope().clone();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = conn.send(frame).await {
                        tracing::debug!(client_id = %client.id(), error = %e, "send failed");
                        client.close("send failed");
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if let Err(e) = conn.ping().await {
                    tracing::debug!(client_id = %client.id(), error = %e, "ping failed");
                    client.close("ping failed");
                    break;
                }
            }
        }
    }

    if let Err(e) = conn.close().await {
        tracing::trace!(client_id = %client.id(), error = %e, "transport close failed");
    }
    tracing::debug!(client_id = %client.id(), "outbound task stopped");
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Session state that only the actor task touches.
struct SessionActor {
    client: Arc<Client>,
    board: Board,
    batch_interval: Duration,
    heartbeat_interval: Duration,
    heartbeat_staleness: Duration,
    move_threshold: usize,
    capture_threshold: usize,
    /// Per-axis distance from the last snapshot center that makes a new
    /// snapshot due.
    resend_threshold: u16,
    moves: Vec<MovedPiece>,
    captures: Vec<CapturedPiece>,
    last_snapshot_center: Position,
    last_snapshot_at: Instant,
    snapshot_pending: bool,
}

impl SessionActor {
    fn new(client: Arc<Client>, board: Board, session: &SessionConfig) -> Self {
        let center = client.position();
        let resend_threshold = board
            .config()
            .snapshot_radius
            .saturating_sub(session.client_half_view);
        Self {
            client,
            board,
            batch_interval: session.batch_interval,
            heartbeat_interval: session.heartbeat_interval,
            heartbeat_staleness: session.heartbeat_staleness,
            move_threshold: session.move_buffer_threshold.max(1),
            capture_threshold: session.capture_buffer_threshold.max(1),
            resend_threshold,
            moves: Vec::new(),
            captures: Vec::new(),
            last_snapshot_center: center,
            last_snapshot_at: Instant::now(),
            snapshot_pending: false,
        }
    }

    /// Queues InitialState and only then makes the session visible to the
    /// fanout, so nothing can be delivered ahead of it. Mutations applied
    /// between the two are covered by a follow-up snapshot.
    fn open(&mut self, clients: &ClientManager) {
        let as_of = self.send_initial_state();
        clients.register_client(&self.client);
        if self.board.seqnum() != as_of {
            self.snapshot_pending = true;
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let client = Arc::clone(&self.client);
        let scope = client.scope().clone();

        let start = Instant::now();
        let mut batch = tokio::time::interval_at(start + self.batch_interval, self.batch_interval);
        batch.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat =
            tokio::time::interval_at(start + self.heartbeat_interval, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                _ = batch.tick() => self.flush(),
                _ = heartbeat.tick() => self.heartbeat(),
                ready = client.limiters().snapshots.wait(&scope), if self.snapshot_pending => {
                    if ready.is_err() {
                        break;
                    }
                    self.snapshot_pending = false;
                    self.send_snapshot();
                    self.check_snapshot_due();
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        tracing::debug!(client_id = %client.id(), "session actor stopped");
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Deltas { moves, captures } => {
                self.moves.extend(moves);
                self.captures.extend(captures);
                if self.moves.len() >= self.move_threshold
                    || self.captures.len() >= self.capture_threshold
                {
                    self.flush();
                }
            }
            SessionCommand::PositionChanged(_) => self.check_snapshot_due(),
        }
    }

    /// Returns the seqnum the initial snapshot was taken at.
    fn send_initial_state(&mut self) -> u64 {
        let center = self.client.position();
        let snapshot = self.board.snapshot(center);
        self.client.send_message(&SnapshotMessage::InitialState {
            position: center,
            side: self.client.side(),
            snapshot: &snapshot,
        });
        self.last_snapshot_center = center;
        self.last_snapshot_at = Instant::now();
        snapshot.seqnum
    }

    fn send_snapshot(&mut self) {
        let center = self.client.position();
        let snapshot = self.board.snapshot(center);
        tracing::trace!(
            client_id = %self.client.id(),
            %center,
            pieces = snapshot.pieces.len(),
            "sending snapshot"
        );
        self.client.send_message(&SnapshotMessage::Snapshot(&snapshot));
        self.last_snapshot_center = center;
        self.last_snapshot_at = Instant::now();
    }

    /// Marks a snapshot as due when the client has wandered too far from
    /// the last one. At most one is ever pending.
    fn check_snapshot_due(&mut self) {
        if self.snapshot_pending {
            return;
        }
        if chebyshev(self.client.position(), self.last_snapshot_center) > self.resend_threshold {
            self.snapshot_pending = true;
        }
    }

    fn heartbeat(&mut self) {
        if self.last_snapshot_at.elapsed() >= self.heartbeat_staleness {
            self.send_snapshot();
        }
    }

    fn flush(&mut self) {
        if self.moves.is_empty() && self.captures.is_empty() {
            return;
        }
        let message = ServerMessage::MovesAndCaptures {
            moves: std::mem::take(&mut self.moves),
            captures: std::mem::take(&mut self.captures),
        };
        self.client.send_message(&message);
    }
}
