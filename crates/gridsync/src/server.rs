//! `GridServer` builder and accept loop.
//!
//! This is the composition root. Everything shared (board, interest index,
//! ban list, bot detector, connection tracker, frame encoder) is created
//! here, owned by [`ServerState`], and torn down in order on shutdown:
//!
//! 1. stop accepting,
//! 2. cancel every session and the authoritative loop,
//! 3. wait up to `shutdown_grace` for session tasks, the loop's drain, and
//!    the fanout and action-log tasks.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use gridsync_board::layout::tiled_sets;
use gridsync_board::{Board, BoardConfig, MoveRules, StandardRules};
use gridsync_protocol::{FrameEncoder, PieceData, Position, Side};
use gridsync_session::{AbuseConfig, BotDetector, ConnectionTracker, IpBanList, LimitsConfig};
use gridsync_transport::{PendingConnection, PendingWebSocket, Transport, WebSocketTransport};
use rand::Rng;
use tokio::fs::File;
use tokio::io::BufWriter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::ClientId;
use crate::game::{FanoutEvent, GameServer, GameServerHandle, run_fanout};
use crate::handler::spawn_session;
use crate::{
    ActionLog, ActionLogWriter, ActionSink, ClientManager, GridsyncError, LoopConfig, NullSink,
    ServerConfig, SessionConfig, SideAssignment, SpawnPolicy,
};

/// Compressor contexts kept warm for outbound frames.
const IDLE_COMPRESSORS: usize = 16;

/// Shared server state passed to each connection's tasks.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) board: Board,
    pub(crate) clients: Arc<ClientManager>,
    pub(crate) bans: Arc<IpBanList>,
    pub(crate) bots: Arc<BotDetector>,
    pub(crate) connections: Arc<ConnectionTracker>,
    pub(crate) game: GameServerHandle,
    pub(crate) encoder: FrameEncoder,
    next_client_id: AtomicU64,
    sessions_started: AtomicU64,
}

impl ServerState {
    pub(crate) fn next_client_id(&self) -> ClientId {
        ClientId::new(self.next_client_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn assign_side(&self) -> Side {
        match self.config.side_assignment {
            SideAssignment::Fixed(side) => side,
            SideAssignment::Alternate => {
                if self.sessions_started.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
                    Side::White
                } else {
                    Side::Black
                }
            }
        }
    }

    pub(crate) fn spawn_position(&self) -> Position {
        let size = self.board.size().max(1);
        match self.config.spawn {
            SpawnPolicy::Fixed(pos) => Position::new(pos.x.min(size - 1), pos.y.min(size - 1)),
            SpawnPolicy::Random => {
                let mut rng = rand::rng();
                Position::new(rng.random_range(0..size), rng.random_range(0..size))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a gridsync server.
///
/// # Example
///
/// ```rust,no_run
/// # async fn run() -> Result<(), gridsync::GridsyncError> {
/// let server = gridsync::GridServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
/// # }
/// ```
pub struct GridServerBuilder {
    config: ServerConfig,
    rules: Arc<dyn MoveRules>,
    layout: Option<Vec<PieceData>>,
    sink: Option<Arc<dyn ActionSink>>,
}

impl GridServerBuilder {
    /// Creates a builder with default settings and [`StandardRules`].
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            rules: Arc::new(StandardRules::default()),
            layout: None,
            sink: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn board_config(mut self, config: BoardConfig) -> Self {
        self.config.board = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    pub fn loop_config(mut self, config: LoopConfig) -> Self {
        self.config.game_loop = config;
        self
    }

    /// Sets the standard and soft limit presets.
    pub fn limits(mut self, standard: LimitsConfig, soft: LimitsConfig) -> Self {
        self.config.limits = standard;
        self.config.soft_limits = soft;
        self
    }

    pub fn abuse_config(mut self, config: AbuseConfig) -> Self {
        self.config.abuse = config;
        self
    }

    pub fn spawn(mut self, policy: SpawnPolicy) -> Self {
        self.config.spawn = policy;
        self
    }

    pub fn side_assignment(mut self, assignment: SideAssignment) -> Self {
        self.config.side_assignment = assignment;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Appends every applied mutation to `path` as JSON lines. Ignored when
    /// a custom sink is set with [`action_sink`](Self::action_sink).
    pub fn action_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.action_log_path = Some(path.into());
        self
    }

    pub fn action_sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn rules(mut self, rules: Arc<dyn MoveRules>) -> Self {
        self.rules = rules;
        self
    }

    /// Initial pieces. Defaults to chess sets tiled across the board.
    pub fn layout(mut self, pieces: Vec<PieceData>) -> Self {
        self.layout = Some(pieces);
        self
    }

    /// Creates the board and loop and binds the listener.
    pub async fn build(self) -> Result<GridServer, GridsyncError> {
        let config = self.config;
        let pieces = self
            .layout
            .unwrap_or_else(|| tiled_sets(config.board.size));
        let (writer, board) = Board::create(config.board.clone(), self.rules, pieces)?;

        let mut log_writer = None;
        let sink: Arc<dyn ActionSink> = match (self.sink, &config.action_log_path) {
            (Some(sink), _) => sink,
            (None, Some(path)) => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                tracing::info!(path = %path.display(), "action log enabled");
                let (log, writer) = ActionLog::new(config.game_loop.request_queue);
                log_writer = Some((writer, file));
                Arc::new(log)
            }
            (None, None) => Arc::new(NullSink),
        };

        let bots = Arc::new(BotDetector::from_config(&config.abuse));
        let (game, handle, fanout) =
            GameServer::new(writer, &config.game_loop, sink, Arc::clone(&bots));

        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let state = Arc::new(ServerState {
            board,
            clients: Arc::new(ClientManager::new(
                config.board.size,
                config.board.zone_size,
                config.session.interest_radius,
            )),
            bans: Arc::new(IpBanList::new()),
            bots,
            connections: ConnectionTracker::from_config(&config.abuse),
            game: handle,
            encoder: FrameEncoder::new(
                config.session.min_compress_bytes,
                config.session.compression_level,
                IDLE_COMPRESSORS,
            ),
            next_client_id: AtomicU64::new(1),
            sessions_started: AtomicU64::new(0),
            config,
        });

        Ok(GridServer {
            transport,
            state,
            game,
            fanout,
            log_writer,
        })
    }
}

impl Default for GridServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A built server. Call [`run_until`](Self::run_until) to start it.
pub struct GridServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
    game: GameServer,
    fanout: mpsc::Receiver<FanoutEvent>,
    log_writer: Option<(ActionLogWriter, File)>,
}

impl GridServer {
    pub fn builder() -> GridServerBuilder {
        GridServerBuilder::new()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GridsyncError> {
        Ok(self.transport.local_addr()?)
    }

    /// A handle for inspecting and steering the server while it runs.
    pub fn handle(&self) -> Result<ServerHandle, GridsyncError> {
        Ok(ServerHandle {
            board: self.state.board.clone(),
            bans: Arc::clone(&self.state.bans),
            clients: Arc::clone(&self.state.clients),
            connections: Arc::clone(&self.state.connections),
            game: self.state.game.clone(),
            local_addr: self.local_addr()?,
        })
    }

    /// Runs until the process is terminated.
    pub async fn run(self) -> Result<(), GridsyncError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` completes, then shuts down
    /// gracefully.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), GridsyncError> {
        let GridServer {
            mut transport,
            state,
            game,
            fanout,
            log_writer,
        } = self;
        let local_addr = transport.local_addr()?;

        let root = CancellationToken::new();
        let sessions = root.child_token();
        let tracker = TaskTracker::new();

        let loop_task = tokio::spawn(game.run(root.child_token()));
        let fanout_task = tokio::spawn(run_fanout(
            fanout,
            Arc::clone(&state.clients),
            state.encoder.clone(),
        ));
        let log_task = log_writer.map(|(writer, file)| {
            tokio::spawn(async move {
                if let Err(e) = writer.run_forever(BufWriter::new(file)).await {
                    tracing::error!(error = %e, "action log writer failed");
                }
            })
        });

        let mut prune = tokio::time::interval(state.config.abuse.bot_window.max(Duration::from_secs(1)));
        tokio::pin!(shutdown);

        tracing::info!(%local_addr, "gridsync server running");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = transport.accept() => match accepted {
                    Ok(pending) => admit(pending, &state, &sessions, &tracker),
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
                _ = prune.tick() => state.bots.prune(),
            }
        }

        drop(transport);
        tracing::info!(sessions = state.clients.client_count(), "shutting down");
        root.cancel();
        tracker.close();

        let mut background = vec![("game loop", loop_task), ("fanout", fanout_task)];
        if let Some(task) = log_task {
            background.push(("action log", task));
        }
        let deadline = Instant::now() + state.config.shutdown_grace;
        let stragglers = wait_all(deadline, &tracker, background).await;
        if stragglers > 0 {
            tracing::warn!(stragglers, "shutdown grace elapsed with tasks still running");
        }

        tracing::info!("gridsync server stopped");
        Ok(())
    }
}

/// Waits for the tracked session tasks and then for each background task,
/// all against the same deadline. Returns how many had not finished.
async fn wait_all(
    deadline: Instant,
    tracker: &TaskTracker,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
) -> usize {
    let mut stragglers = 0;
    if timeout_at(deadline, tracker.wait()).await.is_err() {
        tracing::warn!(sessions = tracker.len(), "sessions still running at shutdown deadline");
        stragglers += tracker.len();
    }
    for (name, task) in tasks {
        match timeout_at(deadline, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(task = name, error = %e, "task failed during shutdown"),
            Err(_) => {
                tracing::warn!(task = name, "task still running at shutdown deadline");
                stragglers += 1;
            }
        }
    }
    stragglers
}

/// Claims a per-IP slot and upgrades the connection in its own task so a
/// slow handshake never stalls the accept loop.
fn admit(
    pending: PendingWebSocket,
    state: &Arc<ServerState>,
    sessions: &CancellationToken,
    tracker: &TaskTracker,
) {
    let peer = pending.peer_addr();
    let permit = match state.connections.register(peer.ip()) {
        Ok(permit) => permit,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "connection refused");
            return;
        }
    };

    let state = Arc::clone(state);
    let scope = sessions.child_token();
    let session_tracker = tracker.clone();
    tracker.spawn(async move {
        let timeout = state.config.handshake_timeout;
        let max_frame = state.config.session.max_frame_size;
        let established = tokio::select! {
            _ = scope.cancelled() => return,
            established = tokio::time::timeout(timeout, pending.establish(max_frame)) => established,
        };
        match established {
            Ok(Ok(conn)) => spawn_session(conn, permit, &state, scope, &session_tracker),
            Ok(Err(e)) => tracing::debug!(%peer, error = %e, "handshake failed"),
            Err(_) => tracing::debug!(%peer, "handshake timed out"),
        }
    });
}

// ---------------------------------------------------------------------------
// ServerHandle
// ---------------------------------------------------------------------------

/// Cloneable view of a running server for operators and tests.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    board: Board,
    bans: Arc<IpBanList>,
    clients: Arc<ClientManager>,
    connections: Arc<ConnectionTracker>,
    game: GameServerHandle,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Read handle onto the authoritative board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn bans(&self) -> &IpBanList {
        &self.bans
    }

    /// Submit side of the authoritative loop, for adoptions and bulk
    /// captures initiated by the operator.
    pub fn game(&self) -> &GameServerHandle {
        &self.game
    }

    pub fn client_count(&self) -> usize {
        self.clients.client_count()
    }

    pub fn connection_count(&self, ip: std::net::IpAddr) -> usize {
        self.connections.count(ip)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stuck() -> JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_all_stuck_tasks_share_one_deadline() {
        let tracker = TaskTracker::new();
        tracker.spawn(std::future::pending::<()>());
        tracker.close();

        let grace = Duration::from_secs(2);
        let started = Instant::now();
        let tasks = vec![("game loop", stuck()), ("fanout", stuck()), ("action log", stuck())];
        let stragglers = wait_all(started + grace, &tracker, tasks).await;

        assert_eq!(stragglers, 4);
        assert_eq!(started.elapsed(), grace);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_all_finished_tasks_return_immediately() {
        let tracker = TaskTracker::new();
        tracker.spawn(async {});
        tracker.close();

        let started = Instant::now();
        let tasks = vec![("fanout", tokio::spawn(async {}))];
        let stragglers = wait_all(started + Duration::from_secs(2), &tracker, tasks).await;

        assert_eq!(stragglers, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
