//! One connected session.
//!
//! A [`Client`] is shared (`Arc`) between the session's own three tasks,
//! the authoritative loop (which answers its moves), the fanout task, and
//! the interest index. Everything that only one task touches lives in that
//! task instead (see [`handler`](crate::handler)). What remains here is
//! the cross-task surface:
//!
//! - `position`: packed into one `AtomicU32`; written by the inbound task,
//!   read by the fanout interest filter and the actor.
//! - `closed` + `scope`: the close flag and cancellation token.
//! - `outbound`: the frame queue sender behind the send mutex.
//! - `commands`: the actor's command queue sender.
//! - `limiters`: token buckets, internally locked.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use gridsync_board::geometry::within_radius;
use gridsync_protocol::{
    BincodeCodec, CapturedPiece, Codec, FrameEncoder, MovedPiece, Position, ProtocolError, Side,
};
use gridsync_session::{ConnectionPermit, Limiters, LimitsConfig};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{ClientManager, SessionConfig};

/// Server-assigned session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Messages for the session actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Deltas that passed this session's interest filter, to be batched.
    Deltas {
        moves: Vec<MovedPiece>,
        captures: Vec<CapturedPiece>,
    },
    /// The client subscribed to a new position.
    PositionChanged(Position),
}

/// Everything needed to create a [`Client`].
pub struct ClientSetup<'a> {
    pub id: ClientId,
    pub ip: IpAddr,
    pub side: Side,
    pub position: Position,
    pub config: &'a SessionConfig,
    pub limits: &'a LimitsConfig,
    pub encoder: FrameEncoder,
    pub index: &'a Arc<ClientManager>,
    pub scope: CancellationToken,
    pub permit: Option<ConnectionPermit>,
}

/// Receiving ends owned by the session's tasks.
#[derive(Debug)]
pub struct SessionChannels {
    /// Framed messages for the outbound task.
    pub outbound: mpsc::Receiver<Bytes>,
    /// Commands for the actor task.
    pub commands: mpsc::Receiver<SessionCommand>,
}

struct Outbound {
    /// `None` once the session is closed.
    frames: Option<mpsc::Sender<Bytes>>,
    /// Reused encode buffer.
    scratch: Vec<u8>,
}

pub struct Client {
    id: ClientId,
    ip: IpAddr,
    side: Side,
    position: AtomicU32,
    interest_radius: u16,
    activity_threshold: Duration,
    closed: AtomicBool,
    scope: CancellationToken,
    outbound: Mutex<Outbound>,
    commands: mpsc::Sender<SessionCommand>,
    limiters: Limiters,
    encoder: FrameEncoder,
    codec: BincodeCodec,
    last_action: Mutex<Instant>,
    permit: Mutex<Option<ConnectionPermit>>,
    index: Weak<ClientManager>,
}

fn pack(pos: Position) -> u32 {
    (u32::from(pos.x) << 16) | u32::from(pos.y)
}

fn unpack(raw: u32) -> Position {
    Position::new((raw >> 16) as u16, raw as u16)
}

impl Client {
    pub fn new(setup: ClientSetup<'_>) -> (Arc<Self>, SessionChannels) {
        let (frames, outbound) = mpsc::channel(setup.config.outbound_queue.max(1));
        let (commands, command_rx) = mpsc::channel(setup.config.command_queue.max(1));

        let client = Arc::new(Self {
            id: setup.id,
            ip: setup.ip,
            side: setup.side,
            position: AtomicU32::new(pack(setup.position)),
            interest_radius: setup.config.interest_radius,
            activity_threshold: setup.config.activity_threshold,
            closed: AtomicBool::new(false),
            scope: setup.scope,
            outbound: Mutex::new(Outbound {
                frames: Some(frames),
                scratch: Vec::with_capacity(256),
            }),
            commands,
            limiters: Limiters::new(setup.limits),
            encoder: setup.encoder,
            codec: BincodeCodec,
            last_action: Mutex::new(Instant::now()),
            permit: Mutex::new(setup.permit),
            index: Arc::downgrade(setup.index),
        });

        let channels = SessionChannels {
            outbound,
            commands: command_rx,
        };
        (client, channels)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn position(&self) -> Position {
        unpack(self.position.load(Ordering::Acquire))
    }

    /// Stores a new position and returns the previous one.
    pub fn set_position(&self, pos: Position) -> Position {
        unpack(self.position.swap(pack(pos), Ordering::AcqRel))
    }

    /// `true` if `pos` is within the interest radius of the session's
    /// current position.
    pub fn is_interested(&self, pos: Position) -> bool {
        within_radius(self.position(), pos, self.interest_radius)
    }

    pub fn limiters(&self) -> &Limiters {
        &self.limiters
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records that the client did something.
    pub fn touch(&self) {
        *self.last_action.lock() = Instant::now();
    }

    /// `true` if the client acted within the activity threshold.
    pub fn is_active(&self) -> bool {
        self.last_action.lock().elapsed() <= self.activity_threshold
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Encodes `message` and queues it. Returns `false` if nothing was
    /// queued.
    pub fn send_message<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        let mut outbound = self.outbound.lock();
        let Outbound { frames, scratch } = &mut *outbound;
        let Some(frames) = frames.as_ref() else {
            return false;
        };

        scratch.clear();
        let framed = match self.codec.encode_into(message, scratch) {
            Ok(()) => self.encoder.frame(scratch),
            Err(e) => Err(e),
        };
        let frame = match framed {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(client_id = %self.id, error = %e, "failed to encode message");
                return false;
            }
        };
        let result = frames.try_send(frame);
        drop(outbound);
        self.after_send(result)
    }

    /// Frames already-encoded bytes and queues them.
    pub fn send_encoded(&self, payload: &[u8]) -> Result<bool, ProtocolError> {
        let frame = self.encoder.frame(payload)?;
        Ok(self.send_frame(frame))
    }

    /// Queues a finished frame. Used to broadcast one frame to many
    /// sessions.
    pub fn send_frame(&self, frame: Bytes) -> bool {
        let result = {
            let outbound = self.outbound.lock();
            match outbound.frames.as_ref() {
                Some(frames) => frames.try_send(frame),
                None => return false,
            }
        };
        self.after_send(result)
    }

    fn after_send(&self, result: Result<(), TrySendError<Bytes>>) -> bool {
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.close("outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Hands filtered deltas to the actor. A session that cannot keep up
    /// is closed.
    pub fn push_deltas(&self, moves: Vec<MovedPiece>, captures: Vec<CapturedPiece>) -> bool {
        match self
            .commands
            .try_send(SessionCommand::Deltas { moves, captures })
        {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.close("command queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Tells the actor the position changed. If its queue is full the
    /// actor will see the new position with the next command anyway.
    pub fn notify_position(&self, pos: Position) {
        let _ = self.commands.try_send(SessionCommand::PositionChanged(pos));
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Closes the session. Only the first call has any effect.
    ///
    /// Cancels the session scope (stopping all three tasks), closes the
    /// outbound queue, releases the per-IP connection slot, and removes the
    /// session from the interest index. The outbound task closes the
    /// transport on its way out.
    pub fn close(&self, reason: &str) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::info!(client_id = %self.id, ip = %self.ip, reason, "closing session");

        self.scope.cancel();
        self.outbound.lock().frames = None;
        self.permit.lock().take();
        if let Some(index) = self.index.upgrade() {
            index.unregister_client(self.id);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("ip", &self.ip)
            .field("side", &self.side)
            .field("position", &self.position())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
