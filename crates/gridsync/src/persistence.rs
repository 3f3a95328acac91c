//! Where applied mutations go after the board has accepted them.
//!
//! The authoritative loop calls an [`ActionSink`] synchronously after every
//! mutation, so sinks must never block. [`ActionLog`] hands records to a
//! bounded channel and drops them (with a warning) when the writer falls
//! behind; [`ActionLogWriter`] drains that channel into JSON lines.

use gridsync_board::{AdoptionResult, BulkCaptureResult, MoveResult};
use gridsync_protocol::{CapturedPiece, MovedPiece, PieceData};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Receives every applied mutation, in sequence order.
pub trait ActionSink: Send + Sync + 'static {
    fn add_move(&self, result: &MoveResult);
    fn add_adoption(&self, result: &AdoptionResult);
    fn add_bulk_capture(&self, result: &BulkCaptureResult);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActionSink for NullSink {
    fn add_move(&self, _result: &MoveResult) {}
    fn add_adoption(&self, _result: &AdoptionResult) {}
    fn add_bulk_capture(&self, _result: &BulkCaptureResult) {}
}

/// One line of the action log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRecord {
    Move {
        seqnum: u64,
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

impl ActionRecord {
    pub fn seqnum(&self) -> u64 {
        match self {
            Self::Move { seqnum, .. }
            | Self::Adoption { seqnum, .. }
            | Self::BulkCapture { seqnum, .. } => *seqnum,
        }
    }
}

/// Non-blocking sink that feeds an [`ActionLogWriter`].
#[derive(Debug, Clone)]
pub struct ActionLog {
    records: mpsc::Sender<ActionRecord>,
}

impl ActionLog {
    /// Creates the sink and the writer that drains it. `capacity` records
    /// may be in flight before new ones are dropped.
    pub fn new(capacity: usize) -> (Self, ActionLogWriter) {
        let (records, rx) = mpsc::channel(capacity.max(1));
        (Self { records }, ActionLogWriter { records: rx })
    }

    fn push(&self, record: ActionRecord) {
        match self.records.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                tracing::warn!(seqnum = record.seqnum(), "action log full, record dropped");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                tracing::debug!(seqnum = record.seqnum(), "action log closed, record dropped");
            }
        }
    }
}

impl ActionSink for ActionLog {
    fn add_move(&self, result: &MoveResult) {
        self.push(ActionRecord::Move {
            seqnum: result.seqnum,
            moved: result.moved.clone(),
            captured: result.captured,
        });
    }

    fn add_adoption(&self, result: &AdoptionResult) {
        self.push(ActionRecord::Adoption {
            seqnum: result.seqnum,
            adopted: result.adopted.clone(),
        });
    }

    fn add_bulk_capture(&self, result: &BulkCaptureResult) {
        self.push(ActionRecord::BulkCapture {
            seqnum: result.seqnum,
            captured: result.captured.clone(),
        });
    }
}

/// Drains an [`ActionLog`] into a writer.
#[derive(Debug)]
pub struct ActionLogWriter {
    records: mpsc::Receiver<ActionRecord>,
}

impl ActionLogWriter {
    /// Writes one JSON object per line until every [`ActionLog`] handle
    /// has been dropped, then flushes and returns.
    pub async fn run_forever<W>(mut self, mut writer: W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut line = Vec::with_capacity(256);
        let mut written = 0u64;
        while let Some(record) = self.records.recv().await {
            line.clear();
            serde_json::to_writer(&mut line, &record)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            written += 1;

            // Flush whenever the channel runs dry so the file stays current
            // without a syscall per record under load.
            if self.records.is_empty() {
                writer.flush().await?;
            }
        }
        writer.flush().await?;
        tracing::info!(records = written, "action log closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_protocol::{PieceId, PieceKind, Position, Side};

    fn moved(id: u32, seqnum: u64) -> MovedPiece {
        MovedPiece {
            from: Position::new(1, 1),
            piece: PieceData {
                id: PieceId(id),
                kind: PieceKind::Rook,
                side: Side::White,
                position: Position::new(1, 4),
                move_count: 1,
                capture_count: 0,
            },
            seqnum,
        }
    }

    fn move_result(seqnum: u64) -> MoveResult {
        MoveResult {
            seqnum,
            moved: vec![moved(7, seqnum)],
            captured: None,
            game_over: false,
            follow_up: None,
        }
    }

    #[tokio::test]
    async fn test_run_forever_writes_one_json_line_per_record() {
        let (log, writer) = ActionLog::new(8);
        log.add_move(&move_result(1));
        log.add_bulk_capture(&BulkCaptureResult {
            seqnum: 2,
            captured: vec![CapturedPiece {
                piece_id: PieceId(9),
                position: Position::new(2, 2),
                seqnum: 2,
            }],
            game_over: false,
        });
        drop(log);

        let mut out = Vec::new();
        writer.run_forever(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "move");
        assert_eq!(first["seqnum"], 1);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["action"], "bulk_capture");
        assert_eq!(second["captured"][0]["piece_id"], 9);
    }

    #[tokio::test]
    async fn test_add_move_full_channel_drops_without_blocking() {
        let (log, writer) = ActionLog::new(1);
        log.add_move(&move_result(1));
        log.add_move(&move_result(2));
        drop(log);

        let mut out = Vec::new();
        writer.run_forever(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"seqnum\":1"));
    }

    #[test]
    fn test_action_record_seqnum() {
        let record = ActionRecord::Adoption {
            seqnum: 42,
            adopted: Vec::new(),
        };
        assert_eq!(record.seqnum(), 42);
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let sink = NullSink;
        sink.add_move(&move_result(1));
        sink.add_adoption(&AdoptionResult {
            seqnum: 2,
            adopted: Vec::new(),
            game_over: false,
        });
    }
}
