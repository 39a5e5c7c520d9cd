//! Container log streaming.
//!
//! [`LogReader::open`] attaches to a container and hands back a
//! [`LogStream`]: a lazy, forward-only sequence of [`LogEvent`]s fed by a
//! background pump task through a bounded ring buffer. When the subscriber
//! falls behind, the oldest lines are dropped and a [`LogEvent::Gap`] is
//! delivered in their place. Dropping the stream aborts the pump and
//! releases the engine connection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fleetctl_common::error::{EngineError, ErrorKind};
use fleetctl_common::types::{ContainerId, LogLine, Target};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backend::RawLogStream;
use crate::dispatch::{self, SnapshotReceiver};
use crate::engine::Engine;

/// Why a log stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// The container no longer exists.
    TargetRemoved,
    /// The engine failed while streaming.
    #[serde(rename_all = "camelCase")]
    EngineError {
        /// Classification of the engine failure.
        kind: ErrorKind,
        /// Engine-provided detail.
        message: String,
    },
}

impl EndReason {
    /// Every end is reported to callers as a terminated stream.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::StreamTerminated
    }

    fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::NotFound { .. } => Self::TargetRemoved,
            other => Self::EngineError {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetRemoved => f.write_str("container removed"),
            Self::EngineError { message, .. } => write!(f, "engine error: {message}"),
        }
    }
}

/// One element of a log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LogEvent {
    /// A line of output.
    Line(LogLine),
    /// Lines were dropped because the subscriber fell behind.
    Gap {
        /// Number of lines lost.
        dropped: u64,
    },
    /// Terminal marker; nothing follows it.
    End {
        /// Why the stream ended.
        reason: EndReason,
    },
}

#[derive(Debug, Default)]
struct BufferState {
    lines: VecDeque<LogLine>,
    dropped: u64,
    end: Option<EndReason>,
}

/// Bounded single-consumer ring buffer between the pump and the reader.
#[derive(Debug)]
struct LogBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
    capacity: usize,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, line: LogLine) {
        {
            let mut state = self.lock();
            if state.lines.len() >= self.capacity {
                let _ = state.lines.pop_front();
                state.dropped += 1;
            }
            state.lines.push_back(line);
        }
        self.notify.notify_one();
    }

    fn finish(&self, reason: EndReason) {
        self.lock().end = Some(reason);
        self.notify.notify_one();
    }

    /// Takes the next event without waiting. Gaps come before the lines
    /// that follow them; the end marker comes after every buffered line.
    fn take(&self) -> Option<LogEvent> {
        let mut state = self.lock();
        if state.dropped > 0 {
            let dropped = std::mem::take(&mut state.dropped);
            return Some(LogEvent::Gap { dropped });
        }
        if let Some(line) = state.lines.pop_front() {
            return Some(LogEvent::Line(line));
        }
        state.end.take().map(|reason| LogEvent::End { reason })
    }
}

/// Live log subscription for one container.
#[derive(Debug)]
pub struct LogStream {
    id: ContainerId,
    name: String,
    buffer: Arc<LogBuffer>,
    pump: JoinHandle<()>,
    finished: bool,
}

impl LogStream {
    /// Id of the followed container.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Name of the followed container.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the next event. Returns `None` after the end marker.
    pub async fn next(&mut self) -> Option<LogEvent> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(event) = self.buffer.take() {
                if matches!(event, LogEvent::End { .. }) {
                    self.finished = true;
                }
                return Some(event);
            }
            self.buffer.notify.notified().await;
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Opens log subscriptions and one-shot tails.
#[derive(Debug, Clone)]
pub struct LogReader {
    engine: Engine,
    capacity: usize,
    snapshot: Option<SnapshotReceiver>,
}

impl LogReader {
    /// Creates a reader with a ring buffer of `capacity` lines per stream.
    #[must_use]
    pub const fn new(engine: Engine, capacity: usize) -> Self {
        Self {
            engine,
            capacity,
            snapshot: None,
        }
    }

    /// Resolves targets against the published container snapshot first.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SnapshotReceiver) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    async fn resolve(&self, target: &Target) -> Result<(ContainerId, String), EngineError> {
        let snapshot = self.snapshot.as_ref().and_then(|rx| rx.borrow().value.clone());
        let view = dispatch::resolve_target(&self.engine, snapshot.as_deref(), target).await?;
        Ok((view.id, view.name))
    }

    /// Attaches to a container's output, replaying the last `tail` lines
    /// first (the configured default when `None`).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the target does not resolve to a managed
    /// container, or the engine failure that prevented attaching.
    pub async fn open(&self, target: &Target, tail: Option<usize>) -> Result<LogStream, EngineError> {
        let (id, name) = self.resolve(target).await?;
        let raw = self.engine.open_log_stream(&id, tail).await?;
        let buffer = Arc::new(LogBuffer::new(self.capacity));
        tracing::debug!(id = %id, name = %name, "log stream attached");

        let pump = tokio::spawn(pump_lines(
            self.engine.clone(),
            id.clone(),
            raw,
            Arc::clone(&buffer),
        ));
        Ok(LogStream {
            id,
            name,
            buffer,
            pump,
            finished: false,
        })
    }

    /// Reads the last `lines` lines without following.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown target, or the engine failure.
    pub async fn tail(&self, target: &Target, lines: usize) -> Result<Vec<LogLine>, EngineError> {
        let (id, _) = self.resolve(target).await?;
        self.engine.tail_logs(&id, lines).await
    }
}

enum Presence {
    Running,
    Stopped,
    Gone,
    Unknown(EngineError),
}

async fn presence(engine: &Engine, id: &ContainerId) -> Presence {
    match engine.find(&Target::Id(id.clone())).await {
        Ok(view) if view.is_running() => Presence::Running,
        Ok(_) => Presence::Stopped,
        Err(EngineError::NotFound { .. }) => Presence::Gone,
        Err(e) => Presence::Unknown(e),
    }
}

/// Moves engine lines into the buffer until the stream ends.
///
/// Idle periods longer than one call timeout trigger an existence probe,
/// so a removed container ends the stream even when the engine keeps the
/// connection open. A stream the engine closes while the container still
/// exists is re-attached without replaying history.
async fn pump_lines(engine: Engine, id: ContainerId, mut raw: RawLogStream, buffer: Arc<LogBuffer>) {
    let idle = engine.call_timeout();
    loop {
        match tokio::time::timeout(idle, raw.next()).await {
            Ok(Some(Ok(line))) => buffer.push(line),
            Ok(Some(Err(e))) => {
                tracing::debug!(id = %id, error = %e, "log stream failed");
                buffer.finish(EndReason::from_error(&e));
                return;
            }
            Ok(None) => match presence(&engine, &id).await {
                Presence::Gone => {
                    buffer.finish(EndReason::TargetRemoved);
                    return;
                }
                Presence::Unknown(e) => {
                    buffer.finish(EndReason::from_error(&e));
                    return;
                }
                state => {
                    if matches!(state, Presence::Stopped) {
                        // Engines close the follow connection of a stopped
                        // container immediately; wait before re-attaching.
                        tokio::time::sleep(idle).await;
                    }
                    match reattach(&engine, &id).await {
                        Ok(stream) => raw = stream,
                        Err(e) => {
                            buffer.finish(EndReason::from_error(&e));
                            return;
                        }
                    }
                }
            },
            Err(_) => match presence(&engine, &id).await {
                Presence::Gone => {
                    buffer.finish(EndReason::TargetRemoved);
                    return;
                }
                Presence::Unknown(e) => {
                    tracing::debug!(id = %id, error = %e, "log probe failed, still waiting");
                }
                Presence::Running | Presence::Stopped => {}
            },
        }
    }
}

async fn reattach(engine: &Engine, id: &ContainerId) -> Result<RawLogStream, EngineError> {
    tracing::debug!(id = %id, "re-attaching log stream");
    engine.open_log_stream(id, Some(0)).await
}
