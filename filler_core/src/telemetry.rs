//! Off-loop telemetry publishing.
//!
//! The control loop hands events and status snapshots to a `ChannelSink`,
//! which never blocks: a full queue drops the message and reports it as a
//! sink error (logged by the supervisor). A `TelemetryPublisher` thread
//! drains the queue into a caller-supplied handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel as xch;
use filler_traits::{BoxError, EventSink};
use thiserror::Error;

use crate::state::StatusSnapshot;

const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Event { kind: String, detail: String },
    Status(StatusSnapshot),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("telemetry queue full, message dropped")]
    QueueFull,
    #[error("telemetry publisher stopped")]
    Closed,
}

/// Non-blocking producer side.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: xch::Sender<Telemetry>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    fn offer(&self, msg: Telemetry) -> Result<(), BoxError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(xch::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(Box::new(TelemetryError::QueueFull))
            }
            Err(xch::TrySendError::Disconnected(_)) => Err(Box::new(TelemetryError::Closed)),
        }
    }
}

impl EventSink<StatusSnapshot> for ChannelSink {
    fn publish_event(&mut self, kind: &str, detail: &str) -> Result<(), BoxError> {
        self.offer(Telemetry::Event {
            kind: kind.to_string(),
            detail: detail.to_string(),
        })
    }

    fn publish_status(&mut self, snapshot: &StatusSnapshot) -> Result<(), BoxError> {
        self.offer(Telemetry::Status(snapshot.clone()))
    }
}

pub struct TelemetryPublisher {
    shutdown: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl TelemetryPublisher {
    /// Start the publisher thread with a queue of `capacity` messages.
    pub fn spawn<F>(capacity: usize, mut handler: F) -> (Self, ChannelSink)
    where
        F: FnMut(&Telemetry) + Send + 'static,
    {
        let (tx, rx) = xch::bounded::<Telemetry>(capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let dropped = Arc::new(AtomicU64::new(0));

        let join_handle = std::thread::spawn(move || {
            loop {
                match rx.recv_timeout(POLL) {
                    Ok(msg) => handler(&msg),
                    Err(xch::RecvTimeoutError::Timeout) => {}
                    Err(xch::RecvTimeoutError::Disconnected) => break,
                }
                if shutdown_clone.load(Ordering::Relaxed) {
                    for msg in rx.try_iter() {
                        handler(&msg);
                    }
                    break;
                }
            }
            tracing::trace!("telemetry thread exiting cleanly");
        });

        let sink = ChannelSink {
            tx,
            dropped: dropped.clone(),
        };
        (
            Self {
                shutdown,
                dropped,
                join_handle: Some(join_handle),
            },
            sink,
        )
    }

    /// Messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("telemetry thread joined"),
                Err(e) => tracing::warn!(?e, "telemetry thread panicked during shutdown"),
            }
        }
    }
}
