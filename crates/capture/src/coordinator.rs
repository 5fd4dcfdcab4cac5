use super::{CapturedImage, Disposition, Error, ImageSink, IngestError, Transport};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

/// Config of a Coordinator.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum wait for a qualifying image after a capture is requested.
    /// There's no way to extend it mid-flight, so it must cover worst-case
    /// device processing, flush, and network latency.
    pub timeout: Duration,
    /// Largest accepted image payload, in bytes.
    pub max_image_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            max_image_bytes: 50 << 20,
        }
    }
}

/// CycleState is the state of the most recent capture cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleState {
    /// No cycle has run yet, or the last cycle was abandoned by its caller.
    Idle,
    Pending,
    Fulfilled,
    TimedOut,
    /// Displaced by a newer cycle. Only the displaced caller observes this,
    /// since the newer cycle is already Pending.
    Superseded,
    /// The capture command could not be published.
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Pending => "pending",
            CycleState::Fulfilled => "fulfilled",
            CycleState::TimedOut => "timedOut",
            CycleState::Superseded => "superseded",
            CycleState::Failed => "failed",
        }
    }
}

/// Snapshot is a point-in-time view of a Coordinator.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Number of the most recent capture cycle, starting at one.
    pub cycle: u64,
    pub state: CycleState,
    /// Whether the last-image slot holds an image. While a cycle is pending,
    /// only an image received after its request is held.
    pub has_image: bool,
    /// Time remaining before the pending cycle's deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

type Resolution = Result<CapturedImage, Error>;

struct Waiter {
    cycle: u64,
    requested_at: Instant,
    tx: oneshot::Sender<Resolution>,
}

struct Inner {
    cycle: u64,
    state: CycleState,
    // Present iff the current cycle is Pending.
    waiter: Option<Waiter>,
    slot: Option<CapturedImage>,
}

/// Coordinator owns the single capture cycle and the last-image slot.
///
/// At most one cycle is pending at a time. Requesting an image while a cycle
/// is pending supersedes it: the displaced caller resolves with
/// [`Error::Superseded`] and a fresh cycle begins.
///
/// All cycle and slot state is mutated under one lock, which is never held
/// across an await point. Waiting callers are suspended on a oneshot channel
/// that is resolved by whichever producer deposits the first qualifying image.
pub struct Coordinator {
    config: Config,
    transport: Arc<dyn Transport>,
    inner: Mutex<Inner>,
}

impl Coordinator {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            inner: Mutex::new(Inner {
                cycle: 0,
                state: CycleState::Idle,
                waiter: None,
                slot: None,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Request a capture from the device, and wait for the resulting image.
    ///
    /// Resolves with the first image received strictly after the request
    /// began, or fails once the configured timeout elapses. Dropping the
    /// returned future abandons the cycle.
    #[tracing::instrument(level = "debug", skip(self), fields(cycle))]
    pub async fn request_image(&self) -> Result<CapturedImage, Error> {
        let (cycle, requested_at, mut rx) = self.begin();
        tracing::Span::current().record("cycle", cycle);

        let _deregister = Deregister {
            coordinator: self,
            cycle,
        };

        // Publishing counts against the deadline, and an image may resolve
        // the cycle before the command is even acknowledged by the transport.
        let deadline = tokio::time::sleep_until(requested_at + self.config.timeout);
        let publish = self.transport.publish_command();
        tokio::pin!(deadline, publish);
        let mut published = false;

        let resolution = loop {
            tokio::select! {
                result = &mut publish, if !published => match result {
                    Ok(()) => {
                        tracing::debug!(cycle, "published capture command");
                        published = true;
                    }
                    Err(err) => {
                        break self.conclude(cycle, CycleState::Failed, &mut rx, || {
                            Error::Transport(err)
                        })
                    }
                },
                resolution = &mut rx => break match resolution {
                    Ok(resolution) => resolution,
                    // Senders are dropped unsent only by this cycle's own conclusion.
                    Err(_) => Err(Error::Superseded),
                },
                () = &mut deadline => {
                    break self.conclude(cycle, CycleState::TimedOut, &mut rx, || {
                        Error::Timeout(self.config.timeout)
                    })
                }
            }
        };

        let elapsed = requested_at.elapsed();
        let outcome = match &resolution {
            Ok(image) => {
                tracing::info!(
                    cycle,
                    len = image.bytes.len(),
                    source = image.source.as_str(),
                    ?elapsed,
                    "capture cycle fulfilled"
                );
                CycleState::Fulfilled
            }
            Err(Error::Superseded) => {
                tracing::info!(cycle, ?elapsed, "capture cycle superseded");
                CycleState::Superseded
            }
            Err(err @ Error::Timeout(_)) => {
                tracing::warn!(cycle, %err, "capture cycle timed out");
                CycleState::TimedOut
            }
            Err(err @ Error::Transport(_)) => {
                tracing::error!(cycle, %err, "capture cycle failed");
                CycleState::Failed
            }
        };
        metrics::counter!("capture_cycles_total", "outcome" => outcome.as_str()).increment(1);
        metrics::histogram!("capture_cycle_seconds").record(elapsed.as_secs_f64());

        resolution
    }

    /// Snapshot the current cycle and slot.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().unwrap();

        let remaining_ms = inner.waiter.as_ref().map(|waiter| {
            (waiter.requested_at + self.config.timeout)
                .saturating_duration_since(Instant::now())
                .as_millis() as u64
        });

        Snapshot {
            cycle: inner.cycle,
            state: inner.state,
            has_image: inner.slot.is_some(),
            remaining_ms,
        }
    }

    /// Most recent image held in the last-image slot, if any.
    pub fn last_image(&self) -> Option<CapturedImage> {
        self.inner.lock().unwrap().slot.clone()
    }

    // Start a new cycle: displace any pending cycle, clear the slot,
    // and register a waiter stamped with the current time.
    fn begin(&self) -> (u64, Instant, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();

        if let Some(displaced) = inner.waiter.take() {
            tracing::debug!(cycle = displaced.cycle, "displacing pending capture cycle");
            let _ = displaced.tx.send(Err(Error::Superseded));
        }

        inner.cycle += 1;
        inner.state = CycleState::Pending;
        inner.slot = None;

        let requested_at = Instant::now();
        inner.waiter = Some(Waiter {
            cycle: inner.cycle,
            requested_at,
            tx,
        });

        (inner.cycle, requested_at, rx)
    }

    // Conclude `cycle` with a failure, unless it was already resolved by a
    // deposit or a newer cycle. Waiters are consumed and sent to under the
    // same lock, so in that case the resolution is already buffered in `rx`.
    fn conclude(
        &self,
        cycle: u64,
        state: CycleState,
        rx: &mut oneshot::Receiver<Resolution>,
        err: impl FnOnce() -> Error,
    ) -> Resolution {
        let mut inner = self.inner.lock().unwrap();

        if inner.waiter.as_ref().is_some_and(|w| w.cycle == cycle) {
            inner.waiter = None;
            inner.state = state;
            return Err(err());
        }
        std::mem::drop(inner);

        rx.try_recv().unwrap_or_else(|_| Err(err()))
    }

    fn abandon(&self, cycle: u64) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        if inner.waiter.as_ref().is_some_and(|w| w.cycle == cycle) {
            tracing::debug!(cycle, "capture cycle abandoned by its caller");
            inner.waiter = None;
            inner.state = CycleState::Idle;
        }
    }
}

impl ImageSink for Coordinator {
    fn deposit(&self, image: CapturedImage) -> Result<Disposition, IngestError> {
        let size = image.bytes.len();
        let source = image.source.as_str();
        let limit = self.config.max_image_bytes;

        let checked = if size == 0 {
            Err(IngestError::Empty)
        } else if size > limit {
            Err(IngestError::TooLarge { size, limit })
        } else {
            Ok(())
        };
        if let Err(err) = checked {
            tracing::warn!(size, source, %err, "rejected inbound image");
            metrics::counter!("capture_arrivals_total", "source" => source, "disposition" => "rejected")
                .increment(1);
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();

        let disposition = match inner.waiter.take() {
            Some(waiter) if image.received_at > waiter.requested_at => {
                inner.state = CycleState::Fulfilled;
                // Send fails only if the caller is gone, and then its guard finds no waiter.
                let _ = waiter.tx.send(Ok(image.clone()));
                Disposition::Resolved {
                    cycle: waiter.cycle,
                }
            }
            Some(waiter) => {
                inner.waiter = Some(waiter);
                Disposition::Stale
            }
            None => Disposition::Stored,
        };

        // A stale image is discarded, so that the slot of a pending cycle
        // only ever holds an image which could answer it.
        if disposition != Disposition::Stale
            && inner
                .slot
                .as_ref()
                .map_or(true, |held| held.received_at <= image.received_at)
        {
            inner.slot = Some(image);
        }
        std::mem::drop(inner);

        tracing::debug!(size, source, ?disposition, "accepted inbound image");
        metrics::counter!("capture_arrivals_total", "source" => source, "disposition" => disposition.as_str())
            .increment(1);

        Ok(disposition)
    }
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Resolved { .. } => "resolved",
            Disposition::Stale => "stale",
            Disposition::Stored => "stored",
        }
    }
}

// Deregisters the waiter of a cycle if its caller stops waiting before
// the cycle concludes.
struct Deregister<'c> {
    coordinator: &'c Coordinator,
    cycle: u64,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        self.coordinator.abandon(self.cycle);
    }
}
