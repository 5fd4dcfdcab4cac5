//! Coordination of capture requests against a single remote camera.
//!
//! The camera is driven over a fire-and-forget publish/subscribe link: a
//! command is published, and some time later an image shows up on another
//! topic with nothing tying it to the command that produced it. A
//! [`Coordinator`] emulates request/response on top of that link by owning
//! the one outstanding capture cycle and the last-image slot, and by
//! accepting an image as the answer to a cycle only if it was received
//! strictly after the cycle was requested.
//!
//! Images reach the coordinator through the [`ImageSink`] seam, from the
//! asynchronous channel (see [`mqtt`]) or from a synchronous upload fallback.
//! Both producers write into the same arbitrated slot.
use bytes::Bytes;
use tokio::time::{Duration, Instant};

mod coordinator;
pub mod mqtt;

pub use coordinator::{Config, Coordinator, CycleState, Snapshot};

/// Literal command token published to request a capture.
pub const CAPTURE_COMMAND: &str = "CAPTURE";

/// Transport is the outbound half of the device link.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Fire a capture command at the device.
    /// Ok means the command was handed to the transport, not that it was delivered.
    async fn publish_command(&self) -> anyhow::Result<()>;
}

/// ImageSink is the inbound half of the device link: it's invoked once for
/// each image payload which arrives, on whichever channel it arrived.
pub trait ImageSink: Send + Sync {
    fn deposit(&self, image: CapturedImage) -> Result<Disposition, IngestError>;
}

/// Source is the channel over which an image arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    /// Asynchronous publish/subscribe channel.
    Channel,
    /// Synchronous HTTP upload from the device.
    Upload,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Channel => "channel",
            Source::Upload => "upload",
        }
    }
}

/// CapturedImage is an immutable image payload stamped with its arrival time.
#[derive(Clone)]
pub struct CapturedImage {
    pub bytes: Bytes,
    pub received_at: Instant,
    pub source: Source,
}

impl CapturedImage {
    pub fn new(bytes: Bytes, received_at: Instant, source: Source) -> Self {
        Self {
            bytes,
            received_at,
            source,
        }
    }

    /// Stamp an image which has arrived just now.
    pub fn arrived(bytes: impl Into<Bytes>, source: Source) -> Self {
        Self::new(bytes.into(), Instant::now(), source)
    }
}

// Payloads may be tens of megabytes, and are never useful in logs.
impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("len", &self.bytes.len())
            .field("received_at", &self.received_at)
            .field("source", &self.source)
            .finish()
    }
}

/// Disposition of an accepted image deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The image resolved the pending capture cycle.
    Resolved { cycle: u64 },
    /// A cycle is pending, but the image was received before it was requested.
    /// The image is discarded.
    Stale,
    /// No cycle is pending. The image was kept in the last-image slot.
    Stored,
}

/// Error is a terminal failure of a capture cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("capture device did not respond within {0:?}")]
    Timeout(Duration),
    #[error("capture request was superseded by a newer request")]
    Superseded,
    #[error("failed to publish capture command: {0:#}")]
    Transport(anyhow::Error),
}

/// IngestError is a rejection of an inbound image payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload of {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}
