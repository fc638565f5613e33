//! Chunked host↔device transfer
//!
//! A [`TransferPipeline`] moves one field between a [`HostChannel`] and a
//! [`DeviceChannel`] chunk by chunk on its own worker thread:
//!
//! ```text
//!  producer ──write──▶ [source ring] ──read──▶ pipeline ──write──▶ [dest ring] ──read──▶ consumer
//!                                               │
//!                                    async copy + stream fence
//! ```
//!
//! Each ring is guarded by a [`ChunkCursor`]. A chunk is read from the source
//! and written to the destination in one step, so both rings advance in
//! lockstep and in order. Workers stop at the next chunk boundary once their
//! [`StopSignal`] is raised.

mod channel;
mod cursor;
mod pipeline;

pub use channel::{DeviceChannel, HostChannel};
pub use cursor::{ChunkCursor, ChunkTicket};
pub use pipeline::{TransferPipeline, TransferWorker};

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Copy direction of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Host to device
    Upload,
    /// Device to host
    Download,
}

impl Direction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Upload => "H2D",
            Self::Download => "D2H",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared cancellation flag for transfer workers and blocked acquisitions
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters returned by a finished transfer worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub chunks: u64,
    pub elements: u64,
    pub synchronizations: u64,
}
