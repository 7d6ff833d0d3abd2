// crates/testbed-core/src/events.rs
// ============================================================================
// Module: Run Events
// Description: Structured events for fulfillment, discovery, and test runs.
// Purpose: Emit machine-readable run logs without hard dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Run events are emitted through a [`RunEventSink`]. Deployments pick a
//! sink: [`NoopEventSink`] discards, [`JsonlEventSink`] appends one JSON line
//! per event, and [`MemoryEventSink`] captures events in-process.
//! Every suppressed cleanup failure is recorded here as
//! [`RunEvent::CleanupFailed`] in addition to the diagnostic log.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::requirements::FulfillmentLevel;
use crate::requirements::TestStatus;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Structured run event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A fulfiller is about to run.
    FulfillmentStarted {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Fulfillment level.
        level: FulfillmentLevel,
        /// Fulfiller name.
        fulfiller: String,
        /// Fulfiller priority.
        priority: i32,
    },
    /// A fulfiller completed and its states were bound.
    FulfillmentCompleted {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Fulfillment level.
        level: FulfillmentLevel,
        /// Fulfiller name.
        fulfiller: String,
        /// Number of states bound.
        states: usize,
    },
    /// A fulfiller failed; remaining fulfillers at this level were skipped.
    FulfillmentFailed {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Fulfillment level.
        level: FulfillmentLevel,
        /// Fulfiller name.
        fulfiller: String,
        /// Error message.
        error: String,
    },
    /// A fulfiller released its resources.
    CleanupCompleted {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Fulfillment level.
        level: FulfillmentLevel,
        /// Fulfiller name.
        fulfiller: String,
        /// Status handed to cleanup.
        status: TestStatus,
    },
    /// A fulfiller cleanup failed; the failure was suppressed.
    CleanupFailed {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Fulfillment level.
        level: FulfillmentLevel,
        /// Fulfiller name.
        fulfiller: String,
        /// Status handed to cleanup.
        status: TestStatus,
        /// Error message.
        error: String,
    },
    /// A generator script ran during discovery.
    GeneratorInvoked {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Script path.
        script: String,
        /// Exit code when the process exited normally.
        exit_code: Option<i32>,
        /// Whether the script succeeded.
        success: bool,
    },
    /// Discovery of a subtree failed.
    DiscoveryFailed {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Subtree root.
        path: String,
        /// Error message.
        error: String,
    },
    /// A test reached a terminal status.
    TestFinished {
        /// Event timestamp (milliseconds since epoch).
        timestamp_ms: u128,
        /// Fully qualified test name.
        test: String,
        /// Terminal status.
        status: TestStatus,
        /// Wall-clock duration in milliseconds.
        duration_ms: u128,
    },
}

impl RunEvent {
    /// Returns the stable event label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::FulfillmentStarted {
                ..
            } => "fulfillment_started",
            Self::FulfillmentCompleted {
                ..
            } => "fulfillment_completed",
            Self::FulfillmentFailed {
                ..
            } => "fulfillment_failed",
            Self::CleanupCompleted {
                ..
            } => "cleanup_completed",
            Self::CleanupFailed {
                ..
            } => "cleanup_failed",
            Self::GeneratorInvoked {
                ..
            } => "generator_invoked",
            Self::DiscoveryFailed {
                ..
            } => "discovery_failed",
            Self::TestFinished {
                ..
            } => "test_finished",
        }
    }
}

/// Returns the current wall-clock time in milliseconds since epoch.
#[must_use]
pub fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Sink for run events.
pub trait RunEventSink: Send + Sync {
    /// Records a run event.
    fn record(&self, event: &RunEvent);
}

/// No-op event sink.
pub struct NoopEventSink;

impl RunEventSink for NoopEventSink {
    fn record(&self, _event: &RunEvent) {}
}

/// Append-only JSON lines event sink.
pub struct JsonlEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl JsonlEventSink {
    /// Opens the event log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl RunEventSink for JsonlEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// In-memory event sink.
#[derive(Default)]
pub struct MemoryEventSink {
    /// Captured events in record order.
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the captured events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the labels of the captured events.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(RunEvent::label)
            .collect()
    }
}

impl RunEventSink for MemoryEventSink {
    fn record(&self, event: &RunEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}
