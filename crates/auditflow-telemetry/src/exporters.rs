// auditflow-telemetry/src/exporters.rs
// ============================================================================
// Module: Telemetry Exporters
// Description: Exporter contract and in-process exporter implementations.
// Purpose: Deliver buffered telemetry batches without affecting emitters.
// Dependencies: crate::bus, thiserror
// ============================================================================

//! ## Overview
//! Exporters receive batches of telemetry events. Errors are returned, never
//! panicked, and the bus swallows them: one exporter's failure must not
//! affect the others or the emitting pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;

use crate::bus::TelemetryEvent;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Exporter delivery failure.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The export target rejected or dropped the batch.
    #[error("telemetry export failed: {0}")]
    Delivery(String),
}

// ============================================================================
// SECTION: Exporter Contract
// ============================================================================

/// Destination for telemetry event batches.
///
/// Implementations return errors instead of panicking; the bus counts and
/// swallows them.
pub trait TelemetryExporter: Send {
    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;

    /// Delivers a batch of events.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError`] when delivery fails; the batch is dropped.
    fn export(&mut self, events: &[TelemetryEvent]) -> Result<(), ExporterError>;

    /// Flushes any exporter-internal buffering.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError`] when the flush fails.
    fn flush(&mut self) -> Result<(), ExporterError> {
        Ok(())
    }

    /// Closes the exporter; called once at shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError`] when close-time delivery fails.
    fn close(&mut self) -> Result<(), ExporterError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Memory Exporter
// ============================================================================

/// In-memory exporter collecting events for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MemoryExporter {
    /// Collected events, shared with the handle returned by `events_handle`.
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl MemoryExporter {
    /// Creates an empty memory exporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a shared handle to the collected events.
    #[must_use]
    pub fn events_handle(&self) -> Arc<Mutex<Vec<TelemetryEvent>>> {
        Arc::clone(&self.events)
    }
}

impl TelemetryExporter for MemoryExporter {
    fn name(&self) -> &str {
        "memory"
    }

    fn export(&mut self, events: &[TelemetryEvent]) -> Result<(), ExporterError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| ExporterError::Delivery("memory exporter mutex poisoned".to_string()))?;
        guard.extend_from_slice(events);
        Ok(())
    }
}
