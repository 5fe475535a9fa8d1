// auditflow-telemetry/src/bus.rs
// ============================================================================
// Module: Telemetry Bus
// Description: Synchronous event bus with re-entrance protection.
// Purpose: Dispatch events to handlers and buffered exporters safely.
// Dependencies: auditflow-core, crate::exporters, serde
// ============================================================================

//! ## Overview
//! The bus dispatches synchronously on the emitting thread. A handler that
//! emits while dispatching (directly or transitively) is depth-capped by a
//! thread-local counter: events beyond the cap are counted and dropped
//! instead of recursing. Exporters buffer up to `batch_size` and flush on
//! threshold and at `flush()`; exporter failures are counted and swallowed,
//! and repeated total failure disables the bus until restart.
//!
//! Handlers are invoked outside the bus lock and exporter flushes take each
//! exporter's own lock with `try_lock`, so no dispatch path can deadlock on
//! re-entrant emission.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::Cell;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use auditflow_core::RunId;
use auditflow_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::exporters::TelemetryExporter;

// ============================================================================
// SECTION: Event
// ============================================================================

/// One telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Event name (`row_completed`, `retry_scheduled`, ...).
    pub name: String,
    /// Owning run, when known.
    pub run_id: Option<RunId>,
    /// Structured payload.
    pub payload: Value,
    /// Emission timestamp.
    pub emitted_at: Timestamp,
}

impl TelemetryEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, run_id: Option<RunId>, payload: Value) -> Self {
        Self {
            name: name.into(),
            run_id,
            payload,
            emitted_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Telemetry bus configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryBusConfig {
    /// Events buffered per exporter before a threshold flush.
    pub batch_size: usize,
    /// Maximum re-entrant dispatch depth before events are dropped.
    pub max_reentrancy_depth: usize,
    /// Consecutive all-exporter failures before the bus disables itself.
    pub max_total_failures: u32,
}

impl Default for TelemetryBusConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_reentrancy_depth: 4,
            max_total_failures: 5,
        }
    }
}

// ============================================================================
// SECTION: Handlers And Slots
// ============================================================================

/// Synchronous event handler.
pub type EventHandler = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// One registered exporter with its pending buffer.
struct ExporterSlot {
    /// The exporter behind its own lock so flushes never hold the bus lock.
    exporter: Arc<Mutex<Box<dyn TelemetryExporter>>>,
    /// Buffered events awaiting a threshold or explicit flush.
    buffer: Vec<TelemetryEvent>,
}

/// Mutable bus state behind the bus lock.
struct BusState {
    /// Registered handlers.
    handlers: Vec<EventHandler>,
    /// Registered exporters.
    slots: Vec<ExporterSlot>,
    /// Consecutive flushes in which every exporter failed.
    consecutive_total_failures: u32,
}

thread_local! {
    /// Re-entrant dispatch depth for the current thread.
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

// ============================================================================
// SECTION: Telemetry Bus
// ============================================================================

/// Synchronous telemetry bus with buffered exporters.
pub struct TelemetryBus {
    /// Bus configuration.
    config: TelemetryBusConfig,
    /// Mutable state.
    state: Mutex<BusState>,
    /// Whether repeated total failure disabled the bus.
    disabled: AtomicBool,
    /// Events dropped by the re-entrance cap or while disabled.
    dropped: AtomicU64,
}

impl TelemetryBus {
    /// Creates a bus with the provided configuration.
    #[must_use]
    pub const fn new(config: TelemetryBusConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BusState {
                handlers: Vec::new(),
                slots: Vec::new(),
                consecutive_total_failures: 0,
            }),
            disabled: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a synchronous handler.
    pub fn subscribe(&self, handler: EventHandler) {
        if let Ok(mut state) = self.state.lock() {
            state.handlers.push(handler);
        }
    }

    /// Registers an exporter.
    pub fn register_exporter(&self, exporter: Box<dyn TelemetryExporter>) {
        if let Ok(mut state) = self.state.lock() {
            state.slots.push(ExporterSlot {
                exporter: Arc::new(Mutex::new(exporter)),
                buffer: Vec::new(),
            });
        }
    }

    /// Returns true when repeated total failure disabled the bus.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Returns the number of events dropped by the cap or while disabled.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    /// Emits an event.
    ///
    /// Dispatch runs synchronously on the calling thread. Re-entrant emits
    /// beyond the configured depth are counted and dropped. Handler and
    /// exporter failures never propagate to the emitter.
    pub fn emit(&self, event: TelemetryEvent) {
        if self.is_disabled() {
            self.dropped.fetch_add(1, Ordering::AcqRel);
            return;
        }
        let depth = DISPATCH_DEPTH.with(Cell::get);
        if depth >= self.config.max_reentrancy_depth {
            self.dropped.fetch_add(1, Ordering::AcqRel);
            return;
        }

        // Snapshot the handlers so calls happen outside the bus lock; a
        // re-entrant emit only re-enters through the depth counter.
        let handlers: Vec<EventHandler> = match self.state.lock() {
            Ok(state) => state.handlers.clone(),
            Err(_) => return,
        };
        DISPATCH_DEPTH.with(|cell| cell.set(depth + 1));
        for handler in handlers {
            handler(&event);
        }
        DISPATCH_DEPTH.with(|cell| cell.set(depth));

        // Buffer for export; flush slots that crossed the threshold.
        let due = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let batch_size = self.config.batch_size;
            let mut due = Vec::new();
            for slot in &mut state.slots {
                slot.buffer.push(event.clone());
                if slot.buffer.len() >= batch_size {
                    due.push((Arc::clone(&slot.exporter), std::mem::take(&mut slot.buffer)));
                }
            }
            due
        };
        if !due.is_empty() {
            self.deliver(due);
        }
    }

    /// Delivers drained batches and updates failure bookkeeping.
    fn deliver(&self, due: Vec<(Arc<Mutex<Box<dyn TelemetryExporter>>>, Vec<TelemetryEvent>)>) {
        let mut attempted = 0u32;
        let mut succeeded = 0u32;
        for (exporter, batch) in due {
            attempted += 1;
            // try_lock: a re-entrant emit from inside an exporter must not
            // deadlock on its own lock; the batch is dropped in that case.
            if let Ok(mut guard) = exporter.try_lock() {
                if guard.export(&batch).is_ok() {
                    succeeded += 1;
                }
            }
        }
        if attempted == 0 {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            if succeeded == 0 {
                state.consecutive_total_failures += 1;
                if state.consecutive_total_failures >= self.config.max_total_failures {
                    self.disabled.store(true, Ordering::Release);
                }
            } else {
                state.consecutive_total_failures = 0;
            }
        }
    }

    /// Flushes every exporter buffer and the exporters themselves.
    pub fn flush(&self) {
        let due = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state
                .slots
                .iter_mut()
                .map(|slot| (Arc::clone(&slot.exporter), std::mem::take(&mut slot.buffer)))
                .collect::<Vec<_>>()
        };
        let mut attempted = 0u32;
        let mut succeeded = 0u32;
        for (exporter, batch) in due {
            attempted += 1;
            if let Ok(mut guard) = exporter.try_lock() {
                let exported = batch.is_empty() || guard.export(&batch).is_ok();
                let flushed = guard.flush().is_ok();
                if exported && flushed {
                    succeeded += 1;
                }
            }
        }
        if attempted == 0 {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            if succeeded == 0 {
                state.consecutive_total_failures += 1;
                if state.consecutive_total_failures >= self.config.max_total_failures {
                    self.disabled.store(true, Ordering::Release);
                }
            } else {
                state.consecutive_total_failures = 0;
            }
        }
    }

    /// Flushes and closes every exporter.
    pub fn close(&self) {
        self.flush();
        let exporters = {
            let Ok(state) = self.state.lock() else {
                return;
            };
            state.slots.iter().map(|slot| Arc::clone(&slot.exporter)).collect::<Vec<_>>()
        };
        for exporter in exporters {
            if let Ok(mut guard) = exporter.try_lock() {
                let _ = guard.close();
            }
        }
    }
}

impl std::fmt::Debug for TelemetryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBus").field("config", &self.config).finish_non_exhaustive()
    }
}
