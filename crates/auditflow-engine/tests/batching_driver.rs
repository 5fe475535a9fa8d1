// auditflow-engine/tests/batching_driver.rs
// ============================================================================
// Module: Concurrent Row Driver Tests
// Description: Tests for FIFO emission, eviction, and panic transport.
// ============================================================================
//! ## Overview
//! Validates that results reach the output port in submission order under
//! out-of-order worker completion, that evicted submissions are discarded,
//! and that shutdown leaves the adapter maps empty.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use auditflow_core::RowId;
use auditflow_core::StateId;
use auditflow_core::TokenId;
use auditflow_core::TransformResult;
use auditflow_engine::ConcurrentRowDriver;
use auditflow_engine::OutputPort;
use auditflow_engine::SharedBatchAdapter;
use auditflow_engine::TokenInfo;
use auditflow_engine::WorkerOutcome;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Collecting output port preserving emission order.
#[derive(Default)]
struct CollectingPort {
    /// Emitted token ids in order.
    emitted: Mutex<Vec<String>>,
}

impl OutputPort for CollectingPort {
    fn emit(&self, token: TokenInfo, _outcome: WorkerOutcome, _state_id: Option<StateId>) {
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push(token.token_id.to_string());
        }
    }
}

/// Builds a token with the given short id.
fn token(id: &str) -> TokenInfo {
    TokenInfo {
        token_id: TokenId::new(id),
        row_id: RowId::new("row"),
        row_data: json!({}),
        branch_name: None,
    }
}

/// Waits until the port collected `count` emissions or a deadline passes.
fn await_emissions(port: &CollectingPort, count: usize) {
    for _ in 0..200 {
        if port.emitted.lock().unwrap().len() >= count {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ============================================================================
// SECTION: Ordering
// ============================================================================

/// Tests results emit in submission order despite varying worker latency.
#[test]
fn test_fifo_emission_under_concurrency() {
    let port = Arc::new(CollectingPort::default());
    let driver = ConcurrentRowDriver::new("fifo", 4, Arc::clone(&port) as Arc<dyn OutputPort>);

    for index in 0..6u64 {
        let delay = Duration::from_millis((6 - index) * 10);
        driver
            .accept_row(token(&format!("token-{index}")), None, move || {
                std::thread::sleep(delay);
                TransformResult::success(json!({"index": index}), None)
            })
            .unwrap();
    }

    await_emissions(&port, 6);
    driver.shutdown();

    let emitted = port.emitted.lock().unwrap().clone();
    let expected: Vec<String> = (0..6).map(|index| format!("token-{index}")).collect();
    assert_eq!(emitted, expected);
}

// ============================================================================
// SECTION: Eviction
// ============================================================================

/// Tests an evicted submission is never emitted and does not stall the head.
#[test]
fn test_evicted_submission_discarded() {
    let port = Arc::new(CollectingPort::default());
    let driver = ConcurrentRowDriver::new("evict", 2, Arc::clone(&port) as Arc<dyn OutputPort>);

    let stuck_state = StateId::new("stuck-state");
    driver
        .accept_row(token("stuck"), Some(stuck_state.clone()), || {
            std::thread::sleep(Duration::from_millis(500));
            TransformResult::success(json!({"late": true}), None)
        })
        .unwrap();
    driver
        .accept_row(token("fast"), None, || {
            TransformResult::success(json!({"fast": true}), None)
        })
        .unwrap();

    // Evict the head while its worker still runs.
    std::thread::sleep(Duration::from_millis(50));
    assert!(driver.evict_submission(&TokenId::new("stuck"), &stuck_state));

    await_emissions(&port, 1);
    // Give the late worker time to finish and (correctly) be discarded.
    std::thread::sleep(Duration::from_millis(600));
    driver.shutdown();

    let emitted = port.emitted.lock().unwrap().clone();
    assert_eq!(emitted, vec!["fast".to_string()]);
}

// ============================================================================
// SECTION: Shutdown Hygiene
// ============================================================================

/// Tests the adapter maps are empty after results are delivered and the
/// driver is closed.
#[test]
fn test_maps_empty_after_close() {
    let adapter: SharedBatchAdapter<(TokenInfo, WorkerOutcome)> = SharedBatchAdapter::new();

    /// Port forwarding into the adapter keyed by (token, state).
    struct AdapterPort {
        /// Adapter receiving deliveries.
        adapter: SharedBatchAdapter<(TokenInfo, WorkerOutcome)>,
    }
    impl OutputPort for AdapterPort {
        fn emit(&self, token: TokenInfo, outcome: WorkerOutcome, state_id: Option<StateId>) {
            if let Some(state_id) = state_id {
                let token_id = token.token_id.clone();
                self.adapter.emit(&token_id, &state_id, (token, outcome));
            }
        }
    }

    let driver = ConcurrentRowDriver::new(
        "hygiene",
        2,
        Arc::new(AdapterPort {
            adapter: adapter.clone(),
        }),
    );

    let state = StateId::new("state-1");
    let waiter = adapter.register(&TokenId::new("token-1"), &state);
    driver
        .accept_row(token("token-1"), Some(state), || {
            TransformResult::success(json!({"ok": true}), None)
        })
        .unwrap();

    let (_, outcome) = waiter.wait(Duration::from_secs(5)).unwrap();
    assert!(matches!(
        outcome,
        WorkerOutcome::Result(TransformResult::Success { .. })
    ));

    driver.shutdown();
    adapter.clear();

    assert_eq!(adapter.waiter_count(), 0);
    assert_eq!(adapter.result_count(), 0);
    assert_eq!(driver.pending_count(), 0);
}
