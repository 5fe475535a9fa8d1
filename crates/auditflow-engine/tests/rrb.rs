// auditflow-engine/tests/rrb.rs
// ============================================================================
// Module: Row Reorder Buffer Tests
// Description: Tests for ordering, backpressure, eviction, and shutdown.
// ============================================================================
//! ## Overview
//! Validates submission-order release under out-of-order completion, the
//! backpressure boundary, eviction of timed-out entries, and terminal
//! shutdown semantics.

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
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use auditflow_engine::RowReorderBuffer;
use auditflow_engine::RrbError;
use proptest::prelude::*;

// ============================================================================
// SECTION: Ordering
// ============================================================================

/// Tests results release in submission order despite reversed completion.
#[test]
fn test_release_preserves_submission_order() {
    let buffer: RowReorderBuffer<u32> = RowReorderBuffer::new(8, "order");
    let tickets: Vec<_> =
        (0..4).map(|index| buffer.submit(format!("row-{index}")).unwrap()).collect();

    // Complete in reverse order.
    for (index, ticket) in tickets.iter().enumerate().rev() {
        buffer.complete(*ticket, u32::try_from(index).unwrap()).unwrap();
    }

    for expected in 0..4u32 {
        let entry = buffer.wait_for_next_release(Duration::from_secs(1)).unwrap();
        assert_eq!(entry.result, expected);
        assert_eq!(entry.row_id, format!("row-{expected}"));
    }
    assert_eq!(buffer.pending_count(), 0);
}

/// Tests a completed out-of-order entry waits for the FIFO head.
#[test]
fn test_head_of_line_blocking() {
    let buffer: RowReorderBuffer<u32> = RowReorderBuffer::new(4, "head");
    let first = buffer.submit("a").unwrap();
    let second = buffer.submit("b").unwrap();

    buffer.complete(second, 2).unwrap();
    let timed_out = buffer.wait_for_next_release(Duration::from_millis(50));
    assert_eq!(timed_out.unwrap_err(), RrbError::Timeout);

    buffer.complete(first, 1).unwrap();
    assert_eq!(buffer.wait_for_next_release(Duration::from_secs(1)).unwrap().result, 1);
    assert_eq!(buffer.wait_for_next_release(Duration::from_secs(1)).unwrap().result, 2);
}

// ============================================================================
// SECTION: Backpressure
// ============================================================================

/// Tests submit blocks at max_pending and unblocks on release.
#[test]
fn test_submit_blocks_until_release() {
    let buffer: Arc<RowReorderBuffer<u32>> = Arc::new(RowReorderBuffer::new(2, "bp"));
    let first = buffer.submit("a").unwrap();
    let _second = buffer.submit("b").unwrap();

    let blocked = Arc::new(AtomicBool::new(true));
    let blocked_flag = Arc::clone(&blocked);
    let submit_buffer = Arc::clone(&buffer);
    let submitter = thread::spawn(move || {
        let ticket = submit_buffer.submit("c").unwrap();
        blocked_flag.store(false, Ordering::SeqCst);
        ticket
    });

    thread::sleep(Duration::from_millis(100));
    assert!(blocked.load(Ordering::SeqCst), "third submit should block at capacity");

    // Releasing one entry must unblock exactly one submit.
    buffer.complete(first, 1).unwrap();
    let released = buffer.wait_for_next_release(Duration::from_secs(1)).unwrap();
    assert_eq!(released.result, 1);

    let ticket = submitter.join().unwrap();
    assert!(!blocked.load(Ordering::SeqCst));
    assert_eq!(ticket.seq(), 2);
}

// ============================================================================
// SECTION: Eviction
// ============================================================================

/// Tests a late completion for an evicted ticket is discarded.
#[test]
fn test_evicted_ticket_discards_late_completion() {
    let buffer: RowReorderBuffer<u32> = RowReorderBuffer::new(4, "evict");
    let stuck = buffer.submit("stuck").unwrap();
    let next = buffer.submit("next").unwrap();
    buffer.complete(next, 2).unwrap();

    assert!(buffer.evict(stuck));

    // The worker finishing late sees not-found and discards its result.
    let late = buffer.complete(stuck, 1);
    assert_eq!(late.unwrap_err(), RrbError::TicketNotFound(stuck.seq()));

    // Eviction exposed the completed successor as the new head.
    assert_eq!(buffer.wait_for_next_release(Duration::from_secs(1)).unwrap().result, 2);

    let metrics = buffer.metrics();
    assert_eq!(metrics.evicted, 1);
    assert_eq!(metrics.discarded, 1);
    assert_eq!(metrics.released, 1);
}

/// Tests evicting an unknown ticket reports false.
#[test]
fn test_evict_unknown_ticket() {
    let buffer: RowReorderBuffer<u32> = RowReorderBuffer::new(4, "evict-unknown");
    let ticket = buffer.submit("only").unwrap();
    buffer.complete(ticket, 1).unwrap();
    let _ = buffer.wait_for_next_release(Duration::from_secs(1)).unwrap();

    assert!(!buffer.evict(ticket));
}

// ============================================================================
// SECTION: Shutdown
// ============================================================================

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    /// Any completion order releases in submission order.
    #[test]
    fn prop_release_order_is_submission_order(order in proptest::sample::subsequence((0..8usize).collect::<Vec<_>>(), 0..=8usize)) {
        let buffer: RowReorderBuffer<usize> = RowReorderBuffer::new(8, "prop");
        let tickets: Vec<_> =
            (0..8).map(|index| buffer.submit(format!("row-{index}")).unwrap()).collect();
        // Complete in the sampled permutation-ish order, then the rest.
        let mut completed = vec![false; 8];
        for &index in &order {
            buffer.complete(tickets[index], index).unwrap();
            completed[index] = true;
        }
        for (index, done) in completed.iter().enumerate() {
            if !done {
                buffer.complete(tickets[index], index).unwrap();
            }
        }
        for expected in 0..8usize {
            let entry = buffer.wait_for_next_release(Duration::from_secs(1)).unwrap();
            prop_assert_eq!(entry.result, expected);
        }
    }
}

/// Tests shutdown wakes waiters with a terminal error and empties the buffer.
#[test]
fn test_shutdown_wakes_waiters() {
    let buffer: Arc<RowReorderBuffer<u32>> = Arc::new(RowReorderBuffer::new(1, "shutdown"));
    let _held = buffer.submit("held").unwrap();

    let wait_buffer = Arc::clone(&buffer);
    let waiter = thread::spawn(move || wait_buffer.wait_for_next_release(Duration::from_secs(10)));
    let submit_buffer = Arc::clone(&buffer);
    let submitter = thread::spawn(move || submit_buffer.submit("blocked"));

    thread::sleep(Duration::from_millis(100));
    buffer.shutdown();

    assert_eq!(waiter.join().unwrap().unwrap_err(), RrbError::Shutdown);
    assert_eq!(submitter.join().unwrap().unwrap_err(), RrbError::Shutdown);
    assert_eq!(buffer.pending_count(), 0);
}
