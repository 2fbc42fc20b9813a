//! Reply Channel Integration Tests
//!
//! Tests for the deferred reply channel between transfer workers and the
//! request transport.
//!
//! # Test Scenarios
//! - Completions sent from several worker threads
//! - Blocking and async receive
//! - Shutdown when every sender is gone
//!
//! Run with: `cargo test -p common --test reply_channel_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_request_id, with_timeout};
use common::{Completion, create_reply_channel};
use std::collections::HashSet;
use std::thread;

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_completions_from_many_threads() {
    let (sender, receiver) = create_reply_channel();

    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let sender = sender.clone();
            thread::spawn(move || {
                for i in 0..25u64 {
                    sender
                        .send(Completion {
                            request: create_mock_request_id(worker * 100 + i),
                            return_value: 8,
                        })
                        .expect("Failed to send completion");
                }
            })
        })
        .collect();
    drop(sender);

    let mut seen = HashSet::new();
    for _ in 0..100 {
        let completion = with_timeout(DEFAULT_TEST_TIMEOUT, receiver.recv())
            .await
            .expect("Timed out waiting for completion")
            .expect("Channel closed early");
        assert!(seen.insert(completion.request));
    }

    for worker in workers {
        worker.join().expect("Worker thread panicked");
    }
    assert_eq!(seen.len(), 100);
}

#[test]
fn test_recv_blocking() {
    let (sender, receiver) = create_reply_channel();

    let handle = thread::spawn(move || {
        sender
            .send(Completion {
                request: create_mock_request_id(3),
                return_value: -7022,
            })
            .expect("Failed to send completion");
    });

    let completion = receiver.recv_blocking().expect("Failed to receive");
    assert_eq!(completion.request.0, 3);
    assert_eq!(completion.return_value, -7022);
    handle.join().expect("Sender thread panicked");
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_recv_fails_once_senders_dropped() {
    let (sender, receiver) = create_reply_channel();
    drop(sender);

    let result = with_timeout(DEFAULT_TEST_TIMEOUT, receiver.recv())
        .await
        .expect("recv should not hang after close");
    assert!(result.is_err());
}

#[test]
fn test_pending_completions_survive_sender_drop() {
    let (sender, receiver) = create_reply_channel();
    sender
        .send(Completion {
            request: create_mock_request_id(1),
            return_value: 0,
        })
        .expect("Failed to send completion");
    drop(sender);

    assert_eq!(receiver.drain().len(), 1);
    assert!(receiver.try_recv().is_none());
}
