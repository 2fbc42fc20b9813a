//! Per-device transfer worker
//!
//! Transfers for one host device run on a dedicated thread using blocking
//! USB calls, so the guest-facing side never waits on the bus. The thread
//! pulls jobs from a [`TransferQueue`]; cancellation goes through the same
//! queue and is linearized with the worker by its lock.

use crate::error::HostError;
use crate::usb::message::{TransferMessage, TransferOutcome, TransferRequest};
use common::MemoryError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Work item handed to the worker thread
///
/// The message itself stays in the queue while the job runs, so a
/// concurrent cancel can still answer it.
#[derive(Debug)]
pub struct Job {
    pub token: u64,
    pub request: TransferRequest,
    /// Host-to-device payload (empty for IN transfers)
    pub payload: Result<Vec<u8>, MemoryError>,
}

struct InFlight {
    token: u64,
    message: TransferMessage,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TransferMessage>,
    in_flight: Option<InFlight>,
    next_token: u64,
    shutdown: bool,
}

/// Transfers waiting for, or running on, a device's worker thread
#[derive(Default)]
pub struct TransferQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message; hands it back once the queue is shut down
    pub fn push(&self, message: TransferMessage) -> Result<(), TransferMessage> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(message);
        }
        state.pending.push_back(message);
        self.ready.notify_one();
        Ok(())
    }

    /// Block until a job is ready; `None` once shut down
    pub fn next_job(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(message) = state.pending.pop_front() {
                let token = state.next_token;
                state.next_token = state.next_token.wrapping_add(1);

                let request = *message.request();
                let payload = if message.is_in() {
                    Ok(Vec::new())
                } else {
                    message.out_payload()
                };
                state.in_flight = Some(InFlight { token, message });
                return Some(Job {
                    token,
                    request,
                    payload,
                });
            }
            self.ready.wait(&mut state);
        }
    }

    /// Answer the message of a finished job with `outcome`
    ///
    /// The completion is sent before the queue lock is released, so a
    /// concurrent [`cancel_endpoint`](Self::cancel_endpoint) either answers
    /// the job first or returns after its completion is queued. Returns
    /// `false` if the job was cancelled while it ran.
    pub fn complete(&self, token: u64, outcome: TransferOutcome) -> bool {
        let mut state = self.state.lock();
        match state.in_flight.take() {
            Some(in_flight) if in_flight.token == token => {
                in_flight.message.complete(outcome);
                true
            }
            other => {
                state.in_flight = other;
                false
            }
        }
    }

    /// Answer every queued or running transfer on `endpoint` as cancelled
    pub fn cancel_endpoint(&self, endpoint: u8) -> usize {
        let cancelled = {
            let mut state = self.state.lock();
            let (matching, kept): (VecDeque<_>, VecDeque<_>) = state
                .pending
                .drain(..)
                .partition(|message| message.endpoint() == endpoint);
            state.pending = kept;

            let mut cancelled: Vec<TransferMessage> = matching.into();
            if state
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.message.endpoint() == endpoint)
                && let Some(in_flight) = state.in_flight.take()
            {
                cancelled.push(in_flight.message);
            }
            cancelled
        };

        let count = cancelled.len();
        for message in cancelled {
            message.cancel();
        }
        count
    }

    /// Stop the worker and cancel everything left
    pub fn shutdown(&self) {
        let leftovers = {
            let mut state = self.state.lock();
            state.shutdown = true;
            self.ready.notify_all();

            let mut leftovers: Vec<TransferMessage> = state.pending.drain(..).collect();
            if let Some(in_flight) = state.in_flight.take() {
                leftovers.push(in_flight.message);
            }
            leftovers
        };

        if !leftovers.is_empty() {
            debug!("Cancelling {} transfers on shutdown", leftovers.len());
        }
        for message in leftovers {
            message.cancel();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// Spawn the worker thread for one device
///
/// `execute` runs a single transfer to completion. The thread exits once the
/// queue is shut down.
pub fn spawn_transfer_worker<F>(
    name: String,
    queue: Arc<TransferQueue>,
    execute: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnMut(&TransferRequest, Vec<u8>) -> TransferOutcome + Send + 'static,
{
    std::thread::Builder::new()
        .name(name)
        .spawn(move || run_worker(&queue, execute))
}

fn run_worker<F>(queue: &TransferQueue, mut execute: F)
where
    F: FnMut(&TransferRequest, Vec<u8>) -> TransferOutcome,
{
    info!("Transfer worker started");

    while let Some(job) = queue.next_job() {
        let outcome = match job.payload {
            Ok(payload) => {
                // Keep the thread alive if the backend panics mid-transfer
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    execute(&job.request, payload)
                }));
                result.unwrap_or_else(|e| {
                    error!("Panic in transfer executor: {:?}", e);
                    TransferOutcome::Failed(HostError::Other("executor panicked".into()))
                })
            }
            Err(e) => {
                warn!("Cannot read transfer payload from guest: {}", e);
                TransferOutcome::Failed(HostError::InvalidParam)
            }
        };

        if !queue.complete(job.token, outcome) {
            debug!("Discarding result of cancelled transfer {}", job.token);
        }
    }

    info!("Transfer worker stopped");
}
