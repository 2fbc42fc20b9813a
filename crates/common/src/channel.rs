//! Deferred reply channel
//!
//! Requests that cannot be answered synchronously (submitted transfers, the
//! device-change hook) are answered later through this channel. Each
//! [`Completion`] names the request it answers; the transport that owns the
//! guest request queue drains the receiving end.

use async_channel::{Receiver, Sender, TryRecvError, unbounded};
use protocol::RequestId;

/// A reply for a request that returned `IpcResult::Deferred`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Request being answered
    pub request: RequestId,
    /// Value delivered to the guest (byte count, or a negative status)
    pub return_value: i32,
}

/// Sending half, cloned into every pending transfer
#[derive(Clone)]
pub struct ReplySender {
    tx: Sender<Completion>,
}

impl ReplySender {
    /// Queue a completion without blocking
    ///
    /// The channel is unbounded, so this only fails once the receiver is gone.
    pub fn send(&self, completion: Completion) -> crate::Result<()> {
        self.tx
            .try_send(completion)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Receiving half, owned by the request transport
pub struct ReplyReceiver {
    rx: Receiver<Completion>,
}

impl ReplyReceiver {
    /// Wait for the next completion
    pub async fn recv(&self) -> crate::Result<Completion> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait for the next completion from a non-async thread
    pub fn recv_blocking(&self) -> crate::Result<Completion> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take a completion if one is ready
    pub fn try_recv(&self) -> Option<Completion> {
        match self.rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Take every completion that is ready
    pub fn drain(&self) -> Vec<Completion> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Create the deferred reply channel
///
/// Returns (ReplySender for the resource, ReplyReceiver for the transport)
pub fn create_reply_channel() -> (ReplySender, ReplyReceiver) {
    let (tx, rx) = unbounded();
    (ReplySender { tx }, ReplyReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_channel() {
        let (sender, receiver) = create_reply_channel();

        // Completions arrive from worker threads
        let handle = std::thread::spawn(move || {
            sender
                .send(Completion {
                    request: RequestId(7),
                    return_value: 8,
                })
                .unwrap();
        });

        let completion = receiver.recv().await.unwrap();
        assert_eq!(completion.request, RequestId(7));
        assert_eq!(completion.return_value, 8);
        handle.join().unwrap();
    }

    #[test]
    fn test_drain_preserves_order() {
        let (sender, receiver) = create_reply_channel();
        for id in 0..3 {
            sender
                .send(Completion {
                    request: RequestId(id),
                    return_value: 0,
                })
                .unwrap();
        }

        let ids: Vec<u64> = receiver.drain().iter().map(|c| c.request.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (sender, receiver) = create_reply_channel();
        drop(receiver);
        let result = sender.send(Completion {
            request: RequestId(1),
            return_value: 0,
        });
        assert!(result.is_err());
    }
}
