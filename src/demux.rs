//! Routes inbound frames to whoever is waiting on their packet id.
//!
//! The stream carries no correlation beyond the packet id, so every decoded
//! frame is parked in a FIFO keyed by that id until a waiter collects it.
//! An id only has an entry while it has undelivered frames.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{trace, warn};
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::error::{RconError, Result};
use crate::packet::Packet;

/// Terminal condition of the inbound side.
#[derive(Debug, Clone)]
enum Fault {
    Malformed(String),
    Closed,
}

impl From<&Fault> for RconError {
    fn from(fault: &Fault) -> Self {
        match fault {
            Fault::Malformed(reason) => RconError::MalformedFrame(reason.clone()),
            Fault::Closed => RconError::ConnectionClosed,
        }
    }
}

#[derive(Debug, Default)]
struct Inbox {
    queues: HashMap<i32, VecDeque<Packet>>,
    fault: Option<Fault>,
}

#[derive(Debug, Default)]
pub struct Demultiplexer {
    inbox: Mutex<Inbox>,
    arrived: Notify,
    waiting: AtomicUsize,
}

/// Counts a waiter for as long as its future is alive, including when the
/// future is dropped mid-wait.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        WaitGuard(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one complete frame and queue it under its packet id.
    ///
    /// A frame that fails to decode poisons the demultiplexer: the error is
    /// returned here and every waiter without a queued frame receives it too.
    pub fn on_bytes_received(&self, data: &[u8]) -> Result<()> {
        let packet = match Packet::unpack(data) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("dropping inbound frame: {}", err);
                if let RconError::MalformedFrame(reason) = &err {
                    self.fault(Fault::Malformed(reason.clone()));
                }
                return Err(err);
            }
        };

        trace!(
            "queueing packet id {} ({} body bytes)",
            packet.id(),
            packet.body().len()
        );
        self.lock()
            .queues
            .entry(packet.id())
            .or_default()
            .push_back(packet);
        self.arrived.notify_waiters();

        Ok(())
    }

    /// Mark the inbound side as finished. Frames already queued can still be
    /// collected; anything else fails with [`RconError::ConnectionClosed`].
    pub fn close(&self) {
        self.fault(Fault::Closed);
    }

    /// Poison the inbound side with a framing error found before decoding.
    pub(crate) fn reject(&self, reason: String) {
        self.fault(Fault::Malformed(reason));
    }

    /// Wait until a frame with `packet_id` is available and return the
    /// oldest one. On timeout nothing is consumed.
    pub async fn wait_for(&self, packet_id: i32, limit: Duration) -> Result<Packet> {
        Ok(timeout(limit, self.wait(packet_id)).await??)
    }

    /// Unbounded form of [`wait_for`](Self::wait_for), for callers that put
    /// one deadline around several waits.
    pub(crate) async fn wait(&self, packet_id: i32) -> Result<Packet> {
        let _guard = WaitGuard::new(&self.waiting);
        self.next(packet_id).await
    }

    /// Number of `wait_for` calls currently in flight.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Number of undelivered frames queued for `packet_id`.
    pub fn pending(&self, packet_id: i32) -> usize {
        self.lock().queues.get(&packet_id).map_or(0, VecDeque::len)
    }

    async fn next(&self, packet_id: i32) -> Result<Packet> {
        loop {
            // register interest before checking, so a frame queued between
            // the check and the await still wakes us
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            {
                let mut inbox = self.lock();
                if let Some(queue) = inbox.queues.get_mut(&packet_id) {
                    if let Some(packet) = queue.pop_front() {
                        if queue.is_empty() {
                            inbox.queues.remove(&packet_id);
                        }
                        return Ok(packet);
                    }
                }
                if let Some(fault) = &inbox.fault {
                    return Err(fault.into());
                }
            }

            arrived.await;
        }
    }

    fn fault(&self, fault: Fault) {
        let mut inbox = self.lock();
        // the first fault wins
        if inbox.fault.is_none() {
            inbox.fault = Some(fault);
        }
        drop(inbox);
        self.arrived.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        // a panic while holding the lock can't leave the maps half-updated
        self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::packet::PacketType;

    const LIMIT: Duration = Duration::from_secs(5);

    fn frame(id: i32, body: &str) -> Vec<u8> {
        Packet::new(id, PacketType::Response, body)
            .pack()
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn delivers_in_arrival_order() {
        let demux = Demultiplexer::new();
        for body in ["A", "B", "C"] {
            demux.on_bytes_received(&frame(5, body)).unwrap();
        }

        for body in ["A", "B", "C"] {
            assert_eq!(demux.wait_for(5, LIMIT).await.unwrap().body(), body);
        }
        assert_eq!(demux.pending(5), 0);
    }

    #[tokio::test]
    async fn drained_ids_are_removed() {
        let demux = Demultiplexer::new();
        demux.on_bytes_received(&frame(3, "x")).unwrap();
        assert_eq!(demux.pending(3), 1);

        demux.wait_for(3, LIMIT).await.unwrap();
        assert!(demux.lock().queues.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn other_ids_do_not_satisfy_a_wait() {
        let demux = Demultiplexer::new();
        demux.on_bytes_received(&frame(5, "five")).unwrap();

        let result = demux.wait_for(7, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RconError::ResponseTimeout(_))));
        assert_eq!(demux.pending(5), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_consumes_nothing() {
        let demux = Demultiplexer::new();
        assert!(demux.wait_for(2, Duration::from_millis(50)).await.is_err());

        demux.on_bytes_received(&frame(2, "late")).unwrap();
        assert_eq!(demux.wait_for(2, LIMIT).await.unwrap().body(), "late");
        assert_eq!(demux.waiting(), 0);
    }

    #[tokio::test]
    async fn wakes_a_waiter_when_a_frame_arrives() {
        let demux = Arc::new(Demultiplexer::new());
        let waiter = {
            let demux = demux.clone();
            tokio::spawn(async move { demux.wait_for(9, LIMIT).await })
        };

        while demux.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        demux.on_bytes_received(&frame(9, "hi")).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap().body(), "hi");
    }

    #[tokio::test]
    async fn waiters_on_different_ids_are_independent() {
        let demux = Arc::new(Demultiplexer::new());
        let slow = {
            let demux = demux.clone();
            tokio::spawn(async move { demux.wait_for(1, LIMIT).await })
        };
        let fast = {
            let demux = demux.clone();
            tokio::spawn(async move { demux.wait_for(2, LIMIT).await })
        };

        demux.on_bytes_received(&frame(2, "two")).unwrap();
        assert_eq!(fast.await.unwrap().unwrap().body(), "two");
        assert!(!slow.is_finished());

        demux.on_bytes_received(&frame(1, "one")).unwrap();
        assert_eq!(slow.await.unwrap().unwrap().body(), "one");
    }

    #[tokio::test]
    async fn malformed_frame_fails_waiters() {
        let demux = Demultiplexer::new();
        assert!(demux.on_bytes_received(&[0; 3]).is_err());

        assert!(matches!(
            demux.wait_for(1, LIMIT).await,
            Err(RconError::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn close_still_delivers_queued_frames() {
        let demux = Demultiplexer::new();
        demux.on_bytes_received(&frame(4, "last")).unwrap();
        demux.close();

        assert_eq!(demux.wait_for(4, LIMIT).await.unwrap().body(), "last");
        assert!(matches!(
            demux.wait_for(4, LIMIT).await,
            Err(RconError::ConnectionClosed)
        ));
    }
}
