// Frame queues
// Bounded single-producer-multiple-consumer request queue and its response
// twin; workers claim from the tail, the transport drains the head.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tessera_core::Frame;

/// Transport-level peer handle.
pub type PeerId = u64;

/// Where an outbound frame goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Gossip to every connected peer.
    Broadcast(Frame),
    /// Answer one requester.
    Reply { peer: PeerId, frame: Frame },
}

#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub peer: PeerId,
    pub frame: Frame,
}

struct QueueInner {
    frames: VecDeque<QueuedFrame>,
    bytes: usize,
}

/// Bounded FIFO of verified frames. Overflow drops the newcomer; the queue
/// never evicts.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity_frames: usize,
    capacity_bytes: usize,
}

impl FrameQueue {
    pub fn new(capacity_frames: usize, capacity_bytes: usize) -> Self {
        FrameQueue {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::new(),
                bytes: 0,
            }),
            available: Condvar::new(),
            capacity_frames,
            capacity_bytes,
        }
    }

    /// Enqueue; false when either bound is hit.
    pub fn push(&self, peer: PeerId, frame: Frame) -> bool {
        let size = frame.header.size as usize;
        let mut inner = self.inner.lock().unwrap();
        if inner.frames.len() >= self.capacity_frames || inner.bytes + size > self.capacity_bytes {
            return false;
        }
        inner.bytes += size;
        inner.frames.push_back(QueuedFrame { peer, frame });
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Claim the oldest frame, waiting up to `timeout`.
    pub fn pop(&self, timeout: Duration) -> Option<QueuedFrame> {
        let mut inner = self.inner.lock().unwrap();
        if inner.frames.is_empty() {
            let (guard, _) = self.available.wait_timeout(inner, timeout).unwrap();
            inner = guard;
        }
        let queued = inner.frames.pop_front()?;
        inner.bytes -= queued.frame.header.size as usize;
        Some(queued)
    }

    pub fn try_pop(&self) -> Option<QueuedFrame> {
        let mut inner = self.inner.lock().unwrap();
        let queued = inner.frames.pop_front()?;
        inner.bytes -= queued.frame.header.size as usize;
        Some(queued)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::MessageType;

    fn frame(byte: u8) -> Frame {
        Frame::new(MessageType::BroadcastTransaction, 1, vec![byte; 8])
    }

    #[test]
    fn fifo_order() {
        let queue = FrameQueue::new(8, 1 << 16);
        assert!(queue.push(1, frame(1)));
        assert!(queue.push(2, frame(2)));

        assert_eq!(queue.try_pop().unwrap().peer, 1);
        assert_eq!(queue.try_pop().unwrap().peer, 2);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn bounds_drop_newcomers() {
        let queue = FrameQueue::new(2, 1 << 16);
        assert!(queue.push(1, frame(1)));
        assert!(queue.push(1, frame(2)));
        assert!(!queue.push(1, frame(3)));

        queue.try_pop();
        assert!(queue.push(1, frame(3)));
    }

    #[test]
    fn byte_budget_enforced() {
        let one = frame(1);
        let size = one.header.size as usize;
        let queue = FrameQueue::new(100, size);
        assert!(queue.push(1, one));
        assert!(!queue.push(1, frame(2)));
    }
}
