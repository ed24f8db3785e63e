//! Bounded row channel — the conduit implementing one hop between two
//! step copies.
//!
//! Built on a `crossbeam-channel` bounded queue. `put` blocks while the
//! queue is at capacity, `get` blocks while it is empty; both poll with a
//! short timeout so they observe the shared [`StopSignal`] and the done
//! flags within a bounded interval instead of blocking forever.
//!
//! Close semantics:
//! - Normal end-of-stream (`finished`) flushes: the consumer drains every
//!   queued row before `get` reports the end.
//! - Cancellation (stop signal) discards: `get` reports the end immediately,
//!   queued rows are dropped, and a blocked `put` unblocks without a
//!   consumer.

use crate::row::{Row, Schema};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default hop capacity in rows.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Poll interval for blocked channel operations. Bounds how long a blocked
/// `put`/`get` can take to notice a stop request or a done flag.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Cooperative cancellation flag, shared by a pipeline and all of its
/// channels and step loops. A nested pipeline links to its parent's signal
/// so a parent stop is observed by every descendant.
#[derive(Debug, Default)]
pub struct StopSignal {
    flag: AtomicBool,
    parent: Option<Arc<StopSignal>>,
}

impl StopSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A signal that also observes `parent`. Requesting a stop on the child
    /// does not stop the parent.
    pub fn child_of(parent: &Arc<StopSignal>) -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Request a stop. Idempotent, safe from any thread.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested here or on any ancestor.
    pub fn is_requested(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match &self.parent {
            Some(p) => p.is_requested(),
            None => false,
        }
    }
}

/// What happened to a row handed to [`RowChannel::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// The row was queued for the consumer.
    Accepted,
    /// The channel is closed (consumer gone, producer finished, or the
    /// pipeline is stopping); the row was dropped.
    Closed,
}

/// A bounded FIFO of `(Schema, Row)` pairs between exactly one producer copy
/// and one consumer copy. Clones share the same queue and flags.
#[derive(Clone)]
pub struct RowChannel {
    tx: Sender<(Arc<Schema>, Row)>,
    rx: Receiver<(Arc<Schema>, Row)>,
    /// Producer reached natural end-of-stream.
    done: Arc<AtomicBool>,
    /// Consumer terminated and will not drain any further rows.
    consumer_gone: Arc<AtomicBool>,
    stop: Arc<StopSignal>,
}

impl RowChannel {
    pub fn new(capacity: usize, stop: Arc<StopSignal>) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            done: Arc::new(AtomicBool::new(false)),
            consumer_gone: Arc::new(AtomicBool::new(false)),
            stop,
        }
    }

    /// Queue a row, blocking while the channel is at capacity. Returns
    /// [`PutResult::Closed`] once the consumer is gone or a stop was
    /// requested.
    pub fn put(&self, schema: Arc<Schema>, row: Row) -> PutResult {
        let mut pair = (schema, row);
        loop {
            if self.stop.is_requested()
                || self.done.load(Ordering::SeqCst)
                || self.consumer_gone.load(Ordering::SeqCst)
            {
                return PutResult::Closed;
            }
            match self.tx.send_timeout(pair, POLL_INTERVAL) {
                Ok(()) => return PutResult::Accepted,
                Err(SendTimeoutError::Timeout(p)) => pair = p,
                Err(SendTimeoutError::Disconnected(_)) => return PutResult::Closed,
            }
        }
    }

    /// Take the next row, blocking while the channel is empty. Returns
    /// `None` at end-of-stream: after a flush-close once the queue is
    /// drained, or immediately when a stop was requested.
    pub fn get(&self) -> Option<(Arc<Schema>, Row)> {
        loop {
            if self.stop.is_requested() {
                return None;
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(pair) => return Some(pair),
                Err(RecvTimeoutError::Timeout) => {
                    if self.done.load(Ordering::SeqCst) && self.rx.is_empty() {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Non-blocking variant of [`get`](Self::get); `None` means "nothing
    /// available right now", which is distinct from end-of-stream — check
    /// [`is_exhausted`](Self::is_exhausted) for that.
    pub fn try_get(&self) -> Option<(Arc<Schema>, Row)> {
        self.rx.try_recv().ok()
    }

    /// Producer-side close: end of stream. Idempotent; queued rows are still
    /// delivered to the consumer.
    pub fn finished(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Consumer-side close: the consumer will never read again. Unblocks a
    /// producer stuck on a full queue; subsequently queued rows are dropped.
    pub fn consumer_finished(&self) {
        self.consumer_gone.store(true, Ordering::SeqCst);
    }

    /// Whether the producer finished and every queued row has been taken.
    pub fn is_exhausted(&self) -> bool {
        self.done.load(Ordering::SeqCst) && self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl std::fmt::Debug for RowChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowChannel")
            .field("queued", &self.rx.len())
            .field("done", &self.done.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{Column, ValueType};
    use std::thread;
    use std::time::Instant;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Column::new("n", ValueType::Integer)]))
    }

    fn row(n: i64) -> Row {
        Row::builder().integer(n).build()
    }

    #[test]
    fn test_fifo_order() {
        let ch = RowChannel::new(16, StopSignal::new());
        let s = schema();
        for n in 0..10 {
            assert_eq!(ch.put(Arc::clone(&s), row(n)), PutResult::Accepted);
        }
        ch.finished();
        for n in 0..10 {
            let (_, r) = ch.get().expect("row present");
            assert_eq!(r.get(0).unwrap().as_integer(), Some(n));
        }
        assert!(ch.get().is_none());
    }

    #[test]
    fn test_flush_on_finished() {
        // Rows queued before finished() must all reach the consumer.
        let ch = RowChannel::new(8, StopSignal::new());
        let s = schema();
        for n in 0..5 {
            ch.put(Arc::clone(&s), row(n));
        }
        ch.finished();
        ch.finished(); // idempotent
        let mut seen = 0;
        while ch.get().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[test]
    fn test_backpressure_blocks_then_resumes() {
        let ch = RowChannel::new(2, StopSignal::new());
        let s = schema();
        ch.put(Arc::clone(&s), row(0));
        ch.put(Arc::clone(&s), row(1));

        let producer = {
            let ch = ch.clone();
            let s = Arc::clone(&s);
            thread::spawn(move || {
                let started = Instant::now();
                let result = ch.put(s, row(2));
                (result, started.elapsed())
            })
        };

        // Give the producer time to block on the full queue.
        thread::sleep(Duration::from_millis(50));
        let (_, first) = ch.get().unwrap();
        assert_eq!(first.get(0).unwrap().as_integer(), Some(0));

        let (result, blocked_for) = producer.join().unwrap();
        assert_eq!(result, PutResult::Accepted);
        assert!(blocked_for >= Duration::from_millis(30));

        // No loss, no duplication.
        assert_eq!(ch.get().unwrap().1.get(0).unwrap().as_integer(), Some(1));
        assert_eq!(ch.get().unwrap().1.get(0).unwrap().as_integer(), Some(2));
    }

    #[test]
    fn test_stop_discards_queued_rows() {
        let stop = StopSignal::new();
        let ch = RowChannel::new(8, Arc::clone(&stop));
        let s = schema();
        ch.put(Arc::clone(&s), row(0));
        ch.put(Arc::clone(&s), row(1));
        stop.request();
        assert!(ch.get().is_none());
        assert_eq!(ch.put(s, row(2)), PutResult::Closed);
    }

    #[test]
    fn test_stop_unblocks_blocked_producer() {
        let stop = StopSignal::new();
        let ch = RowChannel::new(1, Arc::clone(&stop));
        let s = schema();
        ch.put(Arc::clone(&s), row(0));

        let producer = {
            let ch = ch.clone();
            thread::spawn(move || ch.put(s, row(1)))
        };
        thread::sleep(Duration::from_millis(20));
        stop.request();
        assert_eq!(producer.join().unwrap(), PutResult::Closed);
    }

    #[test]
    fn test_consumer_finished_unblocks_producer() {
        let ch = RowChannel::new(1, StopSignal::new());
        let s = schema();
        ch.put(Arc::clone(&s), row(0));
        let producer = {
            let ch = ch.clone();
            thread::spawn(move || ch.put(s, row(1)))
        };
        thread::sleep(Duration::from_millis(20));
        ch.consumer_finished();
        assert_eq!(producer.join().unwrap(), PutResult::Closed);
    }

    #[test]
    fn test_child_stop_signal_observes_parent() {
        let parent = StopSignal::new();
        let child = StopSignal::child_of(&parent);
        assert!(!child.is_requested());
        parent.request();
        assert!(child.is_requested());
        assert!(!StopSignal::new().is_requested());
    }

    #[test]
    fn test_child_stop_does_not_propagate_up() {
        let parent = StopSignal::new();
        let child = StopSignal::child_of(&parent);
        child.request();
        assert!(child.is_requested());
        assert!(!parent.is_requested());
    }
}
