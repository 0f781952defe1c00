//! Event streams — a subscription registry per stream.
//!
//! Each subscriber owns an unbounded crossbeam receiver. Emission never
//! blocks, so players emit while holding their state lock and delivery
//! order matches transition order. Dropped receivers are pruned on the
//! next emission.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

pub struct EventStream<T> {
    inner: Mutex<StreamInner<T>>,
    coalesce: bool,
}

struct StreamInner<T> {
    subscribers: Vec<Sender<T>>,
    last: Option<T>,
}

impl<T: Clone + PartialEq + Send> EventStream<T> {
    /// Every emission is delivered.
    pub fn new() -> Self {
        Self::build(None, false)
    }

    /// Consecutive duplicate values are dropped. `initial` is the value
    /// subscribers are assumed to already know.
    pub fn coalescing(initial: T) -> Self {
        Self::build(Some(initial), true)
    }

    fn build(last: Option<T>, coalesce: bool) -> Self {
        Self {
            inner: Mutex::new(StreamInner {
                subscribers: Vec::new(),
                last,
            }),
            coalesce,
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    pub fn emit(&self, value: T) {
        let mut inner = self.inner.lock();
        if self.coalesce && inner.last.as_ref() == Some(&value) {
            return;
        }
        inner.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        inner.last = Some(value);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T: Clone + PartialEq + Send> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order_to_every_subscriber() {
        let stream = EventStream::new();
        let a = stream.subscribe();
        let b = stream.subscribe();
        stream.emit(1);
        stream.emit(2);
        assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn coalesces_only_consecutive_duplicates() {
        let stream = EventStream::coalescing(false);
        let rx = stream.subscribe();
        stream.emit(false);
        stream.emit(true);
        stream.emit(true);
        stream.emit(false);
        stream.emit(true);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![true, false, true]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let stream = EventStream::new();
        let rx = stream.subscribe();
        drop(stream.subscribe());
        stream.emit(());
        assert_eq!(stream.subscriber_count(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }
}
