//! Thread-safe sample buffer.
//!
//! Producers append whole batches; the flusher takes everything at once.
//! Each call holds the lock only for a vector append or swap, so a drain
//! never observes part of a batch.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::sample::Sample;

#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Mutex<Vec<Sample>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a batch, preserving its order.
    pub fn add(&self, batch: Vec<Sample>) {
        if batch.is_empty() {
            return;
        }
        let mut samples = self.lock();
        if samples.is_empty() {
            *samples = batch;
        } else {
            samples.extend(batch);
        }
    }

    /// Take every buffered sample, leaving the buffer empty.
    pub fn drain_all(&self) -> Vec<Sample> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::thread;

    fn sample(metric: &str, n: u32) -> Sample {
        Sample::new(metric, Utc.timestamp_opt(1_669_909_784, n).unwrap(), f64::from(n))
    }

    #[test]
    fn drain_returns_everything_once() {
        let buffer = SampleBuffer::new();
        buffer.add(vec![sample("a", 1), sample("a", 2)]);
        buffer.add(vec![sample("b", 3)]);
        assert_eq!(buffer.len(), 3);

        let drained = buffer.drain_all();
        let values: Vec<f64> = drained.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn empty_batch_is_noop() {
        let buffer = SampleBuffer::new();
        buffer.add(Vec::new());
        assert!(buffer.is_empty());
    }

    #[test]
    fn concurrent_producers_keep_batch_order() {
        let buffer = SampleBuffer::new();
        thread::scope(|scope| {
            for producer in ["p0", "p1", "p2", "p3"] {
                let buffer = &buffer;
                scope.spawn(move || {
                    for chunk in 0..25u32 {
                        let batch = (0..4).map(|i| sample(producer, chunk * 4 + i)).collect();
                        buffer.add(batch);
                    }
                });
            }
        });

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 400);
        for producer in ["p0", "p1", "p2", "p3"] {
            let seen: Vec<f64> = drained
                .iter()
                .filter(|s| s.metric == producer)
                .map(|s| s.value)
                .collect();
            let expected: Vec<f64> = (0..100).map(f64::from).collect();
            assert_eq!(seen, expected, "order broken for {producer}");
        }
    }
}
