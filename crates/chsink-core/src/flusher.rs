//! Periodic flusher.
//!
//! A single named thread calls the flush callback every interval. The wait
//! for the next tick starts after the previous callback returns, so flushes
//! never overlap and a slow flush delays, rather than stacks, the next one.
//!
//! Stopping runs the callback one last time, then joins the thread. Once
//! [`PeriodicFlusher::stop`] returns, no further callback starts.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

const THREAD_NAME: &str = "chsink-flusher";

pub struct PeriodicFlusher {
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl PeriodicFlusher {
    /// Spawn the flusher thread. A zero interval is rejected.
    pub fn start<F>(interval: Duration, mut flush: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "flush interval must be positive",
            ));
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis() as u64, "flusher started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => run_guarded(&mut flush),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            run_guarded(&mut flush);
                            break;
                        }
                    }
                }
                debug!("flusher stopped");
            })?;
        Ok(Self {
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run the final flush and wait for the thread to exit. Idempotent.
    pub fn stop(&self) {
        let sender = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            // A send error means the thread is already gone; join reports why.
            let _ = sender.send(());
        }
        // The handle lock is held across the join so a concurrent caller
        // returns only after the final flush is done.
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = handle.take() {
            if handle.join().is_err() {
                error!("flusher thread panicked");
            }
        }
    }
}

impl Drop for PeriodicFlusher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_guarded<F: FnMut()>(flush: &mut F) {
    if panic::catch_unwind(AssertUnwindSafe(|| flush())).is_err() {
        warn!("flush callback panicked; next tick proceeds");
    }
}
