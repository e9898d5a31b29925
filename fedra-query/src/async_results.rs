//! Executor-backed async adapter
//!
//! [`AsyncResults`] moves a synchronous stream onto a dedicated worker
//! thread that pulls solutions into a bounded channel. Consumers that
//! must not block mid-batch on a slow synchronous source (the bind join
//! accumulating a VALUES batch, for instance) wrap the source with this
//! adapter when `is_async()` is false.
//!
//! The channel bound provides backpressure: the worker blocks once the
//! buffer is full rather than materializing the source. Errors from the
//! wrapped stream are forwarded in-band and surfaced to the consumer on
//! its next pull.

use crate::error::{QueryError, Result};
use crate::options::JoinOptions;
use crate::results::{BoxedResults, Results};
use crossbeam_channel::{Receiver, SendTimeoutError};
use fedra_core::{Solution, VarSet};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often a blocked worker re-checks the stop flag
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(50);

enum Message {
    Row(Solution),
    Failed(QueryError),
}

/// Signals worker-thread exit to a bounded `close()`.
struct ExitLatch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl ExitLatch {
    fn new() -> Self {
        ExitLatch {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn set(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.cond.wait_for(&mut done, deadline - now);
        }
        *done
    }
}

/// Adapter that performs a stream's I/O off the calling thread.
pub struct AsyncResults {
    vars: VarSet,
    receiver: Option<Receiver<Message>>,
    lookahead: Option<Solution>,
    /// Sticky failure message from the wrapped stream
    failed: Option<String>,
    exhausted: bool,
    distinct: bool,
    stop: Arc<AtomicBool>,
    latch: Arc<ExitLatch>,
    worker: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl AsyncResults {
    /// Move `inner` onto a worker thread with a buffer bounded by
    /// `options.output_queue_capacity`.
    pub fn new(inner: BoxedResults, options: &JoinOptions) -> Result<Self> {
        let vars: VarSet = inner.var_names().to_vec().into();
        let distinct = inner.is_distinct();
        let (sender, receiver) = crossbeam_channel::bounded(options.output_queue_capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let latch = Arc::new(ExitLatch::new());

        let worker = {
            let stop = Arc::clone(&stop);
            let latch = Arc::clone(&latch);
            std::thread::Builder::new()
                .name("fedra-async-fetch".to_string())
                .spawn(move || {
                    let mut inner = inner;
                    drain_into(&mut inner, &sender, &stop);
                    inner.close();
                    latch.set();
                })
                .map_err(|e| QueryError::Internal(format!("failed to spawn fetch worker: {e}")))?
        };

        Ok(AsyncResults {
            vars,
            receiver: Some(receiver),
            lookahead: None,
            failed: None,
            exhausted: false,
            distinct,
            stop,
            latch,
            worker: Some(worker),
            close_timeout: options.close_timeout,
        })
    }
}

/// Pull every solution from `inner` into `sender`, staying responsive
/// to the stop flag even when the channel is full.
fn drain_into(
    inner: &mut BoxedResults,
    sender: &crossbeam_channel::Sender<Message>,
    stop: &AtomicBool,
) {
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let message = match inner.has_next() {
            Ok(true) => match inner.next() {
                Ok(solution) => Message::Row(solution),
                Err(e) => Message::Failed(e),
            },
            Ok(false) => return,
            Err(e) => Message::Failed(e),
        };
        let terminal = matches!(message, Message::Failed(_));

        let mut pending = message;
        loop {
            match sender.send_timeout(pending, SEND_POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    pending = back;
                }
                // Consumer closed; nothing left to do
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
        if terminal {
            return;
        }
    }
}

impl Results for AsyncResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        if let Some(message) = &self.failed {
            return Err(QueryError::BackgroundTask(message.clone()));
        }
        if self.lookahead.is_some() {
            return Ok(true);
        }
        if self.exhausted {
            return Ok(false);
        }
        let receiver = match &self.receiver {
            Some(receiver) => receiver,
            None => return Err(QueryError::Closed),
        };
        match receiver.recv() {
            Ok(Message::Row(solution)) => {
                self.lookahead = Some(solution);
                Ok(true)
            }
            Ok(Message::Failed(e)) => {
                let message = e.to_string();
                self.failed = Some(message.clone());
                Err(QueryError::BackgroundTask(message))
            }
            // Worker finished and dropped its sender
            Err(_) => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn next(&mut self) -> Result<Solution> {
        if !self.has_next()? {
            return Err(QueryError::Exhausted);
        }
        self.lookahead.take().ok_or(QueryError::Exhausted)
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Disconnect so a worker blocked on a full channel exits
        self.receiver = None;
        self.lookahead = None;
        if let Some(worker) = self.worker.take() {
            if self.latch.wait(self.close_timeout) {
                let _ = worker.join();
            } else {
                tracing::warn!(
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "async fetch worker did not stop within the close timeout; detaching"
                );
            }
        }
    }

    fn is_async(&self) -> bool {
        true
    }

    fn ready_count(&self) -> usize {
        let buffered = self.receiver.as_ref().map_or(0, |r| r.len());
        buffered + usize::from(self.lookahead.is_some())
    }

    fn is_distinct(&self) -> bool {
        self.distinct
    }
}

impl Drop for AsyncResults {
    fn drop(&mut self) {
        // Stop the worker even if the owner forgot to close
        self.stop.store(true, Ordering::Release);
        self.receiver = None;
    }
}
