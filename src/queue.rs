//! Single-flight request queue with bounded retries.
//!
//! The queue runs one outstanding command against the bus at a time. Each
//! item names the opcode of the response that completes it; correlation is
//! by opcode only, which is sound exactly because at most one item is ever
//! in flight. A per-attempt timer drives retries; when the retry budget is
//! spent the item is abandoned with an error log and the queue moves on.
//!
//! The worker multiplexes four sources: the quit signal, pending items,
//! observed messages and the armed timer. The select is biased so that a
//! response and a timer fire arriving in the same scheduling quantum
//! resolve in favor of the response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::error::{BridgeError, Result};
use crate::message::Message;

/// Capacity of the observed-message channel. The queue is an optional
/// response oracle, not the authoritative sink for bus traffic, so
/// overflowing notifications are dropped.
pub const INBOUND_QUEUE_SIZE: usize = 10;

/// A command awaiting its response.
pub struct Request {
    name: String,
    expected_opcode: u16,
    run: Box<dyn Fn() + Send>,
}

impl Request {
    /// Create a request. `run` emits the command onto the bus and may be
    /// invoked again on every retry.
    pub fn new(name: impl Into<String>, expected_opcode: u16, run: impl Fn() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            expected_opcode,
            run: Box::new(run),
        }
    }

    fn is_response(&self, opcode: u16) -> bool {
        self.expected_opcode == opcode
    }
}

/// An armed timeout with an explicit stop.
pub struct QueueTimer {
    fired: Pin<Box<dyn Future<Output = ()> + Send>>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl QueueTimer {
    /// Build a timer from a fire future and a stop action.
    pub fn new(
        fired: impl Future<Output = ()> + Send + 'static,
        stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            fired: Box::pin(fired),
            stop: Some(Box::new(stop)),
        }
    }

    /// Stop the timer. Invokes the stop action exactly once.
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Creates one armed timer per attempt.
pub type TimerFactory = Arc<dyn Fn(Duration) -> QueueTimer + Send + Sync>;

/// Timer factory backed by the tokio clock.
pub fn tokio_timer_factory() -> TimerFactory {
    Arc::new(|timeout| {
        let (fire_tx, fire_rx) = oneshot::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = fire_tx.send(());
                }
                _ = &mut stop_rx => {}
            }
        });
        QueueTimer::new(
            async move {
                if fire_rx.await.is_err() {
                    // Stopped before firing; never resolve.
                    std::future::pending::<()>().await;
                }
            },
            move || {
                let _ = stop_tx.send(());
            },
        )
    })
}

type Channels = (mpsc::Receiver<Request>, mpsc::Receiver<u16>);

struct RunningWorker {
    quit_tx: watch::Sender<bool>,
    done_rx: oneshot::Receiver<Channels>,
}

struct QueueState {
    running: Option<RunningWorker>,
    parked: Option<Channels>,
}

/// Single-flight command scheduler.
pub struct MessageQueue {
    items_tx: mpsc::Sender<Request>,
    messages_tx: mpsc::Sender<u16>,
    state: Mutex<QueueState>,
    timer_factory: Option<TimerFactory>,
    timeout: Duration,
    max_retries: u32,
}

impl MessageQueue {
    /// Create a stopped queue with room for `queue_size` pending items.
    ///
    /// Without a timer factory the queue fires each item and immediately
    /// proceeds to the next, never waiting for a response.
    pub fn new(
        timer_factory: Option<TimerFactory>,
        timeout: Duration,
        max_retries: u32,
        queue_size: usize,
    ) -> Self {
        let (items_tx, items_rx) = mpsc::channel(queue_size);
        let (messages_tx, messages_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        Self {
            items_tx,
            messages_tx,
            state: Mutex::new(QueueState {
                running: None,
                parked: Some((items_rx, messages_rx)),
            }),
            timer_factory,
            timeout,
            max_retries,
        }
    }

    /// Start the worker. Both channels are flushed before the worker
    /// spawns, so items and messages from a previous run are discarded.
    /// A no-op when already started.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return;
        }
        let (mut items_rx, mut messages_rx) =
            state.parked.take().expect("queue channels lost");
        while items_rx.try_recv().is_ok() {}
        while messages_rx.try_recv().is_ok() {}

        let (quit_tx, quit_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        let worker = Worker {
            timer_factory: self.timer_factory.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
        };
        tokio::spawn(async move {
            let channels = worker.run(items_rx, messages_rx, quit_rx).await;
            let _ = done_tx.send(channels);
        });
        state.running = Some(RunningWorker { quit_tx, done_rx });
    }

    /// Stop the worker, dropping any in-flight item and stopping its
    /// timer. Waits for the worker to acknowledge exit. A no-op when
    /// already stopped.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.running.take() else {
            return;
        };
        let _ = running.quit_tx.send(true);
        match running.done_rx.await {
            Ok(channels) => state.parked = Some(channels),
            Err(_) => tracing::error!("queue worker exited without returning its channels"),
        }
    }

    /// Put a request into the queue without blocking.
    ///
    /// Returns [`BridgeError::QueueOverflow`] when the queue is full; the
    /// request is dropped without side effect.
    pub fn enqueue(&self, request: Request) -> Result<()> {
        self.items_tx
            .try_send(request)
            .map_err(|_| BridgeError::QueueOverflow)
    }

    /// Offer an observed message to the queue without blocking. When the
    /// observed channel is saturated the message is dropped.
    pub fn notify_received(&self, message: &Message) {
        self.notify_opcode(message.opcode());
    }

    /// As [`MessageQueue::notify_received`], from a bare opcode.
    pub fn notify_opcode(&self, opcode: u16) {
        if self.messages_tx.try_send(opcode).is_err() {
            tracing::trace!(opcode, "observed-message channel full, dropping");
        }
    }
}

struct Worker {
    timer_factory: Option<TimerFactory>,
    timeout: Duration,
    max_retries: u32,
}

impl Worker {
    async fn run(
        &self,
        mut items: mpsc::Receiver<Request>,
        mut messages: mpsc::Receiver<u16>,
        mut quit: watch::Receiver<bool>,
    ) -> Channels {
        loop {
            tokio::select! {
                biased;
                _ = quit.changed() => break,
                Some(item) = items.recv() => {
                    if !self.process_item(item, &mut messages, &mut quit).await {
                        break;
                    }
                }
                Some(_) = messages.recv() => {
                    // No item in flight; observed messages are discarded.
                }
            }
        }
        tracing::debug!("request queue: stopping the loop");
        (items, messages)
    }

    /// Run one item to completion. Returns false when quit was signalled.
    async fn process_item(
        &self,
        item: Request,
        messages: &mut mpsc::Receiver<u16>,
        quit: &mut watch::Receiver<bool>,
    ) -> bool {
        (item.run)();
        let Some(timer_factory) = &self.timer_factory else {
            return true;
        };
        let mut timer = timer_factory(self.timeout);
        let mut attempts_left = self.max_retries;
        loop {
            tokio::select! {
                biased;
                _ = quit.changed() => {
                    timer.stop();
                    return false;
                }
                Some(opcode) = messages.recv() => {
                    if item.is_response(opcode) {
                        timer.stop();
                        return true;
                    }
                    // Not the response we are waiting for; keep going.
                }
                _ = &mut timer.fired => {
                    if attempts_left == 0 {
                        tracing::error!(
                            "command failed after {} retries: {}",
                            self.max_retries,
                            item.name
                        );
                        return true;
                    }
                    attempts_left -= 1;
                    tracing::warn!("retrying {} ({} attempts left)", item.name, attempts_left);
                    (item.run)();
                    timer = timer_factory(self.timeout);
                }
            }
        }
    }
}
