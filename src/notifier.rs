//! Background delivery of throttling events to a logger.
//!
//! The request path only hands a message to a channel; a dedicated worker
//! task owns the logger. The worker lives as long as its [`Notifier`]: it
//! stops when the notifier is dropped or [`Notifier::close`] is awaited.

use crate::error::{ThrottlerError, ThrottlerResult};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sink for throttling log lines.
pub trait ThrottleLogger: Send + Sync {
    fn print(&self, message: &str);
}

impl<F> ThrottleLogger for F
where
    F: Fn(&str) + Send + Sync,
{
    fn print(&self, message: &str) {
        self(message)
    }
}

/// Default logger: emits a `warn` event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ThrottleLogger for TracingLogger {
    fn print(&self, message: &str) {
        warn!(target: "throttler::notifier", "{}", message);
    }
}

pub struct Notifier {
    sender: mpsc::Sender<String>,
    shutdown: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    /// Start the worker on the current Tokio runtime.
    ///
    /// With `verbose` off the worker still drains the channel but never
    /// calls the logger.
    pub fn spawn(logger: Arc<dyn ThrottleLogger>, verbose: bool) -> ThrottlerResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ThrottlerError::Configuration(
                "throttle notifier must be started inside a Tokio runtime".to_string(),
            )
        })?;

        // Capacity 1 keeps the hand-off as close to rendezvous as tokio allows.
        let (sender, receiver) = mpsc::channel(1);
        let shutdown = Arc::new(Notify::new());
        let worker = runtime.spawn(run(receiver, shutdown.clone(), logger, verbose));

        Ok(Self {
            sender,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a message for the logger. Messages sent after
    /// [`Notifier::close`] are dropped.
    pub async fn notify(&self, message: String) {
        if self.sender.send(message).await.is_err() {
            debug!("Notifier closed, dropping throttle event");
        }
    }

    /// Stop the worker after it has delivered everything already queued.
    /// Concurrent callers all return only once the queue is drained.
    pub async fn close(&self) {
        self.shutdown.notify_one();

        // Held across the join so a second caller waits for the drain.
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Throttle notifier worker failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

async fn run(
    mut receiver: mpsc::Receiver<String>,
    shutdown: Arc<Notify>,
    logger: Arc<dyn ThrottleLogger>,
    verbose: bool,
) {
    let deliver = |message: String| {
        if verbose {
            logger.print(&message);
        }
    };

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(message) => deliver(message),
                None => break,
            },
            _ = shutdown.notified() => {
                receiver.close();
                while let Some(message) = receiver.recv().await {
                    deliver(message);
                }
                break;
            }
        }
    }

    debug!("Throttle notifier stopped");
}
