use crate::error::{ThrottlerError, ThrottlerResult};
use crate::key_resolver::{KeyResolver, RemoteAddrResolver};
use crate::limit::{LimitSelector, Threshold};
use crate::notifier::{Notifier, TracingLogger};
use crate::options::ThrottleOptions;
use crate::store::{CounterStore, MemoryStore};
use axum::extract::Request;
use std::sync::Arc;
use tracing::debug;

/// Decision engine shared by every request passing through one middleware
/// instance.
///
/// Nothing here changes after construction except the counts held by the
/// store.
pub struct Throttler {
    store: Arc<dyn CounterStore>,
    notifier: Notifier,
    selector: LimitSelector,
    resolver: Arc<dyn KeyResolver>,
    limit_reached_message: String,
    verbose: bool,
}

impl Throttler {
    /// Build the engine and start its notifier. Must be called from within a
    /// Tokio runtime.
    pub fn new(options: ThrottleOptions) -> ThrottlerResult<Self> {
        let verbose = options.verbose();
        let limit_reached_message = options.limit_reached_message().to_string();

        let logger = options.logger.unwrap_or_else(|| Arc::new(TracingLogger));
        let notifier = Notifier::spawn(logger, verbose)?;

        let store = options
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::default()));
        let resolver = options
            .key_resolver
            .unwrap_or_else(|| Arc::new(RemoteAddrResolver));

        Ok(Self {
            store,
            notifier,
            selector: LimitSelector::new(options.threshold, options.range_overrides),
            resolver,
            limit_reached_message,
            verbose,
        })
    }

    /// True when the default is unlimited and no overrides were configured;
    /// such instances never resolve keys or touch the store.
    pub fn is_bypassed(&self) -> bool {
        self.selector.is_disabled()
    }

    pub fn resolve_key(&self, request: &Request) -> ThrottlerResult<String> {
        self.resolver.resolve(request)
    }

    /// Resolve the key of `request` and count it. Resolver errors are
    /// returned as is; callers decide whether to admit.
    ///
    /// The future borrows the request, whose body is not `Sync`, so it is not
    /// `Send`. Code that must spawn should resolve first and use
    /// [`Throttler::check_key`].
    pub async fn check(&self, request: &Request) -> ThrottlerResult<()> {
        if self.is_bypassed() {
            return Ok(());
        }
        let key = self.resolve_key(request)?;
        self.check_key(&key).await
    }

    /// Count one request against `key`.
    ///
    /// Returns [`ThrottlerError::LimitReached`] when the request must be
    /// rejected. The first request of a window is always admitted, whatever
    /// the threshold.
    pub async fn check_key(&self, key: &str) -> ThrottlerResult<()> {
        if self.is_bypassed() {
            return Ok(());
        }

        let count = match self.store.increment(key, 1).await {
            Ok(count) => count,
            Err(ThrottlerError::KeyNotFound(_)) => match self.store.add_item(key, 1).await {
                Ok(()) => {
                    debug!(key, "Started throttling window");
                    return Ok(());
                }
                // Another request opened the window between our two calls.
                Err(ThrottlerError::KeyExists(_)) => self.store.increment(key, 1).await?,
                Err(err) => return Err(err),
            },
            Err(err) => return Err(err),
        };

        let threshold = self.selector.threshold_for(key);
        if threshold.is_exceeded_by(count) {
            debug!(key, count, %threshold, "Request throttled");
            self.notifier
                .notify(format!("[Throttled] {} reached count", key))
                .await;
            return Err(ThrottlerError::LimitReached(
                self.limit_reached_message.clone(),
            ));
        }

        debug!(key, count, %threshold, "Request admitted");
        Ok(())
    }

    pub fn threshold_for(&self, key: &str) -> Threshold {
        self.selector.threshold_for(key)
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn selector(&self) -> &LimitSelector {
        &self.selector
    }

    pub fn limit_reached_message(&self) -> &str {
        &self.limit_reached_message
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Flush pending log events and stop the notifier worker.
    pub async fn shutdown(&self) {
        self.notifier.close().await;
    }
}
