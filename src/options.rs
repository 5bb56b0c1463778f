use crate::error::LIMIT_REACHED_MESSAGE;
use crate::key_resolver::KeyResolver;
use crate::limit::{RangeOverrides, Threshold};
use crate::notifier::ThrottleLogger;
use crate::store::CounterStore;
use crate::subnet::Subnet;
use std::fmt;
use std::sync::Arc;

/// Settings for one throttling middleware instance.
///
/// Only the default threshold is required; everything else falls back to
/// the in-memory store, the peer-address resolver and the tracing logger.
/// Setting an option twice keeps the last value.
///
/// ```
/// use throttler::{Threshold, ThrottleOptions};
///
/// let options = ThrottleOptions::new(100u64)
///     .with_verbose(false)
///     .with_range_override("10.0.0.0/8".parse().unwrap(), Threshold::Unlimited);
/// assert_eq!(options.threshold(), Threshold::Limit(100));
/// ```
#[derive(Clone)]
pub struct ThrottleOptions {
    pub(crate) threshold: Threshold,
    pub(crate) verbose: Option<bool>,
    pub(crate) limit_reached_message: Option<String>,
    pub(crate) key_resolver: Option<Arc<dyn KeyResolver>>,
    pub(crate) store: Option<Arc<dyn CounterStore>>,
    pub(crate) logger: Option<Arc<dyn ThrottleLogger>>,
    pub(crate) range_overrides: Option<RangeOverrides>,
}

impl ThrottleOptions {
    pub fn new(threshold: impl Into<Threshold>) -> Self {
        Self {
            threshold: threshold.into(),
            verbose: None,
            limit_reached_message: None,
            key_resolver: None,
            store: None,
            logger: None,
            range_overrides: None,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Threshold::Unlimited)
    }

    pub fn with_threshold(mut self, threshold: impl Into<Threshold>) -> Self {
        self.threshold = threshold.into();
        self
    }

    /// Whether throttling events reach the logger. Defaults to `true`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Body of the 429 response.
    pub fn with_limit_reached_message(mut self, message: impl Into<String>) -> Self {
        self.limit_reached_message = Some(message.into());
        self
    }

    pub fn with_key_resolver(mut self, resolver: impl KeyResolver + 'static) -> Self {
        self.key_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ThrottleLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Replace the whole override set. An empty set still disables the
    /// unlimited fast path.
    pub fn with_range_overrides(mut self, overrides: RangeOverrides) -> Self {
        self.range_overrides = Some(overrides);
        self
    }

    /// Add one override to the current set.
    pub fn with_range_override(mut self, subnet: Subnet, threshold: impl Into<Threshold>) -> Self {
        self.range_overrides
            .get_or_insert_with(RangeOverrides::new)
            .insert(subnet, threshold.into());
        self
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(true)
    }

    pub fn limit_reached_message(&self) -> &str {
        self.limit_reached_message
            .as_deref()
            .unwrap_or(LIMIT_REACHED_MESSAGE)
    }

    pub fn range_overrides(&self) -> Option<&RangeOverrides> {
        self.range_overrides.as_ref()
    }
}

impl fmt::Debug for ThrottleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleOptions")
            .field("threshold", &self.threshold)
            .field("verbose", &self.verbose)
            .field("limit_reached_message", &self.limit_reached_message)
            .field("custom_key_resolver", &self.key_resolver.is_some())
            .field("custom_store", &self.store.is_some())
            .field("custom_logger", &self.logger.is_some())
            .field("range_overrides", &self.range_overrides)
            .finish()
    }
}
