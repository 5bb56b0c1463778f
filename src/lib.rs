pub mod config;
pub mod error;
pub mod key_resolver;
pub mod limit;
pub mod middleware;
pub mod notifier;
pub mod options;
pub mod response;
pub mod server;
pub mod store;
pub mod subnet;
pub mod throttler;

pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult, LIMIT_REACHED_MESSAGE};
pub use key_resolver::{HeaderResolver, KeyResolver, RemoteAddrResolver};
pub use limit::{LimitSelector, RangeOverrides, Threshold, UNLIMITED};
pub use middleware::{ThrottleLayer, ThrottleService};
pub use notifier::{ThrottleLogger, TracingLogger};
pub use options::ThrottleOptions;
pub use store::{CounterStore, MemoryStore};
pub use subnet::Subnet;
pub use throttler::Throttler;
