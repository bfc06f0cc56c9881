//! Loading/error/data adapters that screens bind to.

pub mod fetch;
pub mod handle;
pub mod notify;
pub mod state;
pub mod subscription;

pub use fetch::{FetchAdapter, FetchFn, FetchFuture};
pub use handle::SubscriptionHandle;
pub use notify::{LogNotifier, Notifier};
pub use state::QueryState;
pub use subscription::{Sink, SubscribeFn, SubscriptionAdapter};
