//! Reflex Core - Immutable state producers
//!
//! This crate provides the building blocks of a reflex store:
//! - Dynamic, reference-counted state values (`Value`, `ValueMap`)
//! - Producers: state containers with named actions and batched notifications
//! - Memoized selectors that keep derived values stable across unrelated changes
//! - Middleware wrapped around every dispatcher
//! - A combinator that merges several producers into one
//!
//! ## Scheduling
//!
//! Dispatches update state synchronously. Notifications are deferred to a
//! [`Scheduler`]; every producer built without an explicit one shares the
//! thread's [`TickScheduler`], drained with [`scheduler::run_deferred`].
//! Producers are single-threaded (`!Send`); give each thread its own.
//!
//! ## Identity
//!
//! "Changed" always means "not [`Value::same`]": scalars compare by value,
//! lists and maps by allocation. Actions must return their input unchanged
//! to signal a no-op and must build new containers to signal a change.

mod action;
mod combine;
mod error;
mod identity;
mod logger;
mod middleware;
mod producer;
pub mod scheduler;
mod selector;
mod subscription;
mod value;

pub use action::{Action, ActionMap, Dispatcher, DispatcherMap};
pub use combine::{combine_producers, combine_producers_with};
pub use error::{Error, Result};
pub use identity::{Same, SubscriptionId};
pub use logger::{LoggerConfig, LoggerMiddleware};
pub use middleware::{apply_middleware, Middleware, Wrap};
pub use producer::{create_producer, Producer, ProducerBuilder, ProducerMap, WeakProducer};
pub use scheduler::{Scheduler, TaskHandle, TickScheduler};
pub use selector::{create_selector, selector_fn, state_selector, MemoSelector, SelectorFn};
pub use subscription::{Subscription, Wait};
pub use value::{arg, required_arg, Value, ValueMap};
