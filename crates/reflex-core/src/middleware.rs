//! Middleware: interceptors wrapped around every dispatcher
//!
//! A middleware has three levels:
//!
//! 1. [`Middleware::setup`] runs once per producer (subscribe, allocate
//!    per-producer buffers, ...).
//! 2. The returned [`Wrap`] runs once per action name and receives the next
//!    dispatcher in the chain.
//! 3. The dispatcher it returns runs on every dispatch.
//!
//! ```
//! use reflex_core::{Dispatcher, Producer, TickScheduler, Value};
//! use std::rc::Rc;
//!
//! let producer = Producer::builder(Value::Int(0))
//!     .action("add", |state, args| Ok(Value::Int(state.try_int()? + args[0].try_int()?)))
//!     .scheduler(Rc::new(TickScheduler::new()))
//!     .build();
//!
//! // Doubles every argument before it reaches the action
//! let doubler = |_: &Producer| {
//!     |next: Dispatcher, _name: &str| {
//!         Dispatcher::new(move |args| {
//!             let doubled: Vec<Value> = args
//!                 .iter()
//!                 .map(|v| Value::Int(v.as_int().unwrap_or(0) * 2))
//!                 .collect();
//!             next.call(&doubled)
//!         })
//!     }
//! };
//!
//! producer.apply_middleware(&[&doubler]);
//! assert_eq!(producer.dispatch("add", &[Value::Int(2)]).unwrap(), Value::Int(4));
//! ```
//!
//! Middleware applied first is outermost. A wrapper that returns without
//! calling `next` cancels the action: inner middleware and the action itself
//! are skipped. Arguments handed to `next` are what the inner links see; they
//! are not copied first.

use crate::{Dispatcher, Producer};

/// Per-action wrapper returned by [`Middleware::setup`]
pub type Wrap = Box<dyn Fn(Dispatcher, &str) -> Dispatcher>;

/// Intercepts dispatches on a producer
pub trait Middleware {
    /// Prepare for `producer` and return the per-action wrapper
    fn setup(&self, producer: &Producer) -> Wrap;
}

impl<F, W> Middleware for F
where
    F: Fn(&Producer) -> W,
    W: Fn(Dispatcher, &str) -> Dispatcher + 'static,
{
    fn setup(&self, producer: &Producer) -> Wrap {
        Box::new(self(producer))
    }
}

impl Producer {
    /// Wrap every dispatcher of this producer with `middlewares`
    ///
    /// Mutates this producer in place and returns a handle to it.
    pub fn apply_middleware(&self, middlewares: &[&dyn Middleware]) -> Producer {
        install(self, middlewares);
        self.clone()
    }
}

/// Enhancer form of [`Producer::apply_middleware`], for use with [`Producer::enhance`]
pub fn apply_middleware(middlewares: Vec<Box<dyn Middleware>>) -> impl FnOnce(Producer) -> Producer {
    move |producer| {
        let chain: Vec<&dyn Middleware> = middlewares
            .iter()
            .map(|m| &**m as &dyn Middleware)
            .collect();
        install(&producer, &chain);
        producer
    }
}

fn install(producer: &Producer, middlewares: &[&dyn Middleware]) {
    let chain: Vec<Wrap> = middlewares.iter().map(|m| m.setup(producer)).collect();
    if chain.is_empty() {
        return;
    }

    let dispatchers = producer.get_dispatchers();
    tracing::debug!(
        middlewares = chain.len(),
        actions = dispatchers.len(),
        "applying middleware"
    );

    for (name, dispatcher) in dispatchers {
        let wrapped = chain
            .iter()
            .rev()
            .fold(dispatcher, |next, wrap| wrap(next, &name));
        producer.set_dispatcher(&name, wrapped);
    }
}
