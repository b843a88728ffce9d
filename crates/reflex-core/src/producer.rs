//! The producer: a state container with batched notifications
//!
//! A producer owns one immutable [`Value`] and a table of dispatchers. A
//! dispatch replaces the state synchronously and, when the new state is not
//! [`Value::same`] as the old one, defers a single flush to the scheduler.
//! The flush tells every subscriber about the net change since the previous
//! flush, so any number of dispatches within one tick cost one notification.
//!
//! ```
//! use reflex_core::{Producer, TickScheduler, Value};
//! use std::rc::Rc;
//!
//! let scheduler = Rc::new(TickScheduler::new());
//! let counter = Producer::builder(Value::Int(0))
//!     .action("increment", |state, args| {
//!         Ok(Value::Int(state.try_int()? + args[0].try_int()?))
//!     })
//!     .scheduler(scheduler.clone())
//!     .build();
//!
//! assert_eq!(counter.dispatch("increment", &[Value::Int(5)]).unwrap(), Value::Int(5));
//! assert_eq!(counter.get_state(), Value::Int(5));
//! scheduler.run_pending();
//! ```

use crate::identity::{Same, SubscriptionId};
use crate::scheduler::{self, Scheduler, TaskHandle};
use crate::subscription::{Subscription, Wait, WaitSlot};
use crate::{Action, ActionMap, Dispatcher, DispatcherMap, Error, Result, Value};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Listener = Rc<dyn Fn(&Value, &Value)>;

/// Producers keyed by name, as passed to `combine_producers`
pub type ProducerMap = IndexMap<String, Producer>;

pub(crate) struct Inner {
    this: Weak<Inner>,
    state: RefCell<Value>,
    /// Last state subscribers were told about
    state_since_flush: RefCell<Value>,
    next_flush: RefCell<Option<TaskHandle>>,
    next_subscription_id: Cell<u64>,
    subscribers: RefCell<IndexMap<SubscriptionId, Listener>>,
    dispatchers: RefCell<DispatcherMap>,
    actions: ActionMap,
    /// Present on combined producers
    pub(crate) children: Option<ProducerMap>,
    scheduler: Rc<dyn Scheduler>,
    destroyed: Cell<bool>,
}

impl Inner {
    pub(crate) fn state(&self) -> Value {
        self.state.borrow().clone()
    }

    /// Store `next` and schedule a flush if it differs from the current state
    pub(crate) fn commit(&self, next: Value) -> bool {
        let changed = !self.state.borrow().same(&next);
        if changed {
            *self.state.borrow_mut() = next;
            self.schedule_flush();
        }
        changed
    }

    pub(crate) fn schedule_flush(&self) {
        if self.destroyed.get() || self.next_flush.borrow().is_some() {
            return;
        }

        let this = self.this.clone();
        let handle = self.scheduler.defer(Box::new(move || {
            if let Some(inner) = this.upgrade() {
                inner.next_flush.borrow_mut().take();
                inner.flush();
            }
        }));
        tracing::trace!("flush scheduled");
        *self.next_flush.borrow_mut() = Some(handle);
    }

    fn cancel_flush(&self) {
        if let Some(handle) = self.next_flush.borrow_mut().take() {
            handle.cancel();
        }
    }

    pub(crate) fn flush(&self) {
        self.cancel_flush();

        let state = self.state();
        let prev = {
            let mut since = self.state_since_flush.borrow_mut();
            if since.same(&state) {
                return;
            }
            std::mem::replace(&mut *since, state.clone())
        };

        // Listeners may subscribe or unsubscribe while we iterate
        let snapshot: Vec<(SubscriptionId, Listener)> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();
        tracing::debug!(subscribers = snapshot.len(), "flushing state");

        for (id, listener) in snapshot {
            if !self.has_subscriber(id) {
                continue;
            }
            listener(&state, &prev);
        }
    }

    fn add_subscriber(&self, listener: Listener) -> Result<Subscription> {
        if self.destroyed.get() {
            return Err(Error::Destroyed);
        }
        let id = SubscriptionId(self.next_subscription_id.get());
        self.next_subscription_id.set(id.0 + 1);
        self.subscribers.borrow_mut().insert(id, listener);
        Ok(Subscription::new(id, self.this.clone()))
    }

    pub(crate) fn remove_subscriber(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn has_subscriber(&self, id: SubscriptionId) -> bool {
        self.subscribers.borrow().contains_key(&id)
    }
}

/// A state container exposing dispatchers, subscriptions and flushes
///
/// `Producer` is a cheap handle; clones refer to the same container.
#[derive(Clone)]
pub struct Producer {
    inner: Rc<Inner>,
}

impl Producer {
    /// Start building a producer with the given initial state
    pub fn builder(initial: impl Into<Value>) -> ProducerBuilder {
        ProducerBuilder::new(initial.into())
    }

    /// Assemble a producer whose dispatchers need a handle back to it
    pub(crate) fn assemble<F>(
        initial: Value,
        actions: ActionMap,
        children: Option<ProducerMap>,
        scheduler: Rc<dyn Scheduler>,
        make_dispatchers: F,
    ) -> Self
    where
        F: FnOnce(&Weak<Inner>) -> DispatcherMap,
    {
        let inner = Rc::new_cyclic(|this: &Weak<Inner>| Inner {
            this: this.clone(),
            state: RefCell::new(initial.clone()),
            state_since_flush: RefCell::new(initial),
            next_flush: RefCell::new(None),
            next_subscription_id: Cell::new(0),
            subscribers: RefCell::new(IndexMap::new()),
            dispatchers: RefCell::new(make_dispatchers(this)),
            actions,
            children,
            scheduler,
            destroyed: Cell::new(false),
        });
        Self { inner }
    }

    /// The current state
    pub fn get_state(&self) -> Value {
        self.inner.state()
    }

    /// Run `selector` against the current state
    pub fn select<T>(&self, selector: impl FnOnce(&Value) -> T) -> T {
        selector(&self.inner.state())
    }

    /// Replace the state wholesale and schedule a flush
    ///
    /// On a combined producer the top-level slices are also handed down to the
    /// children, and the returned state is rebuilt from them.
    pub fn set_state(&self, state: impl Into<Value>) -> Value {
        let state = state.into();
        let state = match &self.inner.children {
            Some(children) => crate::combine::distribute(children, &state),
            None => state,
        };
        *self.inner.state.borrow_mut() = state.clone();
        self.inner.schedule_flush();
        state
    }

    /// Call the dispatcher registered under `name`
    ///
    /// Returns the new state synchronously. Errors raised by the action (or a
    /// middleware) are returned unchanged and leave the state untouched.
    pub fn dispatch(&self, name: &str, args: &[Value]) -> Result<Value> {
        let dispatcher = self
            .dispatcher(name)
            .ok_or_else(|| Error::UnknownAction(name.to_string()))?;
        dispatcher.call(args)
    }

    /// The current dispatcher for `name`, including any middleware
    pub fn dispatcher(&self, name: &str) -> Option<Dispatcher> {
        self.inner.dispatchers.borrow().get(name).cloned()
    }

    /// All dispatchers, by name
    pub fn get_dispatchers(&self) -> DispatcherMap {
        self.inner.dispatchers.borrow().clone()
    }

    pub(crate) fn set_dispatcher(&self, name: &str, dispatcher: Dispatcher) {
        if let Some(slot) = self.inner.dispatchers.borrow_mut().get_mut(name) {
            *slot = dispatcher;
        }
    }

    /// The actions this producer was created from
    pub fn get_actions(&self) -> &ActionMap {
        &self.inner.actions
    }

    /// The scheduler flushes are deferred to
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.scheduler.clone()
    }

    /// Notify subscribers now if the state changed since the last flush
    ///
    /// Cancels any pending deferred flush. Calling it again without an
    /// intervening change does nothing.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Listen to every state change as `(state, prev_state)`
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Value, &Value) + 'static,
    {
        self.inner.add_subscriber(Rc::new(listener))
    }

    /// Listen to changes of `selector(state)` as `(selection, prev_selection)`
    ///
    /// The baseline selection is taken now. The listener only runs when a
    /// flush produces a selection that is not [`Same`] as the last one seen.
    pub fn observe<T, S, F>(&self, selector: S, listener: F) -> Result<Subscription>
    where
        T: Same + Clone + 'static,
        S: Fn(&Value) -> T + 'static,
        F: Fn(&T, &T) + 'static,
    {
        let selection = RefCell::new(self.select(&selector));

        self.subscribe(move |state, _| {
            let next = selector(state);
            let prev = {
                let current = selection.borrow();
                if next.same(&current) {
                    return;
                }
                current.clone()
            };
            *selection.borrow_mut() = next.clone();
            listener(&next, &prev);
        })
    }

    /// Like [`Producer::observe`], but unsubscribes before the first call
    pub fn once<T, S, F>(&self, selector: S, listener: F) -> Result<Subscription>
    where
        T: Same + Clone + 'static,
        S: Fn(&Value) -> T + 'static,
        F: Fn(&T, &T) + 'static,
    {
        let own: Rc<RefCell<Option<Subscription>>> = Rc::default();
        let slot = own.clone();

        let subscription = self.observe(selector, move |next, prev| {
            if let Some(subscription) = slot.borrow_mut().take() {
                subscription.unsubscribe();
            }
            listener(next, prev);
        })?;
        *own.borrow_mut() = Some(subscription.clone());
        Ok(subscription)
    }

    /// Resolve with the next selection that differs from the current one
    pub fn wait<T, S>(&self, selector: S) -> Result<Wait<T>>
    where
        T: Same + Clone + 'static,
        S: Fn(&Value) -> T + 'static,
    {
        self.wait_for(selector, |_, _| true)
    }

    /// Resolve with the next changed selection for which `predicate` holds
    pub fn wait_for<T, S, P>(&self, selector: S, predicate: P) -> Result<Wait<T>>
    where
        T: Same + Clone + 'static,
        S: Fn(&Value) -> T + 'static,
        P: Fn(&T, &T) -> bool + 'static,
    {
        let slot: Rc<RefCell<WaitSlot<T>>> = Rc::default();
        let weak = Rc::downgrade(&slot);

        let subscription = self.observe(selector, move |next, prev| {
            let Some(slot) = weak.upgrade() else {
                return;
            };
            if slot.borrow().value.is_some() || !predicate(next, prev) {
                return;
            }
            let (subscription, waker) = {
                let mut slot = slot.borrow_mut();
                slot.value = Some(next.clone());
                (slot.subscription.take(), slot.waker.take())
            };
            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
            if let Some(waker) = waker {
                waker.wake();
            }
        })?;

        slot.borrow_mut().subscription = Some(subscription);
        Ok(Wait::new(slot))
    }

    /// Cancel the pending flush and drop every subscriber
    ///
    /// Later subscriptions fail with [`Error::Destroyed`].
    pub fn destroy(&self) {
        self.inner.cancel_flush();
        self.inner.subscribers.borrow_mut().clear();
        self.inner.destroyed.set(true);
    }

    /// Whether `destroy` has been called
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Hand this producer to an enhancer such as [`crate::apply_middleware`]
    pub fn enhance<T>(self, enhancer: impl FnOnce(Producer) -> T) -> T {
        enhancer(self)
    }

    /// A handle that does not keep the producer alive
    ///
    /// Middleware that stores its producer should hold one of these, since the
    /// producer already owns the middleware through its dispatchers.
    pub fn downgrade(&self) -> WeakProducer {
        WeakProducer {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Non-owning counterpart of [`Producer`]
#[derive(Clone, Debug, Default)]
pub struct WeakProducer {
    inner: Weak<Inner>,
}

impl WeakProducer {
    /// The producer, if it is still alive
    pub fn upgrade(&self) -> Option<Producer> {
        self.inner.upgrade().map(|inner| Producer { inner })
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("state", &*self.inner.state.borrow())
            .field("actions", &self.inner.dispatchers.borrow().keys().collect::<Vec<_>>())
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .field("combined", &self.inner.children.is_some())
            .finish()
    }
}

/// Builder for [`Producer`]
pub struct ProducerBuilder {
    initial: Value,
    actions: ActionMap,
    scheduler: Option<Rc<dyn Scheduler>>,
}

impl ProducerBuilder {
    fn new(initial: Value) -> Self {
        Self {
            initial,
            actions: ActionMap::new(),
            scheduler: None,
        }
    }

    /// Register an action under `name`
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + 'static,
    {
        self.actions.insert(name.into(), Action::new(f));
        self
    }

    /// Register every action in `actions`
    pub fn actions(mut self, actions: ActionMap) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Defer flushes to `scheduler` instead of the thread's default one
    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Producer {
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| scheduler::local() as Rc<dyn Scheduler>);
        let actions = self.actions;
        let table = actions.clone();

        Producer::assemble(self.initial, actions, None, scheduler, move |this| {
            table
                .into_iter()
                .map(|(name, action)| {
                    let this = this.clone();
                    let dispatcher = Dispatcher::new(move |args| {
                        let inner = this.upgrade().ok_or(Error::Destroyed)?;
                        let next = action.apply(&inner.state(), args)?;
                        inner.commit(next.clone());
                        Ok(next)
                    });
                    (name, dispatcher)
                })
                .collect()
        })
    }
}

/// Create a producer on the thread's default scheduler
pub fn create_producer(initial: impl Into<Value>, actions: ActionMap) -> Producer {
    Producer::builder(initial).actions(actions).build()
}
