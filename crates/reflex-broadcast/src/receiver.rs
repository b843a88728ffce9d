//! Client half of the sync protocol
//!
//! The receiver hydrates the client's root producer with the server's shared
//! state and then replays every action batch the server broadcasts. Both sides
//! run the same action functions on the same inputs, so actions must be
//! deterministic: an action that invents data (random ids, timestamps) instead
//! of taking it as an argument makes the client drift from the server, and
//! nothing here detects or repairs that.

use crate::{ActionFilter, BroadcastAction, Error, Result};
use reflex_core::{Dispatcher, Middleware, Producer, Value, WeakProducer, Wrap};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

/// Pending response to a state request
pub type StateRequest = Pin<Box<dyn Future<Output = Result<Value>>>>;

/// Transport call that asks the server for the shared state
pub type RequestStateFn = Box<dyn Fn() -> StateRequest>;

/// Options for [`create_broadcast_receiver`]
pub struct ReceiverOptions {
    /// Issues a state request to the server
    pub request_state: RequestStateFn,
    /// The shared actions and slices, mirroring the server's broadcaster
    pub filter: ActionFilter,
}

struct State {
    filter: ActionFilter,
    request_state: RequestStateFn,
    producer: RefCell<Option<WeakProducer>>,
    request: RefCell<Option<StateRequest>>,
    replaying: Cell<bool>,
    /// Depth of shared dispatches currently on the stack
    shared_depth: Cell<usize>,
}

impl State {
    fn producer(&self) -> Result<Producer> {
        self.producer
            .borrow()
            .as_ref()
            .and_then(WeakProducer::upgrade)
            .ok_or(Error::NotAttached)
    }
}

/// Applies server broadcasts to a client producer
///
/// Clones refer to the same receiver.
#[derive(Clone)]
pub struct BroadcastReceiver {
    state: Rc<State>,
}

/// Create a receiver; attach it with [`BroadcastReceiver::middleware`] or
/// [`BroadcastReceiver::enhancer`]
pub fn create_broadcast_receiver(options: ReceiverOptions) -> BroadcastReceiver {
    BroadcastReceiver {
        state: Rc::new(State {
            filter: options.filter,
            request_state: options.request_state,
            producer: RefCell::new(None),
            request: RefCell::new(None),
            replaying: Cell::new(false),
            shared_depth: Cell::new(0),
        }),
    }
}

impl BroadcastReceiver {
    /// The middleware to apply to the client's root producer
    ///
    /// Applying it issues the state request; await [`BroadcastReceiver::hydrate`]
    /// to merge the response.
    pub fn middleware(&self) -> ReceiverMiddleware {
        ReceiverMiddleware {
            state: self.state.clone(),
        }
    }

    /// Enhancer form of [`BroadcastReceiver::middleware`]
    pub fn enhancer(&self) -> impl FnOnce(Producer) -> Producer {
        let middleware = self.middleware();
        move |producer| producer.apply_middleware(&[&middleware])
    }

    /// Wait for the server state and shallow-merge it into the producer
    ///
    /// Top-level keys of the response replace the matching keys of the local
    /// state; other keys are kept. Returns the merged state.
    pub async fn hydrate(&self) -> Result<Value> {
        let issued = self.state.request.borrow_mut().take();
        let request = match issued {
            Some(request) => request,
            None => {
                self.state.producer()?;
                (self.state.request_state)()
            }
        };

        let server_state = request.await?;
        let producer = self.state.producer()?;

        if let Some(map) = server_state.as_map() {
            for key in map.keys().filter(|key| !self.state.filter.is_shared_slice(key)) {
                tracing::warn!(key = %key, "server sent an unshared slice");
            }
        }

        let merged = producer.get_state().merge(&server_state);
        tracing::debug!("hydrating from server state");
        Ok(producer.set_state(merged))
    }

    /// Replay a server batch, in order, with the exact arguments received
    ///
    /// Every name is checked before anything runs, so an unknown action leaves
    /// the producer untouched.
    pub fn dispatch(&self, actions: &[BroadcastAction]) -> Result<()> {
        let producer = self.state.producer()?;

        let dispatchers = actions
            .iter()
            .map(|action| {
                producer
                    .dispatcher(&action.name)
                    .ok_or_else(|| Error::UnknownAction(action.name.clone()))
            })
            .collect::<Result<Vec<Dispatcher>>>()?;

        tracing::debug!(actions = actions.len(), "replaying broadcast");
        self.state.replaying.set(true);
        let result = actions
            .iter()
            .zip(&dispatchers)
            .try_for_each(|(action, dispatcher)| dispatcher.call(&action.arguments).map(drop));
        self.state.replaying.set(false);

        result.map_err(Error::from)
    }

    pub fn filter(&self) -> &ActionFilter {
        &self.state.filter
    }

    /// Whether a server batch is being replayed right now
    pub fn is_replaying(&self) -> bool {
        self.state.replaying.get()
    }
}

/// Middleware returned by [`BroadcastReceiver::middleware`]
///
/// During a replay, a shared action dispatched from inside another shared
/// action (for instance by a local middleware) is cancelled: the server
/// recorded it as its own entry, which the batch replays separately.
pub struct ReceiverMiddleware {
    state: Rc<State>,
}

impl Middleware for ReceiverMiddleware {
    fn setup(&self, producer: &Producer) -> Wrap {
        *self.state.producer.borrow_mut() = Some(producer.downgrade());
        *self.state.request.borrow_mut() = Some((self.state.request_state)());
        tracing::debug!("requested server state");

        let state = self.state.clone();
        let weak = producer.downgrade();

        Box::new(move |next: Dispatcher, name: &str| {
            if !state.filter.contains(name) {
                return next;
            }

            let state = state.clone();
            let weak = weak.clone();
            let name = name.to_string();
            Dispatcher::new(move |args| {
                let depth = state.shared_depth.get();
                if state.replaying.get() && depth > 0 {
                    tracing::trace!(action = %name, "skipping nested shared action during replay");
                    let producer = weak.upgrade().ok_or(reflex_core::Error::Destroyed)?;
                    return Ok(producer.get_state());
                }

                state.shared_depth.set(depth + 1);
                let result = next.call(args);
                state.shared_depth.set(depth);
                result
            })
        })
    }
}
