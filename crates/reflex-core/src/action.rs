//! Actions and dispatchers

use crate::{Result, Value};
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// A pure state transition: `(state, args) -> new state`
///
/// Actions must be deterministic. Broadcast actions are replayed on other
/// machines with the same arguments, and anything an action derives on its
/// own (random ids, clock reads) makes the peers drift apart silently.
/// Returning a value that is [`Value::same`] as the input means "no change".
#[derive(Clone)]
pub struct Action(Rc<dyn Fn(&Value, &[Value]) -> Result<Value>>);

impl Action {
    /// Wrap a fallible transition
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + 'static,
    {
        Self(Rc::new(f))
    }

    /// Wrap a transition that cannot fail
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Value + 'static,
    {
        Self(Rc::new(move |state, args| Ok(f(state, args))))
    }

    /// Run the transition
    pub fn apply(&self, state: &Value, args: &[Value]) -> Result<Value> {
        (self.0)(state, args)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action(..)")
    }
}

/// Actions registered on a producer, by name
pub type ActionMap = IndexMap<String, Action>;

/// An action with the state argument curried away
#[derive(Clone)]
pub struct Dispatcher(Rc<dyn Fn(&[Value]) -> Result<Value>>);

impl Dispatcher {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self(Rc::new(f))
    }

    /// Invoke the dispatcher and return the resulting state
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0)(args)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatcher(..)")
    }
}

/// Dispatchers exposed by a producer, by name
pub type DispatcherMap = IndexMap<String, Dispatcher>;
