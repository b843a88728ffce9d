//! Memoized selectors
//!
//! A selector derives a value from state. Plain selectors are just closures
//! and run on every call. [`create_selector`] builds a memoized one: it
//! re-runs its combiner only when one of its dependencies returns something
//! that is not [`Value::same`] as last time, so derived lists and maps keep
//! their identity across unrelated state changes.

use crate::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// A dependency of a memoized selector, called with the selector's arguments
pub type SelectorFn = Rc<dyn Fn(&[Value]) -> Value>;

/// Adapt a state-only selector into a dependency that reads `args[0]`
pub fn state_selector<F>(f: F) -> SelectorFn
where
    F: Fn(&Value) -> Value + 'static,
{
    Rc::new(move |args: &[Value]| f(crate::value::arg(args, 0)))
}

/// Adapt a selector taking extra arguments into a dependency
pub fn selector_fn<F>(f: F) -> SelectorFn
where
    F: Fn(&[Value]) -> Value + 'static,
{
    Rc::new(f)
}

struct Memo<T> {
    arguments: Vec<Value>,
    dependencies: Vec<Option<Value>>,
    value: Option<T>,
}

/// A selector that caches its output until a dependency changes
///
/// Clones share the same cache.
pub struct MemoSelector<T> {
    dependencies: Rc<[SelectorFn]>,
    combiner: Rc<dyn Fn(&[Value]) -> T>,
    memo: Rc<RefCell<Memo<T>>>,
}

impl<T> Clone for MemoSelector<T> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            combiner: self.combiner.clone(),
            memo: self.memo.clone(),
        }
    }
}

/// Build a memoized selector from `dependencies` and a `combiner` over their results
pub fn create_selector<T, F>(dependencies: Vec<SelectorFn>, combiner: F) -> MemoSelector<T>
where
    T: Clone + 'static,
    F: Fn(&[Value]) -> T + 'static,
{
    let count = dependencies.len();
    MemoSelector {
        dependencies: dependencies.into(),
        combiner: Rc::new(combiner),
        memo: Rc::new(RefCell::new(Memo {
            arguments: Vec::new(),
            dependencies: vec![None; count],
            value: None,
        })),
    }
}

impl<T: Clone + 'static> MemoSelector<T> {
    /// Evaluate with the given arguments, reusing the cached output when possible
    pub fn select(&self, args: &[Value]) -> T {
        let (first_call, arguments_changed) = {
            let mut memo = self.memo.borrow_mut();
            let first_call = memo.value.is_none();
            // A position that disappeared counts as a change
            let changed = memo.arguments.len() != args.len()
                || memo
                    .arguments
                    .iter()
                    .zip(args)
                    .any(|(cached, arg)| !cached.same(arg));
            if changed {
                memo.arguments = args.to_vec();
            }
            (first_call, changed)
        };

        let mut recompute = first_call;
        if arguments_changed || first_call {
            // Dependencies run without the cache borrowed so they may use other selectors
            for (index, dependency) in self.dependencies.iter().enumerate().rev() {
                let result = dependency(args);
                let mut memo = self.memo.borrow_mut();
                let slot = &mut memo.dependencies[index];
                if !slot.as_ref().is_some_and(|cached| cached.same(&result)) {
                    *slot = Some(result);
                    recompute = true;
                }
            }
        }

        if !recompute {
            if let Some(value) = &self.memo.borrow().value {
                return value.clone();
            }
        }

        let results: Vec<Value> = self
            .memo
            .borrow()
            .dependencies
            .iter()
            .map(|result| result.clone().unwrap_or_default())
            .collect();
        let value = (self.combiner)(&results);
        self.memo.borrow_mut().value = Some(value.clone());
        value
    }

    /// Evaluate against a single state argument
    pub fn of_state(&self, state: &Value) -> T {
        self.select(std::slice::from_ref(state))
    }

    /// A plain `state -> T` closure for `select`, `observe` and `wait`
    pub fn as_selector(&self) -> impl Fn(&Value) -> T + 'static {
        let selector = self.clone();
        move |state: &Value| selector.of_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Producer, TickScheduler};
    use std::cell::Cell;

    fn todos(items: Value, filter: &str) -> Value {
        Value::map([("items", items), ("filter", Value::from(filter))])
    }

    fn done_items(calls: Rc<Cell<usize>>) -> MemoSelector<Value> {
        create_selector(
            vec![state_selector(|state| state.get("items").clone())],
            move |deps| {
                calls.set(calls.get() + 1);
                Value::list(
                    deps[0]
                        .as_list()
                        .unwrap_or_default()
                        .iter()
                        .filter(|item| item.get("done").as_bool() == Some(true))
                        .cloned(),
                )
            },
        )
    }

    #[test]
    fn test_same_dependency_returns_cached_reference() {
        let calls = Rc::new(Cell::new(0));
        let select_done = done_items(calls.clone());

        let items = Value::list([Value::map([("done", true)]), Value::map([("done", false)])]);
        let first = select_done.of_state(&todos(items.clone(), "all"));
        // New state object, same items list
        let second = select_done.of_state(&todos(items, "done"));

        assert_eq!(calls.get(), 1);
        assert!(first.same(&second));
        assert_eq!(first.as_list().map(<[Value]>::len), Some(1));
    }

    #[test]
    fn test_changed_dependency_recomputes() {
        let calls = Rc::new(Cell::new(0));
        let select_done = done_items(calls.clone());

        let first = select_done.of_state(&todos(Value::list([Value::map([("done", true)])]), "all"));
        let second = select_done.of_state(&todos(Value::list([Value::map([("done", true)])]), "all"));

        assert_eq!(calls.get(), 2);
        assert!(!first.same(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_identical_arguments_skip_dependencies() {
        let dependency_calls = Rc::new(Cell::new(0));
        let d = dependency_calls.clone();
        let selector = create_selector(
            vec![state_selector(move |state| {
                d.set(d.get() + 1);
                state.get("n").clone()
            })],
            |deps| deps[0].as_int().unwrap_or(0) * 2,
        );

        let state = Value::map([("n", 21)]);
        assert_eq!(selector.of_state(&state), 42);
        assert_eq!(selector.of_state(&state), 42);
        assert_eq!(dependency_calls.get(), 1);
    }

    #[test]
    fn test_extra_arguments_are_compared() {
        let selector = create_selector(
            vec![
                selector_fn(|args| args[0].get(args[1].as_str().unwrap_or_default()).clone()),
                selector_fn(|args| crate::value::arg(args, 2).clone()),
            ],
            |deps| format!("{}/{}", deps[0], deps[1]),
        );

        let state = Value::map([("a", 1), ("b", 2)]);
        assert_eq!(selector.select(&[state.clone(), "a".into()]), "1/null");
        assert_eq!(selector.select(&[state.clone(), "b".into()]), "2/null");
        assert_eq!(selector.select(&[state.clone(), "b".into(), 7.into()]), "2/7");
        // Dropping a trailing argument is a change as well
        assert_eq!(selector.select(&[state, "b".into()]), "2/null");
    }

    #[test]
    fn test_dependencies_run_last_to_first() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (order.clone(), order.clone());
        let selector = create_selector(
            vec![
                state_selector(move |_| {
                    a.borrow_mut().push(0);
                    Value::Null
                }),
                state_selector(move |_| {
                    b.borrow_mut().push(1);
                    Value::Int(1)
                }),
            ],
            |deps| deps.len(),
        );

        assert_eq!(selector.of_state(&Value::Null), 2);
        assert_eq!(*order.borrow(), vec![1, 0]);
    }

    #[test]
    fn test_as_selector_with_observe() {
        let scheduler = Rc::new(TickScheduler::new());
        let producer = Producer::builder(todos(Value::list(Vec::<Value>::new()), "all"))
            .action("add", |state, args| {
                Ok(state.with("items", state.get("items").push(args[0].clone())))
            })
            .action("filter", |state, args| Ok(state.with("filter", args[0].clone())))
            .scheduler(scheduler.clone())
            .build();

        let calls = Rc::new(Cell::new(0));
        let select_done = done_items(calls);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        producer
            .observe(select_done.as_selector(), move |_, _| h.set(h.get() + 1))
            .unwrap();

        producer.dispatch("filter", &[Value::from("done")]).unwrap();
        scheduler.run_pending();
        assert_eq!(hits.get(), 0);

        producer
            .dispatch("add", &[Value::map([("done", true)])])
            .unwrap();
        scheduler.run_pending();
        assert_eq!(hits.get(), 1);
    }
}
