//! Combining several producers into one
//!
//! The combined producer's state is a map of each child's state under its
//! name. Dispatching `K` on it calls `K` on every child that defines it, with
//! the same arguments, and schedules one flush if any slice changed.
//!
//! The combinator owns its children. It only looks at a child's state during
//! its own dispatch cycle, so a child that is driven from elsewhere (through a
//! handle cloned before combining) falls out of sync with the combined view.

use crate::producer::{Inner, ProducerMap};
use crate::scheduler::{self, Scheduler};
use crate::{Action, ActionMap, Dispatcher, DispatcherMap, Error, Producer, Value, ValueMap};
use std::rc::{Rc, Weak};

/// Combine `producers` on the thread's default scheduler
pub fn combine_producers(producers: ProducerMap) -> Producer {
    combine_producers_with(producers, scheduler::local())
}

/// Combine `producers`, deferring combined flushes to `scheduler`
pub fn combine_producers_with(producers: ProducerMap, scheduler: Rc<dyn Scheduler>) -> Producer {
    let initial = combine_state(&producers);
    let actions = combine_actions(&producers);
    let names: Vec<String> = actions.keys().cloned().collect();

    tracing::debug!(
        children = producers.len(),
        actions = names.len(),
        "combining producers"
    );

    Producer::assemble(initial, actions, Some(producers), scheduler, move |this| {
        names
            .into_iter()
            .map(|name| {
                let dispatcher = combined_dispatcher(this.clone(), name.clone());
                (name, dispatcher)
            })
            .collect()
    })
}

fn combined_dispatcher(this: Weak<Inner>, name: String) -> Dispatcher {
    Dispatcher::new(move |args| {
        let inner = this.upgrade().ok_or(Error::Destroyed)?;
        let Some(children) = inner.children.as_ref() else {
            return Ok(inner.state());
        };

        let mut changed = false;
        let mut next = ValueMap::with_capacity(children.len());

        for (key, child) in children {
            let current = child.get_state();
            let slice = match child.dispatcher(&name) {
                Some(dispatcher) => dispatcher.call(args)?,
                None => current.clone(),
            };
            changed |= !slice.same(&current);
            next.insert(key.clone(), slice);
        }

        if changed {
            inner.commit(Value::from(next));
        }
        Ok(inner.state())
    })
}

/// `{ name: child.get_state() }` for every child
fn combine_state(producers: &ProducerMap) -> Value {
    Value::map(
        producers
            .iter()
            .map(|(key, producer)| (key.clone(), producer.get_state())),
    )
}

/// Pure counterparts of the combined dispatchers
///
/// Action `K` applies every child's own `K` to that child's slice, which lets
/// a combined producer be combined again or replayed without its children.
fn combine_actions(producers: &ProducerMap) -> ActionMap {
    let mut names: Vec<String> = Vec::new();
    for producer in producers.values() {
        for name in producer.get_dispatchers().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }

    names
        .into_iter()
        .map(|name| {
            let slices: Vec<(String, Action)> = producers
                .iter()
                .filter_map(|(key, producer)| {
                    producer
                        .get_actions()
                        .get(&name)
                        .map(|action| (key.clone(), action.clone()))
                })
                .collect();

            let action = Action::new(move |state, args| {
                let mut next = state.clone();
                let mut changed = false;
                for (key, action) in &slices {
                    let current = state.get(key);
                    let slice = action.apply(current, args)?;
                    if !slice.same(current) {
                        next = next.with(key.clone(), slice);
                        changed = true;
                    }
                }
                Ok(if changed { next } else { state.clone() })
            });
            (name, action)
        })
        .collect()
}

/// Hand the slices of `state` to the children and rebuild the combined state
pub(crate) fn distribute(children: &ProducerMap, state: &Value) -> Value {
    if let Some(map) = state.as_map() {
        for key in map.keys().filter(|key| !children.contains_key(*key)) {
            tracing::warn!(key = %key, "ignoring state for unknown producer");
        }
    }

    let Some(slices) = state.as_map() else {
        return combine_state(children);
    };
    for (key, child) in children {
        // A missing key keeps the child's state; a present `Null` replaces it
        let Some(slice) = slices.get(key) else {
            continue;
        };
        if !slice.same(&child.get_state()) {
            child.set_state(slice.clone());
        }
    }
    combine_state(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TickScheduler;
    use indexmap::IndexMap;
    use std::cell::RefCell;

    fn tick_producer(scheduler: &Rc<TickScheduler>, step: i64) -> Producer {
        Producer::builder(Value::Int(0))
            .action("tick", move |state, _| Ok(Value::Int(state.try_int()? + step)))
            .action("reset", |_, _| Ok(Value::Int(0)))
            .scheduler(scheduler.clone())
            .build()
    }

    fn fixture(scheduler: &Rc<TickScheduler>) -> Producer {
        let label = Producer::builder(Value::from("idle"))
            .action("rename", |_, args| Ok(args[0].clone()))
            .scheduler(scheduler.clone())
            .build();

        let mut producers = IndexMap::new();
        producers.insert("foo".to_string(), tick_producer(scheduler, 1));
        producers.insert("bar".to_string(), tick_producer(scheduler, 10));
        producers.insert("label".to_string(), label);
        combine_producers_with(producers, scheduler.clone())
    }

    #[test]
    fn test_initial_state_is_map_of_children() {
        let scheduler = Rc::new(TickScheduler::new());
        let combined = fixture(&scheduler);

        assert_eq!(
            combined.get_state(),
            Value::map([
                ("foo", Value::Int(0)),
                ("bar", Value::Int(0)),
                ("label", Value::from("idle")),
            ])
        );
        let names: Vec<_> = combined.get_dispatchers().keys().cloned().collect();
        assert_eq!(names, vec!["tick", "reset", "rename"]);
    }

    #[test]
    fn test_dispatch_reaches_every_child_that_defines_it() {
        let scheduler = Rc::new(TickScheduler::new());
        let combined = fixture(&scheduler);
        let before = combined.get_state();

        let state = combined.dispatch("tick", &[]).unwrap();
        assert_eq!(state.get("foo"), &Value::Int(1));
        assert_eq!(state.get("bar"), &Value::Int(10));
        assert!(state.get("label").same(before.get("label")));
    }

    #[test]
    fn test_one_combined_flush_per_tick() {
        let scheduler = Rc::new(TickScheduler::new());
        let combined = fixture(&scheduler);
        let calls = Rc::new(RefCell::new(Vec::new()));

        let sink = calls.clone();
        combined
            .subscribe(move |state, prev| sink.borrow_mut().push((state.clone(), prev.clone())))
            .unwrap();

        combined.dispatch("tick", &[]).unwrap();
        combined.dispatch("tick", &[]).unwrap();
        combined.dispatch("rename", &[Value::from("busy")]).unwrap();
        scheduler.run_pending();

        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.get("foo"), &Value::Int(2));
        assert_eq!(calls[0].0.get("bar"), &Value::Int(20));
        assert_eq!(calls[0].0.get("label"), &Value::from("busy"));
        assert_eq!(calls[0].1.get("foo"), &Value::Int(0));
    }

    #[test]
    fn test_unchanged_children_keep_combined_state() {
        let scheduler = Rc::new(TickScheduler::new());
        let combined = fixture(&scheduler);
        let before = combined.get_state();

        let after = combined.dispatch("reset", &[]).unwrap();
        assert!(after.same(&before));
        scheduler.run_pending();

        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        combined.subscribe(move |_, _| *h.borrow_mut() += 1).unwrap();
        combined.flush();
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn test_set_state_reaches_children() {
        let scheduler = Rc::new(TickScheduler::new());
        let combined = fixture(&scheduler);

        combined.set_state(Value::map([("foo", 5)]));
        let state = combined.dispatch("tick", &[]).unwrap();

        assert_eq!(state.get("foo"), &Value::Int(6));
        assert_eq!(state.get("bar"), &Value::Int(10));
    }

    #[test]
    fn test_null_slice_replaces_child_state() {
        let scheduler = Rc::new(TickScheduler::new());
        let combined = fixture(&scheduler);

        combined.set_state(Value::map([("label", Value::Null)]));
        let state = combined.dispatch("tick", &[]).unwrap();

        assert_eq!(state.get("label"), &Value::Null);
        assert_eq!(state.get("foo"), &Value::Int(1));
    }

    #[test]
    fn test_every_child_receives_the_same_arguments() {
        let scheduler = Rc::new(TickScheduler::new());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let child = |name: &'static str, apply: fn(i64, i64) -> i64| {
            let seen = seen.clone();
            Producer::builder(Value::Int(2))
                .action("add", move |state, args| {
                    seen.borrow_mut().push((name, args.to_vec()));
                    Ok(Value::Int(apply(state.try_int()?, args[0].try_int()?)))
                })
                .scheduler(scheduler.clone())
                .build()
        };

        let mut producers = IndexMap::new();
        producers.insert("sum".to_string(), child("sum", |a, b| a + b));
        producers.insert("product".to_string(), child("product", |a, b| a * b));
        let combined = combine_producers_with(producers, scheduler.clone());

        let state = combined.dispatch("add", &[Value::Int(5)]).unwrap();
        assert_eq!(state.get("sum"), &Value::Int(7));
        assert_eq!(state.get("product"), &Value::Int(10));
        assert_eq!(
            *seen.borrow(),
            vec![
                ("sum", vec![Value::Int(5)]),
                ("product", vec![Value::Int(5)]),
            ]
        );
    }

    #[test]
    fn test_combined_actions_are_pure() {
        let scheduler = Rc::new(TickScheduler::new());
        let combined = fixture(&scheduler);
        let state = combined.get_state();

        let tick = combined.get_actions().get("tick").unwrap();
        let next = tick.apply(&state, &[]).unwrap();
        assert_eq!(next.get("foo"), &Value::Int(1));
        assert_eq!(next.get("bar"), &Value::Int(10));
        // The producer itself did not move
        assert_eq!(combined.get_state().get("foo"), &Value::Int(0));
    }

    #[test]
    fn test_nested_combination() {
        let scheduler = Rc::new(TickScheduler::new());
        let mut outer = IndexMap::new();
        outer.insert("inner".to_string(), fixture(&scheduler));
        outer.insert("solo".to_string(), tick_producer(&scheduler, 100));
        let root = combine_producers_with(outer, scheduler.clone());

        let state = root.dispatch("tick", &[]).unwrap();
        assert_eq!(state.get("inner").get("bar"), &Value::Int(10));
        assert_eq!(state.get("solo"), &Value::Int(100));
    }
}
