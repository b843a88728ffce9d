//! Server half of the sync protocol
//!
//! The broadcaster middleware sits on the server's root producer. Every
//! dispatch of a shared action takes its place in the batch when it starts and
//! is filled in once it succeeds, so actions dispatched from inside another
//! action come after it. Once per tick the recorded batch is handed to the
//! `broadcast` callback together with the players that have received their
//! initial state.
//!
//! ```
//! use indexmap::IndexMap;
//! use reflex_broadcast::{create_broadcaster, BroadcasterOptions, PlayerId};
//! use reflex_core::{combine_producers_with, Producer, TickScheduler, Value};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let scheduler = Rc::new(TickScheduler::new());
//! let counter = Producer::builder(Value::Int(0))
//!     .action("inc", |state, _| Ok(Value::Int(state.try_int()? + 1)))
//!     .scheduler(scheduler.clone())
//!     .build();
//! let mut shared = IndexMap::new();
//! shared.insert("counter".to_string(), counter);
//!
//! let sent = Rc::new(RefCell::new(Vec::new()));
//! let sink = sent.clone();
//! let broadcaster = create_broadcaster(BroadcasterOptions {
//!     producers: &shared,
//!     broadcast: Box::new(move |players, actions| {
//!         sink.borrow_mut().push((players.to_vec(), actions.to_vec()));
//!     }),
//! });
//!
//! let root = combine_producers_with(shared, scheduler.clone());
//! root.apply_middleware(&[&broadcaster.middleware()]);
//!
//! broadcaster.player_requested_state(PlayerId(1)).unwrap();
//! root.dispatch("inc", &[]).unwrap();
//! root.dispatch("inc", &[]).unwrap();
//! scheduler.run_pending();
//!
//! assert_eq!(sent.borrow().len(), 1);
//! assert_eq!(sent.borrow()[0].1.len(), 2);
//! ```

use crate::{ActionFilter, BroadcastAction, Error, PlayerId, Result};
use reflex_core::{
    Dispatcher, Middleware, Producer, ProducerMap, Scheduler, TaskHandle, Value, WeakProducer,
    Wrap,
};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Transport callback: send `actions` to every player in `players`
pub type BroadcastFn = Box<dyn Fn(&[PlayerId], &[BroadcastAction])>;

/// Options for [`create_broadcaster`]
pub struct BroadcasterOptions<'a> {
    /// The producers whose state and actions are shared with clients
    pub producers: &'a ProducerMap,
    /// Called once per tick with the ready players and the batched actions
    pub broadcast: BroadcastFn,
}

/// A batch entry, empty while its action is still running
struct Slot {
    id: u64,
    action: Option<BroadcastAction>,
}

struct State {
    filter: ActionFilter,
    broadcast: BroadcastFn,
    players: RefCell<Vec<PlayerId>>,
    pool: RefCell<Vec<Slot>>,
    next_slot: Cell<u64>,
    producer: RefCell<Option<WeakProducer>>,
    next_broadcast: RefCell<Option<TaskHandle>>,
}

impl State {
    fn reserve(&self) -> u64 {
        let id = self.next_slot.get();
        self.next_slot.set(id + 1);
        self.pool.borrow_mut().push(Slot { id, action: None });
        id
    }

    fn fill(&self, id: u64, action: BroadcastAction) {
        if let Some(slot) = self.pool.borrow_mut().iter_mut().find(|slot| slot.id == id) {
            slot.action = Some(action);
        }
    }

    fn release(&self, id: u64) {
        self.pool.borrow_mut().retain(|slot| slot.id != id);
    }

    fn schedule_broadcast(self: &Rc<Self>, scheduler: &Rc<dyn Scheduler>) {
        if self.next_broadcast.borrow().is_some() {
            return;
        }

        let this: Weak<State> = Rc::downgrade(self);
        let handle = scheduler.defer(Box::new(move || {
            if let Some(state) = this.upgrade() {
                state.next_broadcast.borrow_mut().take();
                state.send();
            }
        }));
        *self.next_broadcast.borrow_mut() = Some(handle);
    }

    fn cancel_broadcast(&self) {
        if let Some(handle) = self.next_broadcast.borrow_mut().take() {
            handle.cancel();
        }
    }

    /// Send every finished action up to the first one still running
    fn send(&self) {
        let actions: Vec<BroadcastAction> = {
            let mut pool = self.pool.borrow_mut();
            let finished = pool
                .iter()
                .position(|slot| slot.action.is_none())
                .unwrap_or(pool.len());
            pool.drain(..finished).filter_map(|slot| slot.action).collect()
        };
        if actions.is_empty() {
            return;
        }
        let players = self.players.borrow().clone();
        tracing::debug!(
            players = players.len(),
            actions = actions.len(),
            "broadcasting actions"
        );
        (self.broadcast)(&players, &actions);
    }
}

/// Shares a producer tree's actions with connected players
///
/// Clones refer to the same broadcaster.
#[derive(Clone)]
pub struct Broadcaster {
    state: Rc<State>,
}

/// Create a broadcaster tracking the producers in `options`
pub fn create_broadcaster(options: BroadcasterOptions<'_>) -> Broadcaster {
    let filter = ActionFilter::from_producers(options.producers);
    tracing::debug!(
        slices = options.producers.len(),
        actions = filter.actions().count(),
        "broadcaster created"
    );

    Broadcaster {
        state: Rc::new(State {
            filter,
            broadcast: options.broadcast,
            players: RefCell::new(Vec::new()),
            pool: RefCell::new(Vec::new()),
            next_slot: Cell::new(0),
            producer: RefCell::new(None),
            next_broadcast: RefCell::new(None),
        }),
    }
}

impl Broadcaster {
    /// The middleware to apply to the root producer
    pub fn middleware(&self) -> BroadcasterMiddleware {
        BroadcasterMiddleware {
            state: self.state.clone(),
        }
    }

    /// Register `player` and return the shared slices of the current state
    ///
    /// Actions still waiting for this tick's broadcast are already part of the
    /// returned state, so they are sent to the existing players first and the
    /// new player only receives what is dispatched afterwards.
    pub fn player_requested_state(&self, player: PlayerId) -> Result<Value> {
        if self.state.players.borrow().contains(&player) {
            return Err(Error::DuplicateStateRequest(player));
        }
        let producer = self.producer().ok_or(Error::NotAttached)?;

        self.flush();
        self.state.players.borrow_mut().push(player);
        tracing::debug!(player = %player, "player requested state");

        Ok(self.state.filter.shared_state(&producer.get_state()))
    }

    /// Stop broadcasting to `player`
    ///
    /// Returns whether the player was registered. A removed player may request
    /// state again.
    pub fn player_removed(&self, player: PlayerId) -> bool {
        let mut players = self.state.players.borrow_mut();
        match players.iter().position(|p| *p == player) {
            Some(index) => {
                players.swap_remove(index);
                tracing::debug!(player = %player, "player removed");
                true
            }
            None => false,
        }
    }

    /// Players that currently receive broadcasts
    pub fn ready_players(&self) -> Vec<PlayerId> {
        self.state.players.borrow().clone()
    }

    /// Number of actions waiting for the next broadcast
    pub fn pending_actions(&self) -> usize {
        self.state
            .pool
            .borrow()
            .iter()
            .filter(|slot| slot.action.is_some())
            .count()
    }

    pub fn filter(&self) -> &ActionFilter {
        &self.state.filter
    }

    /// Broadcast the pending actions now instead of on the next tick
    pub fn flush(&self) {
        self.state.cancel_broadcast();
        self.state.send();
    }

    fn producer(&self) -> Option<Producer> {
        self.state
            .producer
            .borrow()
            .as_ref()
            .and_then(WeakProducer::upgrade)
    }
}

/// Middleware returned by [`Broadcaster::middleware`]
pub struct BroadcasterMiddleware {
    state: Rc<State>,
}

impl Middleware for BroadcasterMiddleware {
    fn setup(&self, producer: &Producer) -> Wrap {
        *self.state.producer.borrow_mut() = Some(producer.downgrade());
        let scheduler = producer.scheduler();
        let state = self.state.clone();

        Box::new(move |next: Dispatcher, name: &str| {
            if !state.filter.contains(name) {
                return next;
            }

            let state = state.clone();
            let scheduler = scheduler.clone();
            let name = name.to_string();
            Dispatcher::new(move |args| {
                let id = state.reserve();
                match next.call(args) {
                    Ok(result) => {
                        state.fill(id, BroadcastAction::new(name.clone(), args.to_vec()));
                        state.schedule_broadcast(&scheduler);
                        Ok(result)
                    }
                    Err(e) => {
                        state.release(id);
                        Err(e)
                    }
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use reflex_core::{combine_producers_with, TickScheduler};

    type Sent = Rc<RefCell<Vec<(Vec<PlayerId>, Vec<BroadcastAction>)>>>;

    struct Server {
        scheduler: Rc<TickScheduler>,
        root: Producer,
        broadcaster: Broadcaster,
        sent: Sent,
    }

    fn server() -> Server {
        server_with(&[])
    }

    /// A server with `inner` applied inside the broadcaster's middleware
    fn server_with(inner: &[&dyn Middleware]) -> Server {
        let scheduler = Rc::new(TickScheduler::new());
        let counter = Producer::builder(Value::Int(0))
            .action("inc", |state, _| Ok(Value::Int(state.try_int()? + 1)))
            .action("add", |state, args| {
                Ok(Value::Int(state.try_int()? + args[0].try_int()?))
            })
            .scheduler(scheduler.clone())
            .build();
        let secrets = Producer::builder(Value::Int(0))
            .action("audit", |state, _| Ok(Value::Int(state.try_int()? + 1)))
            .scheduler(scheduler.clone())
            .build();

        let mut shared = IndexMap::new();
        shared.insert("counter".to_string(), counter);

        let sent: Sent = Rc::default();
        let sink = sent.clone();
        let broadcaster = create_broadcaster(BroadcasterOptions {
            producers: &shared,
            broadcast: Box::new(move |players, actions| {
                sink.borrow_mut().push((players.to_vec(), actions.to_vec()));
            }),
        });

        let mut all = shared;
        all.insert("secrets".to_string(), secrets);
        let root = combine_producers_with(all, scheduler.clone());
        let middleware = broadcaster.middleware();
        let mut chain: Vec<&dyn Middleware> = Vec::new();
        chain.push(&middleware);
        chain.extend_from_slice(inner);
        root.apply_middleware(&chain);

        Server {
            scheduler,
            root,
            broadcaster,
            sent,
        }
    }

    #[test]
    fn test_state_request_before_attach_fails() {
        let producers = ProducerMap::new();
        let broadcaster = create_broadcaster(BroadcasterOptions {
            producers: &producers,
            broadcast: Box::new(|_, _| {}),
        });
        assert_eq!(
            broadcaster.player_requested_state(PlayerId(1)),
            Err(Error::NotAttached)
        );
        assert!(broadcaster.ready_players().is_empty());
    }

    #[test]
    fn test_second_state_request_fails() {
        let server = server();
        let a = PlayerId(1);

        let state = server.broadcaster.player_requested_state(a).unwrap();
        assert_eq!(state, Value::map([("counter", 0)]));
        assert_eq!(
            server.broadcaster.player_requested_state(a),
            Err(Error::DuplicateStateRequest(a))
        );
        assert_eq!(server.broadcaster.ready_players(), vec![a]);
    }

    #[test]
    fn test_one_broadcast_per_tick() {
        let server = server();
        let a = PlayerId(1);
        server.broadcaster.player_requested_state(a).unwrap();

        server.root.dispatch("inc", &[]).unwrap();
        server.root.dispatch("inc", &[]).unwrap();
        server.root.dispatch("inc", &[]).unwrap();
        assert_eq!(server.broadcaster.pending_actions(), 3);
        assert!(server.sent.borrow().is_empty());

        server.scheduler.run_pending();

        let sent = server.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec![a]);
        assert_eq!(sent[0].1, vec![BroadcastAction::new("inc", vec![]); 3]);
        assert_eq!(server.broadcaster.pending_actions(), 0);
    }

    #[test]
    fn test_unshared_actions_are_not_broadcast() {
        let server = server();
        server.broadcaster.player_requested_state(PlayerId(1)).unwrap();

        server.root.dispatch("audit", &[]).unwrap();
        server.scheduler.run_pending();

        assert!(server.sent.borrow().is_empty());
        assert_eq!(server.root.get_state().get("secrets"), &Value::Int(1));
    }

    #[test]
    fn test_arguments_are_recorded_in_order() {
        let server = server();
        server.broadcaster.player_requested_state(PlayerId(1)).unwrap();

        server.root.dispatch("add", &[Value::Int(2)]).unwrap();
        server.root.dispatch("inc", &[]).unwrap();
        server.root.dispatch("add", &[Value::Int(-1)]).unwrap();
        server.scheduler.run_pending();

        let names: Vec<String> = server.sent.borrow()[0]
            .1
            .iter()
            .map(|action| action.to_string())
            .collect();
        assert_eq!(names, vec!["add(2)", "inc()", "add(-1)"]);
    }

    #[test]
    fn test_failed_dispatch_is_not_recorded() {
        let server = server();
        assert!(server.root.dispatch("add", &[Value::from("x")]).is_err());
        assert_eq!(server.broadcaster.pending_actions(), 0);
    }

    #[test]
    fn test_nested_dispatch_is_recorded_after_its_parent() {
        // Every "add" also bumps the counter, and a failing "add" leaves no entry
        let bump = |producer: &Producer| {
            let weak = producer.downgrade();
            move |next: Dispatcher, name: &str| {
                if name != "add" {
                    return next;
                }
                let weak = weak.clone();
                Dispatcher::new(move |args| {
                    let state = next.call(args)?;
                    match weak.upgrade() {
                        Some(producer) => producer.dispatch("inc", &[]),
                        None => Ok(state),
                    }
                })
            }
        };
        let server = server_with(&[&bump]);
        server.broadcaster.player_requested_state(PlayerId(1)).unwrap();

        let root = &server.root;
        root.dispatch("add", &[Value::Int(5)]).unwrap();
        assert!(root.dispatch("add", &[Value::from("x")]).is_err());
        root.dispatch("inc", &[]).unwrap();
        server.scheduler.run_pending();

        let names: Vec<String> = server.sent.borrow()[0]
            .1
            .iter()
            .map(|action| action.to_string())
            .collect();
        assert_eq!(names, vec!["add(5)", "inc()", "inc()"]);
    }

    #[test]
    fn test_removed_player_stops_receiving_and_may_rejoin() {
        let server = server();
        let (a, b) = (PlayerId(1), PlayerId(2));
        server.broadcaster.player_requested_state(a).unwrap();
        server.broadcaster.player_requested_state(b).unwrap();

        assert!(server.broadcaster.player_removed(a));
        assert!(!server.broadcaster.player_removed(a));

        server.root.dispatch("inc", &[]).unwrap();
        server.scheduler.run_pending();
        assert_eq!(server.sent.borrow()[0].0, vec![b]);

        let state = server.broadcaster.player_requested_state(a).unwrap();
        assert_eq!(state.get("counter"), &Value::Int(1));
    }

    #[test]
    fn test_joining_player_does_not_receive_actions_in_its_state() {
        let server = server();
        let (a, b) = (PlayerId(1), PlayerId(2));
        server.broadcaster.player_requested_state(a).unwrap();

        server.root.dispatch("inc", &[]).unwrap();
        let state = server.broadcaster.player_requested_state(b).unwrap();
        assert_eq!(state.get("counter"), &Value::Int(1));
        server.root.dispatch("inc", &[]).unwrap();
        server.scheduler.run_pending();

        let sent = server.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (vec![a], vec![BroadcastAction::new("inc", vec![])]));
        assert_eq!(sent[1], (vec![a, b], vec![BroadcastAction::new("inc", vec![])]));
    }

    #[test]
    fn test_manual_flush_sends_immediately() {
        let server = server();
        server.broadcaster.player_requested_state(PlayerId(1)).unwrap();

        server.root.dispatch("inc", &[]).unwrap();
        server.broadcaster.flush();
        assert_eq!(server.sent.borrow().len(), 1);

        server.scheduler.run_pending();
        assert_eq!(server.sent.borrow().len(), 1);
    }
}
