//! Reflex Broadcast - Sharing producer state between a server and its clients
//!
//! The server applies a [`Broadcaster`]'s middleware to its root producer.
//! Clients apply a [`BroadcastReceiver`]'s middleware to theirs. The protocol
//! has two messages:
//!
//! - **State request** (client → server, once per connection): the server
//!   answers with the shared slices of its state and starts broadcasting to
//!   the player ([`Broadcaster::player_requested_state`]).
//! - **Action batch** (server → clients, once per tick): every shared action
//!   dispatched during the tick, with its arguments, in dispatch order. Clients
//!   replay it with [`BroadcastReceiver::dispatch`].
//!
//! The transport is left to the caller: a `broadcast` callback on the server
//! and a `request_state` future on the client. [`codec`] turns both payloads
//! into bytes.

mod action;
mod broadcaster;
pub mod codec;
mod error;
mod receiver;

pub use action::{ActionFilter, BroadcastAction, PlayerId};
pub use broadcaster::{
    create_broadcaster, BroadcastFn, Broadcaster, BroadcasterMiddleware, BroadcasterOptions,
};
pub use codec::Packet;
pub use error::{Error, Result};
pub use receiver::{
    create_broadcast_receiver, BroadcastReceiver, ReceiverMiddleware, ReceiverOptions,
    RequestStateFn, StateRequest,
};
