//! Producers used by both the server and the clients

use indexmap::IndexMap;
use reflex_core::{Producer, ProducerMap, Value};

/// `{ count }`, replicated to every client
pub fn shared_counter() -> Producer {
    let initial = Value::map([("count", 0)]);
    let reset = initial.clone();

    Producer::builder(initial)
        .action("increment_shared", |state, _| {
            Ok(state.with("count", state.get("count").try_int()? + 1))
        })
        .action("decrement_shared", |state, _| {
            Ok(state.with("count", state.get("count").try_int()? - 1))
        })
        .action("multiply_shared", |state, args| {
            let multiplier = reflex_core::required_arg(args, 0)?.try_int()?;
            Ok(state.with("count", state.get("count").try_int()? * multiplier))
        })
        .action("reset_shared", move |_, _| Ok(reset.clone()))
        .build()
}

/// The shared slices, keyed as they appear in the root state
pub fn shared_producers() -> ProducerMap {
    let mut producers = IndexMap::new();
    producers.insert("shared_counter".to_string(), shared_counter());
    producers
}

/// A counter only the server knows about
pub fn server_counter() -> Producer {
    Producer::builder(Value::map([("count", 0)]))
        .action("increment_server", |state, _| {
            Ok(state.with("count", state.get("count").try_int()? + 1))
        })
        .build()
}

/// Client-local preferences, never synced
pub fn client_settings() -> Producer {
    Producer::builder(Value::map([("show_counter", true)]))
        .action("toggle_counter", |state, _| {
            let shown = state.get("show_counter").as_bool().unwrap_or(true);
            Ok(state.with("show_counter", !shown))
        })
        .build()
}
