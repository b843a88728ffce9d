//! Logger middleware - Traces every dispatch
//!
//! Emits an `info` event naming the action and its arguments before the call
//! and, when enabled, a `debug` event with the resulting state afterwards.
//! Output goes through `tracing`, so nothing is printed unless the host
//! installs a subscriber.

use crate::middleware::{Middleware, Wrap};
use crate::{Dispatcher, Error, Producer, Result, Value};
use serde::{Deserialize, Serialize};

/// Configuration for [`LoggerMiddleware`]
///
/// # Example
///
/// ```
/// use reflex_core::LoggerConfig;
///
/// let config = LoggerConfig::from_ron("(log_state: false)").unwrap();
/// assert!(!config.log_state);
/// assert_eq!(config.max_state_chars, None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Log the state produced by each dispatch
    pub log_state: bool,
    /// Truncate logged states to this many characters
    pub max_state_chars: Option<usize>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_state: true,
            max_state_chars: None,
        }
    }
}

impl LoggerConfig {
    /// Parse a configuration from RON
    pub fn from_ron(source: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Middleware that traces dispatches
#[derive(Debug, Clone, Default)]
pub struct LoggerMiddleware {
    config: LoggerConfig,
}

impl LoggerMiddleware {
    pub fn new(config: LoggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }
}

impl Middleware for LoggerMiddleware {
    fn setup(&self, _producer: &Producer) -> Wrap {
        let config = self.config.clone();
        Box::new(move |next: Dispatcher, name: &str| {
            let config = config.clone();
            let name = name.to_string();
            Dispatcher::new(move |args| {
                tracing::info!("dispatching {}", describe_call(&name, args));
                let state = next.call(args)?;
                if config.log_state {
                    tracing::debug!(
                        action = %name,
                        state = %truncate(state.to_string(), config.max_state_chars),
                        "new state"
                    );
                }
                Ok(state)
            })
        })
    }
}

/// `name(arg, arg)`
pub(crate) fn describe_call(name: &str, args: &[Value]) -> String {
    let args: Vec<String> = args.iter().map(Value::to_string).collect();
    format!("{}({})", name, args.join(", "))
}

fn truncate(mut text: String, max: Option<usize>) -> String {
    if let Some(max) = max {
        if let Some((index, _)) = text.char_indices().nth(max) {
            text.truncate(index);
            text.push_str("...");
        }
    }
    text
}
