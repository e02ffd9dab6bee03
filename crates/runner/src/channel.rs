//! Addon communication channel
//!
//! Story modules may notify addons while they register stories. Outside an
//! interactive story browser nothing listens, so the loader installs a fresh
//! in-memory channel for every catalog load and the events are only logged.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One event emitted by a story module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddonEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Event sink shared between the loader and the evaluated modules.
///
/// Clones share the same event log.
#[derive(Debug, Clone, Default)]
pub struct AddonChannel {
    events: Arc<Mutex<Vec<AddonEvent>>>,
}

impl AddonChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: &str, payload: serde_json::Value) {
        debug!("addon event '{}'", event);
        self.events.lock().push(AddonEvent {
            event: event.to_string(),
            payload,
        });
    }

    /// Events emitted so far, in emission order
    pub fn events(&self) -> Vec<AddonEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_events() {
        let channel = AddonChannel::new();
        let handle = channel.clone();
        handle.emit("knobs/register", serde_json::json!({"name": "label"}));

        assert_eq!(channel.len(), 1);
        assert_eq!(channel.events()[0].event, "knobs/register");
    }

    #[test]
    fn test_new_channels_are_independent() {
        let first = AddonChannel::new();
        first.emit("a", serde_json::Value::Null);
        assert!(AddonChannel::new().is_empty());
    }
}
