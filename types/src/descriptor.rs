//! Provider-state descriptors.
//!
//! The verification engine posts one of two payload shapes to the state-setup
//! path. The legacy shape carries only a list of state names:
//!
//! ```json
//! { "states": ["user exists", "order 42 is pending"] }
//! ```
//!
//! The versioned shape names a single state together with an action and
//! parameters:
//!
//! ```json
//! { "action": "setup", "state": "user exists", "params": { "id": 1 } }
//! ```
//!
//! [`StateDescriptor::classify`] decides which shape a decoded payload is. It
//! never fails: anything it cannot make sense of describes no states.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JsonMap;

/// Whether a versioned descriptor asks for a state to be set up or torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Setup,
    Teardown,
}

impl StateAction {
    /// Parse the wire value. Only `"setup"` means setup; every other value is
    /// treated as a teardown.
    pub fn from_wire(value: &str) -> Self {
        if value == "setup" {
            Self::Setup
        } else {
            Self::Teardown
        }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Teardown => "teardown",
        }
    }
}

/// A classified state-setup payload.
#[derive(Clone, Debug, PartialEq)]
pub enum StateDescriptor {
    /// `{ action, state, params }`: one state, with action semantics.
    Versioned {
        action: StateAction,
        state: String,
        params: JsonMap,
    },
    /// `{ states: [...] }`: any number of states, no arguments.
    Legacy { states: Vec<String> },
    /// The payload names no states.
    Empty,
}

impl StateDescriptor {
    /// Classify a decoded JSON payload.
    ///
    /// A defined (non-null) `action` field selects the versioned shape, even if
    /// `states` is also present. Otherwise a defined `states` field selects the
    /// legacy shape. Everything else is [`StateDescriptor::Empty`].
    pub fn classify(payload: &Value) -> Self {
        let Some(object) = payload.as_object() else {
            return Self::Empty;
        };

        if let Some(action) = defined(object.get("action")) {
            let action = action
                .as_str()
                .map(StateAction::from_wire)
                .unwrap_or(StateAction::Teardown);
            let state = object
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let params = object
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            return Self::Versioned {
                action,
                state,
                params,
            };
        }

        if let Some(states) = defined(object.get("states")) {
            // Non-string entries cannot name a handler and are dropped.
            let states = match states {
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                Value::String(single) => vec![single.clone()],
                _ => Vec::new(),
            };
            return Self::Legacy { states };
        }

        Self::Empty
    }

    /// Classify a raw request body. Bodies that are empty or not valid JSON
    /// describe no states.
    pub fn from_body(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::Empty;
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(payload) => Self::classify(&payload),
            Err(_) => Self::Empty,
        }
    }

    /// Whether this descriptor asks for states to be established.
    ///
    /// Legacy descriptors have no action and always mean setup.
    pub fn is_setup(&self) -> bool {
        match self {
            Self::Versioned { action, .. } => action.is_setup(),
            Self::Legacy { .. } => true,
            Self::Empty => false,
        }
    }

    /// Whether this is a versioned teardown request.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            Self::Versioned {
                action: StateAction::Teardown,
                ..
            }
        )
    }

    /// State names referenced by this descriptor, in request order.
    pub fn state_names(&self) -> Vec<&str> {
        match self {
            Self::Versioned { state, .. } => vec![state.as_str()],
            Self::Legacy { states } => states.iter().map(String::as_str).collect(),
            Self::Empty => Vec::new(),
        }
    }
}

fn defined(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}
