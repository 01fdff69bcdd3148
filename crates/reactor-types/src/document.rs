//! The mutation shape that flows from the (out-of-scope) CRUD layer into the
//! reaction dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three mutation kinds a subscription can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Create,
    Update,
    Delete,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Create => "create",
            Event::Update => "update",
            Event::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Event::Create),
            "update" => Ok(Event::Update),
            "delete" => Ok(Event::Delete),
            other => Err(format!("unknown event `{other}`")),
        }
    }
}

/// A single document mutation observed at the CRUD layer (out of scope
/// itself — this is the boundary type C9 consumes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub collection: String,
    pub event: Event,
    /// The document after the mutation. Present for create/update, absent
    /// for delete.
    #[serde(default)]
    pub new: Option<Value>,
    /// The document before the mutation. Present for update/delete, absent
    /// for create.
    #[serde(default)]
    pub old: Option<Value>,
}

impl Mutation {
    pub fn new_create(collection: impl Into<String>, document: Value) -> Self {
        Self {
            collection: collection.into(),
            event: Event::Create,
            new: Some(document),
            old: None,
        }
    }

    pub fn new_update(collection: impl Into<String>, new: Value, old: Value) -> Self {
        Self {
            collection: collection.into(),
            event: Event::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn new_delete(collection: impl Into<String>, old: Value) -> Self {
        Self {
            collection: collection.into(),
            event: Event::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// The document a subscription's filter evaluates against: `new` for
    /// create/update, `old` for delete, per spec.md §4.8 item 2.
    pub fn operand(&self) -> Option<&Value> {
        match self.event {
            Event::Create | Event::Update => self.new.as_ref(),
            Event::Delete => self.old.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_picks_new_for_create_and_update() {
        let m = Mutation::new_create("orders", serde_json::json!({"a": 1}));
        assert_eq!(m.operand(), Some(&serde_json::json!({"a": 1})));

        let m = Mutation::new_update(
            "orders",
            serde_json::json!({"a": 2}),
            serde_json::json!({"a": 1}),
        );
        assert_eq!(m.operand(), Some(&serde_json::json!({"a": 2})));
    }

    #[test]
    fn operand_picks_old_for_delete() {
        let m = Mutation::new_delete("orders", serde_json::json!({"a": 1}));
        assert_eq!(m.operand(), Some(&serde_json::json!({"a": 1})));
    }

    #[test]
    fn event_round_trips_through_str() {
        for e in [Event::Create, Event::Update, Event::Delete] {
            let s = e.to_string();
            let parsed: Event = s.parse().unwrap();
            assert_eq!(parsed, e);
        }
    }

    #[test]
    fn event_rejects_unknown() {
        assert!("archive".parse::<Event>().is_err());
    }
}
