use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Default maximum age for tool-context entries.
pub const DEFAULT_TOOL_CONTEXT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// The raw `tool_use` block as the backend emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRaw {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// What a tool-use id resolves to.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub entity_id: EntityId,
    pub raw: ToolUseRaw,
    inserted_at: Instant,
}

/// `toolUseId → {entityId, raw}`, populated on every `tool_use`
/// content_block_start. The id namespace is generated by the AI backend and
/// assumed globally unique within its operational window.
///
/// Entries are only removed by [`cleanup`] or re-insertion; there is no
/// implicit eviction.
///
/// [`cleanup`]: ToolContextMap::cleanup
#[derive(Debug, Default)]
pub struct ToolContextMap {
    entries: HashMap<String, ToolContext>,
}

impl ToolContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the mapping for `tool_use_id`.
    pub fn insert(&mut self, tool_use_id: impl Into<String>, entity_id: EntityId, raw: ToolUseRaw) {
        self.entries.insert(
            tool_use_id.into(),
            ToolContext {
                entity_id,
                raw,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, tool_use_id: &str) -> Option<&ToolContext> {
        self.entries.get(tool_use_id)
    }

    pub fn remove(&mut self, tool_use_id: &str) -> Option<ToolContext> {
        self.entries.remove(tool_use_id)
    }

    /// Remove entries older than `max_age`; returns how many were dropped.
    pub fn cleanup(&mut self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, ctx| ctx.inserted_at.elapsed() < max_age);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, name: &str) -> ToolUseRaw {
        ToolUseRaw {
            kind: "tool_use".into(),
            id: id.into(),
            name: name.into(),
            input: serde_json::json!({"file_path": "a.rs"}),
        }
    }

    fn conv() -> EntityId {
        EntityId::conversation(1, 1, 1).unwrap()
    }

    #[test]
    fn insert_and_lookup() {
        let mut map = ToolContextMap::new();
        map.insert("toolu_X", conv(), raw("toolu_X", "Edit"));
        let ctx = map.get("toolu_X").unwrap();
        assert_eq!(ctx.entity_id, conv());
        assert_eq!(ctx.raw.name, "Edit");
        assert!(map.get("toolu_Y").is_none());
    }

    #[test]
    fn reinsert_replaces() {
        let mut map = ToolContextMap::new();
        map.insert("toolu_X", conv(), raw("toolu_X", "Edit"));
        map.insert("toolu_X", conv(), raw("toolu_X", "Write"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("toolu_X").unwrap().raw.name, "Write");
    }

    #[test]
    fn cleanup_honours_max_age() {
        let mut map = ToolContextMap::new();
        map.insert("toolu_X", conv(), raw("toolu_X", "Edit"));
        assert_eq!(map.cleanup(Duration::from_secs(60)), 0);
        assert_eq!(map.len(), 1);
        assert_eq!(map.cleanup(Duration::ZERO), 1);
        assert!(map.is_empty());
    }
}
