use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Length of the opaque share id.
pub const SHARE_ID_LEN: usize = 12;

/// Grants read-only viewer access to one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub share_id: String,
    pub conversation_id: EntityId,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(default)]
    pub access_count: u64,
}

/// Share records owned by the workstation, persisted as one JSON document,
/// consulted by the relay to authorise viewer connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareStore {
    #[serde(default)]
    pub shares: Vec<ShareRecord>,
}

impl ShareStore {
    /// Create a share for `conversation_id`. An existing share for the same
    /// conversation is reused rather than duplicated.
    pub fn create(&mut self, conversation_id: EntityId) -> &ShareRecord {
        if let Some(idx) = self
            .shares
            .iter()
            .position(|s| s.conversation_id == conversation_id)
        {
            return &self.shares[idx];
        }
        self.shares.push(ShareRecord {
            share_id: new_share_id(),
            conversation_id,
            created_at: Utc::now().timestamp_millis(),
            access_count: 0,
        });
        self.shares.last().expect("just pushed")
    }

    /// Resolve a share id to its conversation, counting the access.
    pub fn validate(&mut self, share_id: &str) -> Option<EntityId> {
        let record = self.shares.iter_mut().find(|s| s.share_id == share_id)?;
        record.access_count += 1;
        Some(record.conversation_id)
    }

    /// Read-only resolution, for callers that hold a snapshot.
    pub fn lookup(&self, share_id: &str) -> Option<EntityId> {
        self.shares
            .iter()
            .find(|s| s.share_id == share_id)
            .map(|s| s.conversation_id)
    }

    pub fn revoke(&mut self, share_id: &str) -> bool {
        let before = self.shares.len();
        self.shares.retain(|s| s.share_id != share_id);
        self.shares.len() != before
    }
}

fn new_share_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> EntityId {
        EntityId::conversation(1, 1, 42).unwrap()
    }

    #[test]
    fn created_ids_are_twelve_chars() {
        let mut store = ShareStore::default();
        let id = store.create(conv()).share_id.clone();
        assert_eq!(id.len(), SHARE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn create_is_idempotent_per_conversation() {
        let mut store = ShareStore::default();
        let first = store.create(conv()).share_id.clone();
        let second = store.create(conv()).share_id.clone();
        assert_eq!(first, second);
        assert_eq!(store.shares.len(), 1);
    }

    #[test]
    fn validate_counts_accesses() {
        let mut store = ShareStore::default();
        let id = store.create(conv()).share_id.clone();
        assert_eq!(store.validate(&id), Some(conv()));
        assert_eq!(store.validate(&id), Some(conv()));
        assert_eq!(store.shares[0].access_count, 2);
        assert_eq!(store.validate("nope"), None);
    }

    #[test]
    fn revoke_removes_share() {
        let mut store = ShareStore::default();
        let id = store.create(conv()).share_id.clone();
        assert!(store.revoke(&id));
        assert!(!store.revoke(&id));
        assert_eq!(store.lookup(&id), None);
    }
}
