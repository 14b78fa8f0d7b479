use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fabric_core::error::Result;
use fabric_core::io::atomic_write;
use fabric_core::share::ShareStore;
use fabric_core::workspace::WorkspaceStore;

// ─── Persistence capability ───────────────────────────────────────────────

/// Durable storage for workstation state. The engine performs write-through
/// after every state-mutating event.
pub trait Persistence: Send + Sync {
    fn load_workspace_store(&self) -> Result<Option<WorkspaceStore>>;
    fn save_workspace_store(&self, store: &WorkspaceStore) -> Result<()>;

    fn load_message_session(&self, session_id: &str) -> Result<Option<serde_json::Value>>;
    fn save_message_session(&self, session_id: &str, data: &serde_json::Value) -> Result<()>;
    fn delete_message_session(&self, session_id: &str) -> Result<()>;
    fn list_message_sessions(&self) -> Result<Vec<String>>;

    fn load_share_store(&self) -> Result<Option<ShareStore>>;
    fn save_share_store(&self, store: &ShareStore) -> Result<()>;

    fn load_last_account(&self) -> Result<Option<serde_json::Value>>;
    fn save_last_account(&self, data: &serde_json::Value) -> Result<()>;
}

// ─── FsPersistence ────────────────────────────────────────────────────────

/// JSON documents under a data directory:
///
/// ```text
/// <root>/workspaces.json
/// <root>/sessions/<sessionId>.json
/// <root>/shares.json
/// <root>/last-account.json
/// ```
///
/// Parent directories are created lazily at every write (folders may be
/// removed at runtime). Writes are serialised per key; reads take no lock
/// and see either the old or the new document thanks to atomic renames.
pub struct FsPersistence {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsPersistence {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks.entry(key.to_string()).or_default().clone()
    }

    fn write_json(&self, key: &str, path: &Path, value: &impl serde::Serialize) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        let lock = self.key_lock(key);
        let _guard = lock.lock().expect("key lock poisoned");
        atomic_write(path, &data)
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{session_id}.json"))
    }
}

impl Persistence for FsPersistence {
    fn load_workspace_store(&self) -> Result<Option<WorkspaceStore>> {
        self.read_json(&self.root.join("workspaces.json"))
    }

    fn save_workspace_store(&self, store: &WorkspaceStore) -> Result<()> {
        self.write_json("workspaces", &self.root.join("workspaces.json"), store)
    }

    fn load_message_session(&self, session_id: &str) -> Result<Option<serde_json::Value>> {
        self.read_json(&self.session_path(session_id))
    }

    fn save_message_session(&self, session_id: &str, data: &serde_json::Value) -> Result<()> {
        self.write_json(
            &format!("session:{session_id}"),
            &self.session_path(session_id),
            data,
        )
    }

    fn delete_message_session(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_message_sessions(&self) -> Result<Vec<String>> {
        let dir = self.root.join("sessions");
        let mut sessions = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let name = entry?.file_name();
            if let Some(id) = name.to_string_lossy().strip_suffix(".json") {
                sessions.push(id.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    fn load_share_store(&self) -> Result<Option<ShareStore>> {
        self.read_json(&self.root.join("shares.json"))
    }

    fn save_share_store(&self, store: &ShareStore) -> Result<()> {
        self.write_json("shares", &self.root.join("shares.json"), store)
    }

    fn load_last_account(&self) -> Result<Option<serde_json::Value>> {
        self.read_json(&self.root.join("last-account.json"))
    }

    fn save_last_account(&self, data: &serde_json::Value) -> Result<()> {
        self.write_json("last-account", &self.root.join("last-account.json"), data)
    }
}

// ─── MemoryPersistence ────────────────────────────────────────────────────

/// In-memory persistence for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryPersistence {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    workspaces: Option<WorkspaceStore>,
    sessions: HashMap<String, serde_json::Value>,
    shares: Option<ShareStore>,
    last_account: Option<serde_json::Value>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn load_workspace_store(&self) -> Result<Option<WorkspaceStore>> {
        Ok(self.inner.lock().expect("poisoned").workspaces.clone())
    }

    fn save_workspace_store(&self, store: &WorkspaceStore) -> Result<()> {
        self.inner.lock().expect("poisoned").workspaces = Some(store.clone());
        Ok(())
    }

    fn load_message_session(&self, session_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .inner
            .lock()
            .expect("poisoned")
            .sessions
            .get(session_id)
            .cloned())
    }

    fn save_message_session(&self, session_id: &str, data: &serde_json::Value) -> Result<()> {
        self.inner
            .lock()
            .expect("poisoned")
            .sessions
            .insert(session_id.to_string(), data.clone());
        Ok(())
    }

    fn delete_message_session(&self, session_id: &str) -> Result<()> {
        self.inner.lock().expect("poisoned").sessions.remove(session_id);
        Ok(())
    }

    fn list_message_sessions(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .expect("poisoned")
            .sessions
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_share_store(&self) -> Result<Option<ShareStore>> {
        Ok(self.inner.lock().expect("poisoned").shares.clone())
    }

    fn save_share_store(&self, store: &ShareStore) -> Result<()> {
        self.inner.lock().expect("poisoned").shares = Some(store.clone());
        Ok(())
    }

    fn load_last_account(&self) -> Result<Option<serde_json::Value>> {
        Ok(self.inner.lock().expect("poisoned").last_account.clone())
    }

    fn save_last_account(&self, data: &serde_json::Value) -> Result<()> {
        self.inner.lock().expect("poisoned").last_account = Some(data.clone());
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_core::entity::EntityId;
    use fabric_core::workspace::Workspace;
    use tempfile::TempDir;

    fn fs_store() -> (FsPersistence, TempDir) {
        let dir = TempDir::new().unwrap();
        (FsPersistence::new(dir.path()), dir)
    }

    #[test]
    fn workspace_store_round_trip() {
        let (p, _dir) = fs_store();
        assert!(p.load_workspace_store().unwrap().is_none());

        let mut store = WorkspaceStore::default();
        store
            .add_workspace(Workspace::new(
                EntityId::workspace(1, 1).unwrap(),
                "main",
                "/tmp/proj",
            ))
            .unwrap();
        p.save_workspace_store(&store).unwrap();

        let loaded = p.load_workspace_store().unwrap().unwrap();
        assert_eq!(loaded.workspaces.len(), 1);
        assert_eq!(loaded.workspaces[0].name, "main");
    }

    #[test]
    fn sessions_are_listed_and_deleted() {
        let (p, _dir) = fs_store();
        assert!(p.list_message_sessions().unwrap().is_empty());

        p.save_message_session("sess-a", &serde_json::json!({"n": 1}))
            .unwrap();
        p.save_message_session("sess-b", &serde_json::json!({"n": 2}))
            .unwrap();
        assert_eq!(p.list_message_sessions().unwrap(), vec!["sess-a", "sess-b"]);

        assert_eq!(
            p.load_message_session("sess-a").unwrap().unwrap()["n"],
            1
        );
        p.delete_message_session("sess-a").unwrap();
        assert!(p.load_message_session("sess-a").unwrap().is_none());
        // Deleting again is a no-op
        p.delete_message_session("sess-a").unwrap();
    }

    #[test]
    fn writes_recreate_removed_directories() {
        let (p, dir) = fs_store();
        p.save_message_session("s1", &serde_json::json!({})).unwrap();
        std::fs::remove_dir_all(dir.path().join("sessions")).unwrap();
        // The next write must recreate the directory lazily
        p.save_message_session("s2", &serde_json::json!({})).unwrap();
        assert_eq!(p.list_message_sessions().unwrap(), vec!["s2"]);
    }

    #[test]
    fn share_store_round_trip() {
        let (p, _dir) = fs_store();
        let mut shares = ShareStore::default();
        shares.create(EntityId::conversation(1, 1, 7).unwrap());
        p.save_share_store(&shares).unwrap();
        let loaded = p.load_share_store().unwrap().unwrap();
        assert_eq!(loaded.shares.len(), 1);
    }

    #[test]
    fn memory_persistence_behaves_like_fs() {
        let p = MemoryPersistence::new();
        p.save_message_session("x", &serde_json::json!({"ok": true}))
            .unwrap();
        assert_eq!(p.list_message_sessions().unwrap(), vec!["x"]);
        p.save_last_account(&serde_json::json!({"account": "a1"}))
            .unwrap();
        assert_eq!(
            p.load_last_account().unwrap().unwrap()["account"],
            "a1"
        );
    }
}
