//! Persisted input values keyed by field label.
//!
//! One JSON snapshot file, loaded on open and overwritten in full on each
//! write. No append log, no versioning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::FillPolicy;
use crate::errors::Result;

#[derive(Debug)]
pub struct FieldValueStore {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl FieldValueStore {
    /// Open the store at `path`, loading the existing snapshot if present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };
        debug!(entries = values.len(), path = %path.display(), "field value store opened");
        Ok(Self { path, values })
    }

    /// In-memory store that never persists. Used when no store path is
    /// configured.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            values: HashMap::new(),
        }
    }

    pub fn get(&self, field_label: &str) -> Option<&str> {
        self.values.get(field_label).map(String::as_str)
    }

    /// Record a value supplied for a field and persist the snapshot.
    pub fn set(&mut self, field_label: &str, value: &str) -> Result<()> {
        self.values
            .insert(field_label.to_string(), value.to_string());
        self.save()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decide which value fills a field when both a stored value and a
    /// plan-supplied value exist.
    pub fn resolve<'a>(&'a self, field_label: &str, plan_value: &'a str, policy: FillPolicy) -> &'a str {
        match (policy, self.get(field_label)) {
            (FillPolicy::PreferStored, Some(stored)) => stored,
            (FillPolicy::PreferStored, None) => plan_value,
            (FillPolicy::PreferPlan, Some(stored)) if plan_value.is_empty() => stored,
            (FillPolicy::PreferPlan, _) => plan_value,
        }
    }

    fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let raw = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.json");

        let mut store = FieldValueStore::open(&path).unwrap();
        store.set("Username", "user@example.com").unwrap();
        store.set("Password", "hunter2").unwrap();

        let reopened = FieldValueStore::open(&path).unwrap();
        assert_eq!(reopened.get("Username"), Some("user@example.com"));
        assert_eq!(reopened.get("Password"), Some("hunter2"));
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn write_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.json");

        let mut store = FieldValueStore::open(&path).unwrap();
        store.set("Email", "old@example.com").unwrap();
        store.set("Email", "new@example.com").unwrap();

        let reopened = FieldValueStore::open(&path).unwrap();
        assert_eq!(reopened.get("Email"), Some("new@example.com"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn prefer_stored_wins_only_when_a_value_exists() {
        let mut store = FieldValueStore::ephemeral();
        store.set("Username", "stored-user").unwrap();

        assert_eq!(
            store.resolve("Username", "plan-user", FillPolicy::PreferStored),
            "stored-user"
        );
        assert_eq!(
            store.resolve("Unknown", "plan-user", FillPolicy::PreferStored),
            "plan-user"
        );
    }

    #[test]
    fn prefer_plan_falls_back_to_stored_for_empty_values() {
        let mut store = FieldValueStore::ephemeral();
        store.set("Username", "stored-user").unwrap();

        assert_eq!(
            store.resolve("Username", "plan-user", FillPolicy::PreferPlan),
            "plan-user"
        );
        assert_eq!(
            store.resolve("Username", "", FillPolicy::PreferPlan),
            "stored-user"
        );
    }

    #[test]
    fn ephemeral_store_never_touches_disk() {
        let mut store = FieldValueStore::ephemeral();
        store.set("Field", "value").unwrap();
        assert_eq!(store.get("Field"), Some("value"));
    }
}
