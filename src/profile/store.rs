//! Typed read/write access to profile rows.
//!
//! Owns the array-field CRUD protocol: every sequence mutation is applied to
//! the caller's in-memory copy first, committed as a whole-sequence write,
//! and rolled back to the pre-operation snapshot if the backend rejects it.
//! A per-profile write gate serializes array commits against the full-form
//! submit so the two whole-record writers never race.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::backend::RecordStore;
use crate::error::ProfileError;
use crate::profile::{ArrayEntry, ArrayField, PROFILES_TABLE, Profile, ProfileDraft};

/// Store for profile rows, with a write-through cache keyed by identity id.
pub struct ProfileStore {
    records: Arc<dyn RecordStore>,
    cache: RwLock<HashMap<String, Profile>>,
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProfileStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            cache: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch and normalize the profile row for `id`.
    pub async fn fetch(&self, id: &str) -> Result<Profile, ProfileError> {
        let row = self.records.select_one(PROFILES_TABLE, id).await?;
        let row = row.ok_or_else(|| ProfileError::NotFound { id: id.to_string() })?;
        let profile = Profile::from_row(row)?;
        self.cache
            .write()
            .await
            .insert(id.to_string(), profile.clone());
        Ok(profile)
    }

    /// The cached copy for `id`, if any.
    pub async fn cached(&self, id: &str) -> Option<Profile> {
        self.cache.read().await.get(id).cloned()
    }

    /// Drop the cache entry and idle write gate for `id`. Called on logout
    /// and on account deletion so neither map grows with departed profiles.
    pub async fn invalidate(&self, id: &str) {
        self.cache.write().await.remove(id);
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // A gate some writer still holds stays registered; dropping it here
        // would let a second writer race the in-flight commit.
        if gates.get(id).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(id);
        }
    }

    /// Update exactly one named column, returning the committed value.
    pub async fn commit_field(
        &self,
        id: &str,
        column: &str,
        value: serde_json::Value,
    ) -> Result<serde_json::Value, ProfileError> {
        self.records
            .update_fields(PROFILES_TABLE, id, json!({ column: value.clone() }))
            .await?;
        Ok(value)
    }

    /// Append `entry` to `seq` and commit the whole sequence.
    ///
    /// On backend failure `seq` is restored to its pre-call value.
    pub async fn push_entry<T: ArrayEntry>(
        &self,
        id: &str,
        field: ArrayField,
        seq: &mut Vec<T>,
        entry: T,
    ) -> Result<(), ProfileError> {
        if entry.is_blank() {
            return Err(ProfileError::EmptyEntry {
                field: field.column(),
            });
        }
        let snapshot = seq.clone();
        seq.push(entry);
        self.commit_sequence(id, field, seq, snapshot).await
    }

    /// Replace the entry at `index` and commit the whole sequence.
    pub async fn replace_entry<T: ArrayEntry>(
        &self,
        id: &str,
        field: ArrayField,
        seq: &mut Vec<T>,
        index: usize,
        entry: T,
    ) -> Result<(), ProfileError> {
        if entry.is_blank() {
            return Err(ProfileError::EmptyEntry {
                field: field.column(),
            });
        }
        if index >= seq.len() {
            return Err(ProfileError::IndexOutOfRange {
                field: field.column(),
                index,
                len: seq.len(),
            });
        }
        let snapshot = seq.clone();
        seq[index] = entry;
        self.commit_sequence(id, field, seq, snapshot).await
    }

    /// Remove the entry at `index` (shifting later entries down) and commit
    /// the whole sequence.
    pub async fn remove_entry<T: ArrayEntry>(
        &self,
        id: &str,
        field: ArrayField,
        seq: &mut Vec<T>,
        index: usize,
    ) -> Result<(), ProfileError> {
        if index >= seq.len() {
            return Err(ProfileError::IndexOutOfRange {
                field: field.column(),
                index,
                len: seq.len(),
            });
        }
        let snapshot = seq.clone();
        seq.remove(index);
        self.commit_sequence(id, field, seq, snapshot).await
    }

    async fn commit_sequence<T: ArrayEntry>(
        &self,
        id: &str,
        field: ArrayField,
        seq: &mut Vec<T>,
        snapshot: Vec<T>,
    ) -> Result<(), ProfileError> {
        let _held = self.gate(id).lock_owned().await;
        let value = serde_json::to_value(&*seq)
            .map_err(|e| ProfileError::Malformed(e.to_string()))?;
        match self.commit_field(id, field.column(), value).await {
            Ok(committed) => {
                if let Some(cached) = self.cache.write().await.get_mut(id) {
                    cached.set_array_column(field, &committed);
                }
                Ok(())
            }
            Err(err) => {
                debug!(profile = id, %field, "array commit failed, rolling back");
                *seq = snapshot;
                Err(err)
            }
        }
    }

    /// Consolidated end-of-edit write. Recomputes `profile_complete` (this
    /// operation alone owns that invariant) and returns the computed flag.
    ///
    /// Waits for any in-flight array commit on the same profile to finish.
    pub async fn commit_full(&self, id: &str, draft: &ProfileDraft) -> Result<bool, ProfileError> {
        let held = self.gate(id).lock_owned().await;
        self.commit_full_locked(id, draft, held).await
    }

    /// Like [`commit_full`](Self::commit_full) but fails with `Busy` instead
    /// of waiting when another write is in flight.
    pub async fn try_commit_full(
        &self,
        id: &str,
        draft: &ProfileDraft,
    ) -> Result<bool, ProfileError> {
        let held = self
            .gate(id)
            .try_lock_owned()
            .map_err(|_| ProfileError::Busy { id: id.to_string() })?;
        self.commit_full_locked(id, draft, held).await
    }

    async fn commit_full_locked(
        &self,
        id: &str,
        draft: &ProfileDraft,
        _held: OwnedMutexGuard<()>,
    ) -> Result<bool, ProfileError> {
        let complete = draft.is_complete();
        let mut patch = serde_json::to_value(draft)
            .map_err(|e| ProfileError::Malformed(e.to_string()))?;
        patch["profile_complete"] = json!(complete);
        self.records
            .update_fields(PROFILES_TABLE, id, patch)
            .await?;

        if let Some(cached) = self.cache.write().await.get_mut(id) {
            cached.full_name = draft.full_name.clone();
            cached.email = draft.email.clone();
            cached.phone = draft.phone.clone();
            cached.dob = draft.dob;
            cached.address = draft.address.clone();
            cached.education = draft.education.clone();
            cached.employment = draft.employment.clone();
            cached.projects = draft.projects.clone();
            cached.skills = draft.skills.clone();
            cached.profile_pic = draft.profile_pic.clone();
            cached.resume = draft.resume.clone();
            cached.profile_complete = complete;
        }
        Ok(complete)
    }

    pub(crate) fn gate(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Record-store fake: one row, optionally failing writes.
    struct FakeRecords {
        row: Mutex<serde_json::Value>,
        fail_writes: AtomicBool,
    }

    impl FakeRecords {
        fn with_row(row: serde_json::Value) -> Self {
            Self {
                row: Mutex::new(row),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RecordStore for FakeRecords {
        async fn select_one(
            &self,
            _table: &str,
            id: &str,
        ) -> Result<Option<serde_json::Value>, StoreError> {
            let row = self.row.lock().unwrap().clone();
            if row["id"] == json!(id) {
                Ok(Some(row))
            } else {
                Ok(None)
            }
        }

        async fn update_fields(
            &self,
            _table: &str,
            _id: &str,
            patch: serde_json::Value,
        ) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Status {
                    status: 500,
                    body: "write rejected".to_string(),
                });
            }
            let mut row = self.row.lock().unwrap();
            for (key, value) in patch.as_object().unwrap() {
                row[key] = value.clone();
            }
            Ok(())
        }

        async fn delete_row(&self, _table: &str, _id: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn select_where_ne(
            &self,
            _table: &str,
            _column: &str,
            _value: &str,
        ) -> Result<Vec<serde_json::Value>, StoreError> {
            Ok(vec![])
        }
    }

    fn store_with_row(row: serde_json::Value) -> (ProfileStore, Arc<FakeRecords>) {
        let records = Arc::new(FakeRecords::with_row(row));
        (ProfileStore::new(records.clone()), records)
    }

    fn basic_row() -> serde_json::Value {
        json!({ "id": "u1", "email": "u1@example.com", "skills": ["Rust"] })
    }

    #[tokio::test]
    async fn fetch_normalizes_and_caches() {
        let (store, _) = store_with_row(basic_row());
        let profile = store.fetch("u1").await.unwrap();
        assert_eq!(profile.skills, vec!["Rust".to_string()]);
        assert_eq!(store.cached("u1").await, Some(profile));
    }

    #[tokio::test]
    async fn fetch_missing_row_is_not_found() {
        let (store, _) = store_with_row(basic_row());
        let err = store.fetch("nobody").await.unwrap_err();
        assert!(matches!(err, ProfileError::NotFound { .. }));
    }

    #[tokio::test]
    async fn commit_field_writes_one_column() {
        let (store, records) = store_with_row(basic_row());
        let committed = store
            .commit_field("u1", "phone", json!("0123456789"))
            .await
            .unwrap();
        assert_eq!(committed, json!("0123456789"));
        assert_eq!(records.row.lock().unwrap()["phone"], json!("0123456789"));
    }

    #[tokio::test]
    async fn push_then_remove_round_trips() {
        let (store, _) = store_with_row(basic_row());
        let mut skills = vec!["Rust".to_string()];
        let before = skills.clone();

        store
            .push_entry("u1", ArrayField::Skills, &mut skills, "SQL".to_string())
            .await
            .unwrap();
        assert_eq!(skills, vec!["Rust".to_string(), "SQL".to_string()]);

        store
            .remove_entry("u1", ArrayField::Skills, &mut skills, 1)
            .await
            .unwrap();
        assert_eq!(skills, before);
    }

    #[tokio::test]
    async fn blank_entries_never_reach_the_backend() {
        let (store, records) = store_with_row(basic_row());
        records.fail_writes.store(true, Ordering::SeqCst);

        let mut skills = vec!["Rust".to_string()];
        let err = store
            .push_entry("u1", ArrayField::Skills, &mut skills, "   ".to_string())
            .await
            .unwrap_err();
        // EmptyEntry, not the backend failure the fake would have produced.
        assert!(matches!(err, ProfileError::EmptyEntry { field: "skills" }));
        assert_eq!(skills, vec!["Rust".to_string()]);
    }

    #[tokio::test]
    async fn failed_commit_rolls_the_sequence_back() {
        let (store, records) = store_with_row(basic_row());
        let mut skills = vec!["Rust".to_string()];
        records.fail_writes.store(true, Ordering::SeqCst);

        let err = store
            .push_entry("u1", ArrayField::Skills, &mut skills, "SQL".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::Backend(_)));
        assert_eq!(skills, vec!["Rust".to_string()]);

        let err = store
            .remove_entry("u1", ArrayField::Skills, &mut skills, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::Backend(_)));
        assert_eq!(skills, vec!["Rust".to_string()]);
    }

    #[tokio::test]
    async fn sequential_removals_shift_indices() {
        let (store, _) = store_with_row(basic_row());
        let mut skills = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        store
            .remove_entry("u1", ArrayField::Skills, &mut skills, 0)
            .await
            .unwrap();
        // After the first removal the sequence is [b, c]; index 1 now names
        // the element that shifted down from index 2.
        store
            .remove_entry("u1", ArrayField::Skills, &mut skills, 1)
            .await
            .unwrap();
        assert_eq!(skills, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn out_of_range_indices_are_rejected() {
        let (store, _) = store_with_row(basic_row());
        let mut skills = vec!["Rust".to_string()];
        let err = store
            .remove_entry("u1", ArrayField::Skills, &mut skills, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::IndexOutOfRange { .. }));
    }

    #[tokio::test]
    async fn array_commit_updates_the_cache() {
        let (store, _) = store_with_row(basic_row());
        store.fetch("u1").await.unwrap();

        let mut skills = vec!["Rust".to_string()];
        store
            .push_entry("u1", ArrayField::Skills, &mut skills, "SQL".to_string())
            .await
            .unwrap();

        let cached = store.cached("u1").await.unwrap();
        assert_eq!(cached.skills, vec!["Rust".to_string(), "SQL".to_string()]);
    }

    #[tokio::test]
    async fn commit_full_persists_the_completeness_flag() {
        let (store, records) = store_with_row(basic_row());
        store.fetch("u1").await.unwrap();

        let draft = ProfileDraft {
            full_name: "Ada".to_string(),
            email: "u1@example.com".to_string(),
            phone: "0123456789".to_string(),
            dob: chrono::NaiveDate::from_ymd_opt(1990, 1, 1),
            address: crate::profile::Address {
                street: "1 Main".to_string(),
                city: "X".to_string(),
                state: "Y".to_string(),
                country: "Z".to_string(),
                postal_code: "1".to_string(),
            },
            education: vec![crate::profile::EducationEntry {
                college_name: "MIT".to_string(),
                ..Default::default()
            }],
            profile_pic: Some("profile_pics/u1.png".to_string()),
            resume: Some("resumes/u1.pdf".to_string()),
            ..Default::default()
        };

        let complete = store.commit_full("u1", &draft).await.unwrap();
        assert!(complete);
        assert_eq!(records.row.lock().unwrap()["profile_complete"], json!(true));
        assert!(store.cached("u1").await.unwrap().profile_complete);
    }

    #[tokio::test]
    async fn invalidate_drops_the_cache_entry_and_idle_gate() {
        let (store, _) = store_with_row(basic_row());
        store.fetch("u1").await.unwrap();
        let mut skills = vec!["Rust".to_string()];
        store
            .push_entry("u1", ArrayField::Skills, &mut skills, "SQL".to_string())
            .await
            .unwrap();
        assert_eq!(store.gates.lock().unwrap().len(), 1);

        store.invalidate("u1").await;
        assert!(store.cached("u1").await.is_none());
        assert!(store.gates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalidate_keeps_a_gate_a_writer_still_holds() {
        let (store, _) = store_with_row(basic_row());
        let gate = store.gate("u1");
        let _held = gate.lock_owned().await;

        store.invalidate("u1").await;
        assert_eq!(store.gates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn try_commit_full_reports_busy_while_the_gate_is_held() {
        let (store, _) = store_with_row(basic_row());
        let gate = store.gate("u1");
        let _held = gate.lock_owned().await;

        let err = store
            .try_commit_full("u1", &ProfileDraft::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::Busy { .. }));
    }
}
