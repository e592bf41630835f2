//! Admin-only directory operations over the profile table.

use std::sync::Arc;

use tracing::{info, warn};

use crate::attachments::AttachmentManager;
use crate::backend::RecordStore;
use crate::error::{AuthError, Result};
use crate::profile::{PROFILES_TABLE, Profile, Role};
use crate::profile::store::ProfileStore;

/// Role column value the user listing filters out.
const ADMIN_ROLE: &str = "admin";

/// Listing and removal of managed accounts. Every operation checks the
/// caller's role; these are not reachable for regular users.
pub struct AdminDirectory {
    records: Arc<dyn RecordStore>,
    profiles: Arc<ProfileStore>,
    attachments: Arc<AttachmentManager>,
}

impl AdminDirectory {
    pub fn new(
        records: Arc<dyn RecordStore>,
        profiles: Arc<ProfileStore>,
        attachments: Arc<AttachmentManager>,
    ) -> Self {
        Self {
            records,
            profiles,
            attachments,
        }
    }

    /// All non-admin profiles. Rows that fail normalization are logged and
    /// skipped rather than failing the whole listing.
    pub async fn list_users(&self, caller: &Profile) -> Result<Vec<Profile>> {
        if !caller.is_admin() {
            return Err(AuthError::Unauthorized.into());
        }
        let rows = self
            .records
            .select_where_ne(PROFILES_TABLE, "role", ADMIN_ROLE)
            .await
            .map_err(crate::error::ProfileError::from)?;
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            match Profile::from_row(row) {
                Ok(profile) => users.push(profile),
                Err(err) => warn!(error = %err, "skipping malformed profile row in user listing"),
            }
        }
        Ok(users)
    }

    /// Delete `target`'s account data: both attachments (best-effort), then
    /// the profile row. Admin accounts cannot be deleted this way.
    pub async fn delete_user(&self, caller: &Profile, target: &Profile) -> Result<()> {
        if !caller.is_admin() || target.role == Role::Admin {
            return Err(AuthError::Unauthorized.into());
        }
        if let Some(key) = target.profile_pic.as_deref().filter(|k| !k.is_empty()) {
            self.attachments.remove_best_effort(key).await;
        }
        if let Some(key) = target.resume.as_deref().filter(|k| !k.is_empty()) {
            self.attachments.remove_best_effort(key).await;
        }
        self.records
            .delete_row(PROFILES_TABLE, &target.id)
            .await
            .map_err(crate::error::ProfileError::from)?;
        self.profiles.invalidate(&target.id).await;
        info!(profile = %target.id, "deleted user account");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectStore;
    use crate::config::AttachmentConfig;
    use crate::error::{Error, StoreError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    struct DirectoryRecords {
        rows: Mutex<Vec<serde_json::Value>>,
    }

    impl DirectoryRecords {
        fn new(rows: Vec<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(rows),
            })
        }
    }

    #[async_trait]
    impl RecordStore for DirectoryRecords {
        async fn select_one(
            &self,
            _table: &str,
            id: &str,
        ) -> std::result::Result<Option<serde_json::Value>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|row| row["id"] == json!(id))
                .cloned())
        }

        async fn update_fields(
            &self,
            _table: &str,
            _id: &str,
            _patch: serde_json::Value,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn delete_row(
            &self,
            _table: &str,
            id: &str,
        ) -> std::result::Result<(), StoreError> {
            self.rows.lock().unwrap().retain(|row| row["id"] != json!(id));
            Ok(())
        }

        async fn select_where_ne(
            &self,
            _table: &str,
            column: &str,
            value: &str,
        ) -> std::result::Result<Vec<serde_json::Value>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row[column] != json!(value))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RemovalLog {
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for RemovalLog {
        async fn upload(
            &self,
            _key: &str,
            _bytes: Bytes,
            _content_type: &str,
            _overwrite: bool,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.removed.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("mem://bucket/{key}")
        }
    }

    fn directory(
        rows: Vec<serde_json::Value>,
    ) -> (AdminDirectory, Arc<DirectoryRecords>, Arc<RemovalLog>) {
        let records = DirectoryRecords::new(rows);
        let objects = Arc::new(RemovalLog::default());
        let profiles = Arc::new(ProfileStore::new(records.clone()));
        let attachments = Arc::new(AttachmentManager::new(
            objects.clone(),
            &AttachmentConfig {
                max_size_bytes: 1024,
            },
        ));
        (
            AdminDirectory::new(records.clone(), profiles, attachments),
            records,
            objects,
        )
    }

    fn admin() -> Profile {
        Profile::from_row(json!({ "id": "root", "role": "admin" })).unwrap()
    }

    fn user(id: &str) -> Profile {
        Profile::from_row(json!({
            "id": id,
            "profile_pic": format!("profile_pics/{id}.png"),
            "resume": format!("resumes/{id}.pdf"),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn listing_requires_the_admin_role() {
        let (directory, _, _) = directory(vec![]);
        let err = directory.list_users(&user("u1")).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn listing_excludes_admins_and_skips_malformed_rows() {
        let (directory, _, _) = directory(vec![
            json!({ "id": "root", "role": "admin" }),
            json!({ "id": "u1", "email": "u1@example.com" }),
            json!({ "email": "no-id@example.com" }),
            json!({ "id": "u2", "email": "u2@example.com" }),
        ]);

        let users = directory.list_users(&admin()).await.unwrap();
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn delete_removes_attachments_row_and_cache() {
        let (directory, records, objects) = directory(vec![
            json!({ "id": "u1", "profile_pic": "profile_pics/u1.png", "resume": "resumes/u1.pdf" }),
        ]);
        directory.profiles.fetch("u1").await.unwrap();

        directory.delete_user(&admin(), &user("u1")).await.unwrap();

        assert_eq!(
            objects.removed.lock().unwrap().clone(),
            vec![
                "profile_pics/u1.png".to_string(),
                "resumes/u1.pdf".to_string()
            ]
        );
        assert!(records.rows.lock().unwrap().is_empty());
        assert!(directory.profiles.cached("u1").await.is_none());
    }

    #[tokio::test]
    async fn delete_skips_absent_attachments() {
        let (directory, _, objects) = directory(vec![json!({ "id": "u1" })]);
        let target = Profile::from_row(json!({ "id": "u1" })).unwrap();

        directory.delete_user(&admin(), &target).await.unwrap();
        assert!(objects.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn admins_cannot_be_deleted() {
        let (directory, _, _) = directory(vec![]);
        let err = directory.delete_user(&admin(), &admin()).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::Unauthorized)));

        let err = directory
            .delete_user(&user("u1"), &user("u2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::Unauthorized)));
    }
}
