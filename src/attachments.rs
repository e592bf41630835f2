//! Binary attachment lifecycle for profile pictures and résumés.
//!
//! Each attachment lives under a deterministic storage key derived from the
//! owning identity's id and the file's extension, so replacing a file of the
//! same type overwrites in place. Display URLs carry a timestamp query
//! parameter so browser caches never serve the previous object under the
//! same key.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::ObjectStore;
use crate::config::AttachmentConfig;
use crate::error::{AttachmentError, ValidationError};

const RESUME_TYPES: [&str; 3] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Which of the two profile attachments a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    ProfilePic,
    Resume,
}

impl AttachmentKind {
    fn key_prefix(self) -> &'static str {
        match self {
            Self::ProfilePic => "profile_pics",
            Self::Resume => "resumes",
        }
    }

    fn accepts(self, content_type: &str) -> bool {
        match self {
            Self::ProfilePic => content_type.starts_with("image/"),
            Self::Resume => RESUME_TYPES.contains(&content_type),
        }
    }
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProfilePic => f.write_str("profile picture"),
            Self::Resume => f.write_str("resume"),
        }
    }
}

/// A file selected for upload, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl AttachmentFile {
    /// Build a pending file, guessing the content type from the file name.
    pub fn new(file_name: impl Into<String>, bytes: Bytes) -> Self {
        let file_name = file_name.into();
        let content_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    /// Override the guessed content type (e.g. when the picker reports one).
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    fn extension(&self) -> Option<&str> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

/// The outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    /// Stable storage key persisted on the profile row.
    pub key: String,
    /// Cache-busted public URL for immediate display.
    pub url: String,
}

/// Uploads, replaces, and deletes profile attachments.
pub struct AttachmentManager {
    objects: Arc<dyn ObjectStore>,
    max_size_bytes: u64,
}

impl std::fmt::Debug for AttachmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentManager")
            .field("max_size_bytes", &self.max_size_bytes)
            .finish_non_exhaustive()
    }
}

impl AttachmentManager {
    pub fn new(objects: Arc<dyn ObjectStore>, config: &AttachmentConfig) -> Self {
        Self {
            objects,
            max_size_bytes: config.max_size_bytes,
        }
    }

    /// Validate `file` for `kind` without touching the network.
    ///
    /// Returns the file extension used for the deterministic key.
    pub fn validate<'a>(
        &self,
        kind: AttachmentKind,
        file: &'a AttachmentFile,
    ) -> Result<&'a str, ValidationError> {
        let size = file.bytes.len() as u64;
        if size > self.max_size_bytes {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_size_bytes,
            });
        }
        if !kind.accepts(&file.content_type) {
            return Err(ValidationError::UnsupportedType {
                kind,
                content_type: file.content_type.clone(),
            });
        }
        file.extension().ok_or(ValidationError::UnsupportedType {
            kind,
            content_type: file.content_type.clone(),
        })
    }

    /// Replace the attachment of `kind` for `owner_id` with `file`.
    ///
    /// The previous object, if any, is deleted best-effort first: an orphaned
    /// old object must never block saving the new one, so delete failures are
    /// logged and swallowed. The upload itself is fatal on failure and leaves
    /// the previous key authoritative.
    pub async fn replace(
        &self,
        kind: AttachmentKind,
        owner_id: &str,
        file: &AttachmentFile,
        previous_key: Option<&str>,
    ) -> Result<StoredAttachment, AttachmentError> {
        let ext = self.validate(kind, file)?;
        let key = format!("{}/{}.{}", kind.key_prefix(), owner_id, ext);

        if let Some(previous) = previous_key.filter(|k| !k.is_empty()) {
            if let Err(err) = self.objects.remove(previous).await {
                warn!(%kind, key = previous, error = %err, "failed to delete previous attachment");
            } else {
                debug!(%kind, key = previous, "deleted previous attachment");
            }
        }

        self.objects
            .upload(&key, file.bytes.clone(), &file.content_type, true)
            .await
            .map_err(|err| AttachmentError::Upload {
                kind,
                reason: err.to_string(),
            })?;

        Ok(StoredAttachment {
            url: self.display_url(&key),
            key,
        })
    }

    /// Resolve a cache-busted display URL for a stored key.
    pub fn display_url(&self, key: &str) -> String {
        format!(
            "{}?t={}",
            self.objects.public_url(key),
            Utc::now().timestamp_millis()
        )
    }

    /// Remove an object, logging instead of failing. Used for cleanup paths
    /// where an orphan is preferable to an aborted operation.
    pub async fn remove_best_effort(&self, key: &str) {
        if let Err(err) = self.objects.remove(key).await {
            warn!(key, error = %err, "attachment cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeObjects {
        calls: Mutex<Vec<String>>,
        fail_remove: bool,
        fail_upload: bool,
    }

    #[async_trait]
    impl ObjectStore for FakeObjects {
        async fn upload(
            &self,
            key: &str,
            _bytes: Bytes,
            _content_type: &str,
            overwrite: bool,
        ) -> Result<(), StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("upload:{key}:overwrite={overwrite}"));
            if self.fail_upload {
                Err(StoreError::Status {
                    status: 500,
                    body: "upload failed".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(format!("remove:{key}"));
            if self.fail_remove {
                Err(StoreError::Status {
                    status: 500,
                    body: "remove failed".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://cdn.example.com/{key}")
        }
    }

    fn manager(objects: FakeObjects) -> (AttachmentManager, Arc<FakeObjects>) {
        let objects = Arc::new(objects);
        (
            AttachmentManager::new(objects.clone(), &AttachmentConfig::default()),
            objects,
        )
    }

    fn png(len: usize) -> AttachmentFile {
        AttachmentFile::new("avatar.png", Bytes::from(vec![0u8; len]))
    }

    #[test]
    fn content_type_is_guessed_from_the_file_name() {
        let file = AttachmentFile::new("cv.pdf", Bytes::new());
        assert_eq!(file.content_type, "application/pdf");
        let file = AttachmentFile::new("avatar.png", Bytes::new());
        assert_eq!(file.content_type, "image/png");
    }

    #[test]
    fn oversized_files_fail_validation() {
        let (manager, objects) = manager(FakeObjects::default());
        let file = png(6 * 1024 * 1024);
        let err = manager
            .validate(AttachmentKind::ProfilePic, &file)
            .unwrap_err();
        assert!(matches!(err, ValidationError::FileTooLarge { .. }));
        assert!(objects.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn resume_rejects_images() {
        let (manager, _) = manager(FakeObjects::default());
        let err = manager.validate(AttachmentKind::Resume, &png(10)).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedType { .. }));
    }

    #[test]
    fn profile_pic_accepts_any_image() {
        let (manager, _) = manager(FakeObjects::default());
        let file = AttachmentFile::new("me.jpeg", Bytes::from_static(b"x"));
        assert_eq!(manager.validate(AttachmentKind::ProfilePic, &file), Ok("jpeg"));
    }

    #[tokio::test]
    async fn replace_deletes_old_key_then_uploads_with_overwrite() {
        let (manager, objects) = manager(FakeObjects::default());
        let stored = manager
            .replace(
                AttachmentKind::ProfilePic,
                "u1",
                &png(16),
                Some("profile_pics/abc.png"),
            )
            .await
            .unwrap();

        assert_eq!(stored.key, "profile_pics/u1.png");
        assert!(stored.url.starts_with("https://cdn.example.com/profile_pics/u1.png?t="));
        assert_eq!(
            *objects.calls.lock().unwrap(),
            vec![
                "remove:profile_pics/abc.png".to_string(),
                "upload:profile_pics/u1.png:overwrite=true".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failed_old_key_delete_does_not_block_the_upload() {
        let (manager, objects) = manager(FakeObjects {
            fail_remove: true,
            ..Default::default()
        });
        let stored = manager
            .replace(
                AttachmentKind::ProfilePic,
                "u1",
                &png(16),
                Some("profile_pics/old.png"),
            )
            .await
            .unwrap();
        assert_eq!(stored.key, "profile_pics/u1.png");
        assert_eq!(objects.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_upload_is_fatal() {
        let (manager, _) = manager(FakeObjects {
            fail_upload: true,
            ..Default::default()
        });
        let err = manager
            .replace(AttachmentKind::ProfilePic, "u1", &png(16), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Upload { .. }));
    }

    #[tokio::test]
    async fn replacement_urls_differ_from_previous_ones() {
        let (manager, _) = manager(FakeObjects::default());
        let first = manager
            .replace(AttachmentKind::ProfilePic, "u1", &png(8), None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = manager
            .replace(AttachmentKind::ProfilePic, "u1", &png(8), Some(&first.key))
            .await
            .unwrap();
        assert_eq!(first.key, second.key);
        assert_ne!(first.url, second.url);
    }

    #[test]
    fn files_without_extensions_are_rejected() {
        let (manager, _) = manager(FakeObjects::default());
        let file = AttachmentFile::new("avatar", Bytes::from_static(b"x"))
            .with_content_type("image/png");
        let err = manager
            .validate(AttachmentKind::ProfilePic, &file)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedType { .. }));
    }
}
