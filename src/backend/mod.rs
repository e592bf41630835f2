//! External collaborator seams: identity backend, record store, object store.
//!
//! The core never talks to the network directly; everything goes through
//! these traits so tests can substitute in-memory fakes. `rest.rs` carries
//! the production implementations.

pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{AuthError, StoreError};

/// The authenticated principal as reported by the identity backend.
///
/// Read-only from this crate's perspective; only the backend creates or
/// refreshes identities. The token value is used to detect stale cached
/// copies when change events arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub email_confirmed: bool,
    pub access_token: String,
}

/// Profile attributes attached to the identity record at sign-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpAttributes {
    pub full_name: String,
    pub phone: String,
    pub email: String,
}

/// A change notification from the identity backend's session stream.
///
/// `identity: None` means the session ended. The token accompanies the
/// identity so consumers can deduplicate redundant notifications.
#[derive(Debug, Clone)]
pub struct SessionChange {
    pub identity: Option<Identity>,
    pub access_token: Option<String>,
}

impl SessionChange {
    /// Key used for no-op deduplication: unchanged `(id, token)` pairs are
    /// redundant.
    pub fn dedup_key(&self) -> (String, String) {
        (
            self.identity
                .as_ref()
                .map(|i| i.id.clone())
                .unwrap_or_default(),
            self.access_token.clone().unwrap_or_default(),
        )
    }

    pub fn signed_out() -> Self {
        Self {
            identity: None,
            access_token: None,
        }
    }
}

/// Remote authentication provider.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// The currently established session, if any.
    async fn current_session(&self) -> Result<Option<Identity>, AuthError>;

    /// Register a new account. Does not establish a session; the backend
    /// requires email confirmation first.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: &SignUpAttributes,
    ) -> Result<(), AuthError>;

    /// Password sign-in. Returns the identity including its confirmation
    /// state; callers decide whether an unconfirmed identity is acceptable.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Merge attributes into the identity record (e.g. `full_name`
    /// propagation after a self-edit).
    async fn update_attributes(&self, attributes: serde_json::Value) -> Result<(), AuthError>;

    /// Subscribe to the session-change notification stream.
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}

/// Remote relational store exposing per-row access by primary key.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a single row by primary key, `None` if absent.
    async fn select_one(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    /// Merge `patch` into the row with the given primary key.
    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Delete the row with the given primary key.
    async fn delete_row(&self, table: &str, id: &str) -> Result<(), StoreError>;

    /// Fetch every row where `column != value`.
    async fn select_where_ne(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<Vec<serde_json::Value>, StoreError>;
}

/// Remote object store for binary attachments.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload an object. With `overwrite`, an existing object under the same
    /// key is replaced.
    async fn upload(
        &self,
        key: &str,
        bytes: bytes::Bytes,
        content_type: &str,
        overwrite: bool,
    ) -> Result<(), StoreError>;

    /// Remove an object by key.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Resolve the stable public URL for a key. No I/O.
    fn public_url(&self, key: &str) -> String;
}
