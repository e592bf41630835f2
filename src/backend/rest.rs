//! REST implementations of the backend seams.
//!
//! Targets a GoTrue/PostgREST/Storage-flavored API: auth under `auth/v1`,
//! rows under `rest/v1`, objects under `storage/v1`. All three share one
//! HTTP client and one bearer-token cell so row and object requests are
//! made with the signed-in user's token once a session exists.

use std::sync::Arc;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{RwLock, broadcast};
use url::Url;

use crate::backend::{
    Identity, IdentityBackend, ObjectStore, RecordStore, SessionChange, SignUpAttributes,
};
use crate::config::BackendConfig;
use crate::error::{AuthError, StoreError};

/// Bearer token shared between the identity backend and the stores.
type SharedToken = Arc<RwLock<Option<String>>>;

const CHANGE_CHANNEL_CAPACITY: usize = 16;
const ATTACHMENT_CACHE_CONTROL: &str = "3600";

/// Entry point wiring the three REST collaborators together.
pub struct RestBackend;

impl RestBackend {
    /// Build the identity backend, record store, and object store against a
    /// single base URL, sharing the HTTP client and token cell.
    pub fn connect(
        config: &BackendConfig,
    ) -> Result<
        (
            Arc<RestIdentityBackend>,
            Arc<RestRecordStore>,
            Arc<RestObjectStore>,
        ),
        StoreError,
    > {
        let base = normalized_base(&config.base_url);
        let http = Client::new();
        let token: SharedToken = Arc::new(RwLock::new(None));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let identity = Arc::new(RestIdentityBackend {
            http: http.clone(),
            base: base.clone(),
            anon_key: config.anon_key.clone(),
            token: token.clone(),
            session: RwLock::new(None),
            changes,
        });
        let records = Arc::new(RestRecordStore {
            http: http.clone(),
            base: base.clone(),
            anon_key: config.anon_key.clone(),
            token: token.clone(),
        });
        let objects = Arc::new(RestObjectStore {
            http,
            base,
            anon_key: config.anon_key.clone(),
            token,
            bucket: config.bucket.clone(),
        });
        Ok((identity, records, objects))
    }
}

/// Ensure the base URL ends with a slash so `Url::join` appends paths.
fn normalized_base(url: &Url) -> Url {
    let mut base = url.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// GoTrue-style identity backend.
///
/// Session-change events are emitted locally on sign-in/sign-out, mirroring
/// how the reference client notifies subscribers of its own auth calls.
pub struct RestIdentityBackend {
    http: Client,
    base: Url,
    anon_key: SecretString,
    token: SharedToken,
    session: RwLock<Option<Identity>>,
    changes: broadcast::Sender<SessionChange>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: String,
    email_confirmed_at: Option<String>,
}

impl RestIdentityBackend {
    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(path)?)
    }

    async fn bearer(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    fn emit(&self, change: SessionChange) {
        // Nobody listening is fine; the reconciler subscribes for the
        // process lifetime in production.
        let _ = self.changes.send(change);
    }
}

#[async_trait::async_trait]
impl IdentityBackend for RestIdentityBackend {
    async fn current_session(&self) -> Result<Option<Identity>, AuthError> {
        Ok(self.session.read().await.clone())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: &SignUpAttributes,
    ) -> Result<(), AuthError> {
        let url = self.endpoint("auth/v1/signup")?;
        let response = self
            .http
            .post(url)
            .header("apikey", self.anon_key.expose_secret())
            .json(&json!({
                "email": email,
                "password": password,
                "data": attributes,
            }))
            .send()
            .await
            .map_err(StoreError::from)?;
        check(response).await?;
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.set_query(Some("grant_type=password"));
        let response = self
            .http
            .post(url)
            .header("apikey", self.anon_key.expose_secret())
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(StoreError::from)?;
        let body: TokenResponse = check(response)
            .await?
            .json()
            .await
            .map_err(StoreError::from)?;

        let identity = Identity {
            id: body.user.id,
            email: body.user.email,
            email_confirmed: body.user.email_confirmed_at.is_some(),
            access_token: body.access_token.clone(),
        };

        *self.token.write().await = Some(body.access_token.clone());
        *self.session.write().await = Some(identity.clone());
        self.emit(SessionChange {
            identity: Some(identity.clone()),
            access_token: Some(body.access_token),
        });
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let bearer = self.bearer().await;
        // Local state is cleared regardless of whether the revocation call
        // lands; a dropped request must not leave the client signed in.
        *self.token.write().await = None;
        *self.session.write().await = None;
        self.emit(SessionChange::signed_out());

        if let Some(token) = bearer {
            let url = self.endpoint("auth/v1/logout")?;
            let response = self
                .http
                .post(url)
                .header("apikey", self.anon_key.expose_secret())
                .bearer_auth(token)
                .send()
                .await
                .map_err(StoreError::from)?;
            check(response).await?;
        }
        Ok(())
    }

    async fn update_attributes(&self, attributes: serde_json::Value) -> Result<(), AuthError> {
        let token = self.bearer().await.ok_or(AuthError::Unauthorized)?;
        let url = self.endpoint("auth/v1/user")?;
        let response = self
            .http
            .put(url)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(token)
            .json(&json!({ "data": attributes }))
            .send()
            .await
            .map_err(StoreError::from)?;
        check(response).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }
}

/// PostgREST-style row access.
pub struct RestRecordStore {
    http: Client,
    base: Url,
    anon_key: SecretString,
    token: SharedToken,
}

impl RestRecordStore {
    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!("rest/v1/{table}"))?)
    }

    async fn authorization(&self) -> String {
        match self.token.read().await.as_deref() {
            Some(token) => token.to_string(),
            None => self.anon_key.expose_secret().to_string(),
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for RestRecordStore {
    async fn select_one(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let filter = format!("eq.{id}");
        let response = self
            .http
            .get(self.table_url(table)?)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.authorization().await)
            .query(&[("select", "*"), ("id", filter.as_str())])
            .send()
            .await?;
        let mut rows: Vec<serde_json::Value> = check(response).await?.json().await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.table_url(table)?)
            .header("apikey", self.anon_key.expose_secret())
            .header("Prefer", "return=minimal")
            .bearer_auth(self.authorization().await)
            .query(&[("id", &format!("eq.{id}"))])
            .json(&patch)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_row(&self, table: &str, id: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.table_url(table)?)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.authorization().await)
            .query(&[("id", &format!("eq.{id}"))])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn select_where_ne(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let filter = format!("neq.{value}");
        let response = self
            .http
            .get(self.table_url(table)?)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.authorization().await)
            .query(&[("select", "*"), (column, filter.as_str())])
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = check(response).await?.json().await?;
        Ok(rows)
    }
}

/// Storage-style object access.
pub struct RestObjectStore {
    http: Client,
    base: Url,
    anon_key: SecretString,
    token: SharedToken,
    bucket: String,
}

impl RestObjectStore {
    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!(
            "storage/v1/object/{}/{}",
            self.bucket,
            encode_key(key)
        ))?)
    }

    async fn authorization(&self) -> String {
        match self.token.read().await.as_deref() {
            Some(token) => token.to_string(),
            None => self.anon_key.expose_secret().to_string(),
        }
    }
}

/// Percent-encode key segments while keeping `/` as a path separator.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait::async_trait]
impl ObjectStore for RestObjectStore {
    async fn upload(
        &self,
        key: &str,
        bytes: bytes::Bytes,
        content_type: &str,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.object_url(key)?)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.authorization().await)
            .header("x-upsert", if overwrite { "true" } else { "false" })
            .header("cache-control", ATTACHMENT_CACHE_CONTROL)
            .header("content-type", content_type.to_string())
            .body(bytes)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.object_url(key)?)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.authorization().await)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}storage/v1/object/public/{}/{}",
            self.base,
            self.bucket,
            encode_key(key)
        )
    }
}
