//! Session reconciliation: the process-wide authority on who is signed in
//! and what their profile looks like.
//!
//! The reconciler owns `SessionState` behind a watch channel; every screen
//! that gates on authentication or role consumes the receiver. Identity
//! change events from the backend are debounced (the backend emits an
//! initial redundant event right after startup has already reconciled),
//! deduplicated on unchanged `(id, token)` pairs, and processed strictly in
//! order. A profile fetch triggered by an older event is discarded if a
//! newer event's identity superseded it before the fetch resolved.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Identity, IdentityBackend, SessionChange, SignUpAttributes};
use crate::config::ReconcilerConfig;
use crate::error::{AuthError, Result};
use crate::profile::Profile;
use crate::profile::store::ProfileStore;

/// The process-wide session tuple consumed by routing and dashboards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    /// A mutating operation (sign-up, sign-in, sign-out) is running.
    pub loading: bool,
    /// Startup reconciliation has not completed yet. Transitions
    /// `true -> false` exactly once per process lifetime.
    pub initializing: bool,
}

/// Sign-up form payload.
#[derive(Debug, Clone)]
pub struct SignUpForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

/// Sign-in form payload.
#[derive(Debug, Clone)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

/// Owns and reconciles [`SessionState`] against the identity backend.
pub struct SessionReconciler {
    backend: Arc<dyn IdentityBackend>,
    profiles: Arc<ProfileStore>,
    state_tx: watch::Sender<SessionState>,
    /// Last applied `(identity id, token)`; unchanged pairs are no-ops.
    last_applied: AsyncMutex<Option<(String, String)>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionReconciler").finish_non_exhaustive()
    }
}

impl SessionReconciler {
    /// Run the startup protocol and spawn the change-event loop.
    ///
    /// The returned reconciler has `initializing == false`; callers that need
    /// the pre-init state should subscribe before awaiting this.
    pub async fn start(
        backend: Arc<dyn IdentityBackend>,
        profiles: Arc<ProfileStore>,
        config: ReconcilerConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState {
            initializing: true,
            ..SessionState::default()
        });
        // Subscribe before the initial lookup so no event can slip between
        // startup reconciliation and the loop taking over.
        let events = backend.subscribe();
        let reconciler = Arc::new(Self {
            backend,
            profiles,
            state_tx,
            last_applied: AsyncMutex::new(None),
            task: StdMutex::new(None),
        });

        reconciler.reconcile_startup().await;

        let handle = tokio::spawn(Self::event_loop(
            reconciler.clone(),
            events,
            config.debounce_window,
        ));
        *reconciler.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        reconciler
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Stop processing change events. Part of process teardown.
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    async fn reconcile_startup(&self) {
        match self.backend.current_session().await {
            Ok(Some(identity)) => {
                let key = (identity.id.clone(), identity.access_token.clone());
                let profile = match self.profiles.fetch(&identity.id).await {
                    Ok(profile) => Some(profile),
                    Err(err) => {
                        warn!(identity = %identity.id, error = %err, "startup profile fetch failed");
                        None
                    }
                };
                *self.last_applied.lock().await = Some(key);
                self.state_tx.send_modify(|s| {
                    s.identity = Some(identity);
                    s.profile = profile;
                    s.initializing = false;
                });
            }
            Ok(None) => {
                self.state_tx.send_modify(|s| s.initializing = false);
            }
            Err(err) => {
                warn!(error = %err, "startup session lookup failed");
                self.state_tx.send_modify(|s| s.initializing = false);
            }
        }
    }

    async fn event_loop(
        this: Arc<Self>,
        mut events: broadcast::Receiver<SessionChange>,
        window: Duration,
    ) {
        loop {
            let mut latest = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "session change stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            // Quiet window: collapse a burst to its final event.
            if !window.is_zero() {
                loop {
                    match tokio::time::timeout(window, events.recv()).await {
                        Ok(Ok(event)) => latest = event,
                        Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                        Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
                    }
                }
            }

            this.apply_change(latest).await;
        }
        debug!("session change stream closed");
    }

    /// Apply a (debounced) change event. Serialized by the event loop.
    async fn apply_change(&self, event: SessionChange) {
        let key = event.dedup_key();
        let mut last = self.last_applied.lock().await;
        if last.as_ref() == Some(&key) {
            debug!("session change is a no-op repeat, skipping");
            return;
        }
        *last = Some(key);
        drop(last);

        match event.identity {
            Some(identity) => {
                let id = identity.id.clone();
                self.state_tx.send_modify(|s| {
                    // A switched identity must never be shown next to the
                    // previous identity's profile while the fetch is out.
                    if s.identity.as_ref().map(|i| i.id.as_str()) != Some(id.as_str()) {
                        s.profile = None;
                    }
                    s.identity = Some(identity);
                });
                match self.profiles.fetch(&id).await {
                    Ok(profile) => {
                        self.install_profile_if_current(&id, profile);
                    }
                    Err(err) => {
                        warn!(identity = %id, error = %err, "profile fetch failed on session change");
                        self.state_tx.send_if_modified(|s| {
                            let current = s.identity.as_ref().map(|i| i.id.as_str()) == Some(id.as_str());
                            if current && s.profile.is_some() {
                                s.profile = None;
                                true
                            } else {
                                false
                            }
                        });
                    }
                }
            }
            None => {
                self.state_tx.send_if_modified(|s| {
                    if s.identity.is_some() || s.profile.is_some() {
                        s.identity = None;
                        s.profile = None;
                        true
                    } else {
                        false
                    }
                });
            }
        }
    }

    /// Stale-result guard: a fetched profile is installed only if the
    /// identity that triggered the fetch is still current.
    fn install_profile_if_current(&self, id: &str, profile: Profile) {
        self.state_tx.send_if_modified(|s| {
            if s.identity.as_ref().map(|i| i.id.as_str()) == Some(id) {
                if s.profile.as_ref() == Some(&profile) {
                    false
                } else {
                    s.profile = Some(profile);
                    true
                }
            } else {
                debug!(identity = id, "discarding stale profile fetch result");
                false
            }
        });
    }

    fn set_loading(&self, loading: bool) {
        self.state_tx.send_modify(|s| s.loading = loading);
    }

    /// Register a new account. Does not establish a session; the backend
    /// requires email confirmation first.
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<()> {
        self.set_loading(true);
        let attributes = SignUpAttributes {
            full_name: form.full_name.clone(),
            phone: form.phone.clone(),
            email: form.email.clone(),
        };
        let result = self
            .backend
            .sign_up(&form.email, &form.password, &attributes)
            .await;
        self.set_loading(false);
        result?;
        info!(email = %form.email, "sign-up submitted, confirmation pending");
        Ok(())
    }

    /// Password sign-in. Installs the identity and its profile on success.
    pub async fn sign_in(&self, form: &SignInForm) -> Result<()> {
        self.set_loading(true);
        let result = self.sign_in_inner(form).await;
        self.set_loading(false);
        result
    }

    async fn sign_in_inner(&self, form: &SignInForm) -> Result<()> {
        let identity = self.backend.sign_in(&form.email, &form.password).await?;
        if !identity.email_confirmed {
            // Revoke the half-established session so the change stream
            // cannot install an unconfirmed identity behind our back.
            if let Err(err) = self.backend.sign_out().await {
                warn!(error = %err, "sign-out after unconfirmed sign-in failed");
            }
            return Err(AuthError::UnconfirmedEmail.into());
        }
        let profile = self.profiles.fetch(&identity.id).await?;
        *self.last_applied.lock().await =
            Some((identity.id.clone(), identity.access_token.clone()));
        self.state_tx.send_modify(|s| {
            s.identity = Some(identity);
            s.profile = Some(profile);
        });
        Ok(())
    }

    /// Sign out. Local state is cleared unconditionally: the user must not
    /// appear logged in against a revoked session, even when the backend
    /// call fails network-side.
    pub async fn logout(&self) -> Result<()> {
        self.set_loading(true);
        let prior_id = self.state_tx.borrow().identity.as_ref().map(|i| i.id.clone());

        if let Err(err) = self.backend.sign_out().await {
            warn!(error = %err, "backend sign-out failed, clearing local state anyway");
        }

        if let Some(id) = prior_id {
            self.profiles.invalidate(&id).await;
        }
        *self.last_applied.lock().await = Some((String::new(), String::new()));
        self.state_tx.send_modify(|s| {
            s.identity = None;
            s.profile = None;
            s.loading = false;
        });
        Ok(())
    }

    /// Re-fetch the current identity's profile, replacing the cached copy
    /// only when it actually changed. Returns whether a change was published.
    pub async fn refresh_profile(&self) -> Result<bool> {
        let Some(id) = self.state_tx.borrow().identity.as_ref().map(|i| i.id.clone()) else {
            return Ok(false);
        };
        let fresh = self.profiles.fetch(&id).await?;
        Ok(self
            .state_tx
            .send_if_modified(|s| {
                let current = s.identity.as_ref().map(|i| i.id.as_str()) == Some(id.as_str());
                if current && s.profile.as_ref() != Some(&fresh) {
                    s.profile = Some(fresh.clone());
                    true
                } else {
                    false
                }
            }))
    }

    pub(crate) fn backend(&self) -> &Arc<dyn IdentityBackend> {
        &self.backend
    }

    pub(crate) fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }
}
