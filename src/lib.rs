//! Careerfolio core: session reconciliation and profile editing for the
//! talent portal.
//!
//! The crate is organized around one state machine and three collaborators:
//!
//! - [`session::SessionReconciler`] owns the process-wide session state and
//!   reconciles it against identity change events (debounced, deduplicated,
//!   in order).
//! - [`backend`] defines the trait seams for the identity provider, the
//!   record store, and the object store, with REST implementations in
//!   [`backend::rest`].
//! - [`profile::store::ProfileStore`] handles row normalization, the array
//!   CRUD protocol with rollback, and the consolidated full-form commit that
//!   owns the `profile_complete` flag.
//! - [`edit::EditSession`] drives the edit screen lifecycle on top of the
//!   store and [`attachments::AttachmentManager`].

pub mod admin;
pub mod attachments;
pub mod backend;
pub mod config;
pub mod edit;
pub mod error;
pub mod profile;
pub mod session;

pub use admin::AdminDirectory;
pub use attachments::{AttachmentFile, AttachmentKind, AttachmentManager, StoredAttachment};
pub use backend::{Identity, IdentityBackend, ObjectStore, RecordStore, SessionChange};
pub use config::Config;
pub use edit::{AttachmentSlot, EditPhase, EditSession, ProfileForm};
pub use error::{Error, Result};
pub use profile::{Profile, ProfileDraft, Role};
pub use profile::store::ProfileStore;
pub use session::{SessionReconciler, SessionState, SignInForm, SignUpForm};

/// Install the global tracing subscriber.
///
/// Filtering comes from `CAREERFOLIO_LOG` (falling back to `RUST_LOG`, then
/// `careerfolio=info`). Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("CAREERFOLIO_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "careerfolio=info".to_string());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .try_init();
}
