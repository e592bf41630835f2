//! The profile edit flow: one controller per opened edit screen.
//!
//! An [`EditSession`] is authorized at open time (self-edit, or any profile
//! when the caller is an admin), loads the subject's current row into a
//! mutable form, applies incremental array mutations through the store's
//! CRUD protocol, and finishes with a validated full-form submit that
//! uploads pending attachments, commits every field in one write, and
//! recomputes the completeness flag.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use crate::attachments::{AttachmentFile, AttachmentKind, AttachmentManager};
use crate::error::{AuthError, ProfileError, Result, ValidationError};
use crate::profile::{
    Address, ArrayField, EducationEntry, EmploymentEntry, Profile, ProfileDraft, ProjectEntry,
    phone_is_valid,
};
use crate::session::SessionReconciler;

/// Lifecycle of an edit screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    /// Authorized but not yet loaded.
    Loading,
    /// Form is editable.
    Ready,
    /// A submit is in flight; further submits are rejected.
    Submitting,
    /// Submit succeeded; the screen navigates away.
    Redirected,
}

/// One attachment position on the form.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSlot {
    Absent,
    /// Committed object key from a previous save.
    Stored(String),
    /// A newly picked file, uploaded on submit.
    Pending(AttachmentFile),
}

impl Default for AttachmentSlot {
    fn default() -> Self {
        Self::Absent
    }
}

impl AttachmentSlot {
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    fn from_key(key: Option<&str>) -> Self {
        match key.filter(|k| !k.is_empty()) {
            Some(key) => Self::Stored(key.to_string()),
            None => Self::Absent,
        }
    }
}

/// The mutable form state backing the edit screen.
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub dob: Option<NaiveDate>,
    pub address: Address,
    pub education: Vec<EducationEntry>,
    pub employment: Vec<EmploymentEntry>,
    pub projects: Vec<ProjectEntry>,
    pub skills: Vec<String>,
    pub profile_pic: AttachmentSlot,
    pub resume: AttachmentSlot,
}

impl ProfileForm {
    fn from_profile(profile: &Profile) -> Self {
        Self {
            full_name: profile.full_name.clone(),
            email: profile.email.clone(),
            phone: profile.phone.clone(),
            dob: profile.dob,
            address: profile.address.clone(),
            education: profile.education.clone(),
            employment: profile.employment.clone(),
            projects: profile.projects.clone(),
            skills: profile.skills.clone(),
            profile_pic: AttachmentSlot::from_key(profile.profile_pic.as_deref()),
            resume: AttachmentSlot::from_key(profile.resume.as_deref()),
        }
    }
}

/// Controller for editing one profile.
#[derive(Debug)]
pub struct EditSession {
    reconciler: Arc<SessionReconciler>,
    attachments: Arc<AttachmentManager>,
    subject_id: String,
    self_edit: bool,
    phase: EditPhase,
    /// Committed object keys, used as delete targets when replacing.
    stored_pic_key: Option<String>,
    stored_resume_key: Option<String>,
    pub form: ProfileForm,
}

impl EditSession {
    /// Authorize an edit session.
    ///
    /// Without `subject` the caller edits their own profile. A `subject`
    /// other than the caller requires the caller's profile to carry the
    /// admin role.
    pub fn open(
        reconciler: Arc<SessionReconciler>,
        attachments: Arc<AttachmentManager>,
        subject: Option<&str>,
    ) -> Result<Self> {
        let state = reconciler.state();
        let identity = state.identity.as_ref().ok_or(AuthError::Unauthorized)?;
        let subject_id = subject.unwrap_or(&identity.id).to_string();
        let self_edit = subject_id == identity.id;
        if !self_edit && !state.profile.as_ref().is_some_and(Profile::is_admin) {
            return Err(AuthError::Unauthorized.into());
        }
        Ok(Self {
            reconciler,
            attachments,
            subject_id,
            self_edit,
            phase: EditPhase::Loading,
            stored_pic_key: None,
            stored_resume_key: None,
            form: ProfileForm::default(),
        })
    }

    /// Fetch the subject's row and populate the form.
    pub async fn load(&mut self) -> Result<()> {
        let profile = self.reconciler.profiles().fetch(&self.subject_id).await?;
        self.stored_pic_key = profile.profile_pic.clone();
        self.stored_resume_key = profile.resume.clone();
        self.form = ProfileForm::from_profile(&profile);
        self.phase = EditPhase::Ready;
        Ok(())
    }

    pub fn phase(&self) -> EditPhase {
        self.phase
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    // Array mutations commit immediately through the store's protocol and
    // leave the form untouched when the backend rejects the write.

    pub async fn add_education(&mut self, entry: EducationEntry) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .push_entry(
                &self.subject_id,
                ArrayField::Education,
                &mut self.form.education,
                entry,
            )
            .await?;
        Ok(())
    }

    pub async fn update_education(&mut self, index: usize, entry: EducationEntry) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .replace_entry(
                &self.subject_id,
                ArrayField::Education,
                &mut self.form.education,
                index,
                entry,
            )
            .await?;
        Ok(())
    }

    pub async fn remove_education(&mut self, index: usize) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .remove_entry(
                &self.subject_id,
                ArrayField::Education,
                &mut self.form.education,
                index,
            )
            .await?;
        Ok(())
    }

    pub async fn add_employment(&mut self, entry: EmploymentEntry) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .push_entry(
                &self.subject_id,
                ArrayField::Employment,
                &mut self.form.employment,
                entry,
            )
            .await?;
        Ok(())
    }

    pub async fn update_employment(&mut self, index: usize, entry: EmploymentEntry) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .replace_entry(
                &self.subject_id,
                ArrayField::Employment,
                &mut self.form.employment,
                index,
                entry,
            )
            .await?;
        Ok(())
    }

    pub async fn remove_employment(&mut self, index: usize) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .remove_entry(
                &self.subject_id,
                ArrayField::Employment,
                &mut self.form.employment,
                index,
            )
            .await?;
        Ok(())
    }

    pub async fn add_project(&mut self, entry: ProjectEntry) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .push_entry(
                &self.subject_id,
                ArrayField::Projects,
                &mut self.form.projects,
                entry,
            )
            .await?;
        Ok(())
    }

    pub async fn update_project(&mut self, index: usize, entry: ProjectEntry) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .replace_entry(
                &self.subject_id,
                ArrayField::Projects,
                &mut self.form.projects,
                index,
                entry,
            )
            .await?;
        Ok(())
    }

    pub async fn remove_project(&mut self, index: usize) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .remove_entry(
                &self.subject_id,
                ArrayField::Projects,
                &mut self.form.projects,
                index,
            )
            .await?;
        Ok(())
    }

    pub async fn add_skill(&mut self, skill: String) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .push_entry(
                &self.subject_id,
                ArrayField::Skills,
                &mut self.form.skills,
                skill,
            )
            .await?;
        Ok(())
    }

    pub async fn remove_skill(&mut self, index: usize) -> Result<()> {
        let store = self.reconciler.profiles().clone();
        store
            .remove_entry(
                &self.subject_id,
                ArrayField::Skills,
                &mut self.form.skills,
                index,
            )
            .await?;
        Ok(())
    }

    /// Stage a new profile picture; uploaded on the next submit.
    pub fn set_profile_pic(&mut self, file: AttachmentFile) {
        self.form.profile_pic = AttachmentSlot::Pending(file);
    }

    /// Stage a new resume; uploaded on the next submit.
    pub fn set_resume(&mut self, file: AttachmentFile) {
        self.form.resume = AttachmentSlot::Pending(file);
    }

    /// Validate and commit the whole form. Returns the recomputed
    /// completeness flag.
    ///
    /// Waits for any in-flight array commit on the same profile.
    pub async fn submit(&mut self) -> Result<bool> {
        self.submit_with(false).await
    }

    /// Like [`submit`](Self::submit) but fails with [`ProfileError::Busy`]
    /// instead of waiting when another write is in flight.
    pub async fn try_submit(&mut self) -> Result<bool> {
        self.submit_with(true).await
    }

    async fn submit_with(&mut self, fail_if_busy: bool) -> Result<bool> {
        if self.phase != EditPhase::Ready {
            return Err(ProfileError::Busy {
                id: self.subject_id.clone(),
            }
            .into());
        }
        self.validate()?;

        self.phase = EditPhase::Submitting;
        match self.commit(fail_if_busy).await {
            Ok(complete) => {
                self.phase = EditPhase::Redirected;
                info!(profile = %self.subject_id, complete, "profile saved");
                Ok(complete)
            }
            Err(err) => {
                // Form state and any already-uploaded attachment keys are
                // kept so the user can retry.
                self.phase = EditPhase::Ready;
                Err(err)
            }
        }
    }

    /// Field rules checked before any upload or write happens.
    fn validate(&self) -> Result<()> {
        let form = &self.form;
        if form.full_name.trim().is_empty() {
            return Err(ValidationError::MissingField("full_name").into());
        }
        if form.email.trim().is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }
        if form.phone.trim().is_empty() {
            return Err(ValidationError::MissingField("phone").into());
        }
        if !phone_is_valid(&form.phone) {
            return Err(ValidationError::PhoneFormat.into());
        }
        if form.dob.is_none() {
            return Err(ValidationError::MissingField("dob").into());
        }
        if form.education.is_empty() {
            return Err(ValidationError::MissingEducation.into());
        }
        if !form.profile_pic.is_present() {
            return Err(ValidationError::MissingAttachment(AttachmentKind::ProfilePic).into());
        }
        if !form.resume.is_present() {
            return Err(ValidationError::MissingAttachment(AttachmentKind::Resume).into());
        }
        if !form.address.is_complete() {
            return Err(ValidationError::IncompleteAddress.into());
        }
        // Reject bad pending files up front so a valid picture is never
        // uploaded alongside a rejected resume.
        if let AttachmentSlot::Pending(file) = &form.profile_pic {
            self.attachments
                .validate(AttachmentKind::ProfilePic, file)?;
        }
        if let AttachmentSlot::Pending(file) = &form.resume {
            self.attachments.validate(AttachmentKind::Resume, file)?;
        }
        Ok(())
    }

    async fn commit(&mut self, fail_if_busy: bool) -> Result<bool> {
        if let AttachmentSlot::Pending(file) = self.form.profile_pic.clone() {
            let stored = self
                .attachments
                .replace(
                    AttachmentKind::ProfilePic,
                    &self.subject_id,
                    &file,
                    self.stored_pic_key.as_deref(),
                )
                .await?;
            self.stored_pic_key = Some(stored.key.clone());
            self.form.profile_pic = AttachmentSlot::Stored(stored.key);
        }
        if let AttachmentSlot::Pending(file) = self.form.resume.clone() {
            let stored = self
                .attachments
                .replace(
                    AttachmentKind::Resume,
                    &self.subject_id,
                    &file,
                    self.stored_resume_key.as_deref(),
                )
                .await?;
            self.stored_resume_key = Some(stored.key.clone());
            self.form.resume = AttachmentSlot::Stored(stored.key);
        }

        let draft = ProfileDraft {
            full_name: self.form.full_name.trim().to_string(),
            email: self.form.email.trim().to_string(),
            phone: self.form.phone.clone(),
            dob: self.form.dob,
            address: self.form.address.clone(),
            education: self.form.education.clone(),
            employment: self.form.employment.clone(),
            projects: self.form.projects.clone(),
            skills: self.form.skills.clone(),
            profile_pic: self.stored_pic_key.clone(),
            resume: self.stored_resume_key.clone(),
        };

        let store = self.reconciler.profiles();
        let complete = if fail_if_busy {
            store.try_commit_full(&self.subject_id, &draft).await?
        } else {
            store.commit_full(&self.subject_id, &draft).await?
        };

        if self.self_edit {
            // Keep the identity's display name in sync. Best-effort: the
            // profile row is already authoritative at this point.
            if let Err(err) = self
                .reconciler
                .backend()
                .update_attributes(json!({ "full_name": draft.full_name }))
                .await
            {
                warn!(error = %err, "identity attribute sync failed after profile save");
            }
            if let Err(err) = self.reconciler.refresh_profile().await {
                warn!(error = %err, "session profile refresh failed after save");
            }
        }

        Ok(complete)
    }
}
