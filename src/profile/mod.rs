//! Profile data model, row normalization, and field rules.
//!
//! Rows arrive from the record store with some representation variance:
//! array fields and the address sometimes come back JSON-encoded as strings,
//! arrays may be absent entirely, and date fields may be empty strings.
//! [`Profile::from_row`] is the single normalization point; everything
//! downstream sees the canonical structured shape.

pub mod store;

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProfileError;

/// Table holding profile rows.
pub const PROFILES_TABLE: &str = "profiles";

/// Access role stored on the profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Postal address. All-or-nothing: the address counts as complete only when
/// every field is populated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
}

impl Address {
    pub fn is_complete(&self) -> bool {
        [
            &self.street,
            &self.city,
            &self.state,
            &self.country,
            &self.postal_code,
        ]
        .iter()
        .all(|f| !f.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EducationEntry {
    pub college_name: String,
    pub branch: String,
    pub percentage: Option<f64>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmploymentEntry {
    pub company_name: String,
    pub role: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectEntry {
    pub project_name: String,
    pub description: String,
    pub duration: String,
}

/// An element of one of the profile's ordered sequences.
///
/// Blank entries (every sub-field empty/whitespace) are rejected before any
/// backend call.
pub trait ArrayEntry: Clone + Serialize + Send + Sync {
    fn is_blank(&self) -> bool;
}

impl ArrayEntry for EducationEntry {
    fn is_blank(&self) -> bool {
        self.college_name.trim().is_empty()
            && self.branch.trim().is_empty()
            && self.percentage.is_none()
            && self.start_year.is_none()
            && self.end_year.is_none()
    }
}

impl ArrayEntry for EmploymentEntry {
    fn is_blank(&self) -> bool {
        self.company_name.trim().is_empty()
            && self.role.trim().is_empty()
            && self.start_year.is_none()
            && self.end_year.is_none()
    }
}

impl ArrayEntry for ProjectEntry {
    fn is_blank(&self) -> bool {
        self.project_name.trim().is_empty()
            && self.description.trim().is_empty()
            && self.duration.trim().is_empty()
    }
}

impl ArrayEntry for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

/// The four ordered sequences covered by the uniform array CRUD protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayField {
    Education,
    Employment,
    Projects,
    Skills,
}

impl ArrayField {
    /// Column name on the profile row.
    pub fn column(self) -> &'static str {
        match self {
            Self::Education => "education",
            Self::Employment => "employment",
            Self::Projects => "projects",
            Self::Skills => "skills",
        }
    }
}

impl std::fmt::Display for ArrayField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// The extended per-user record owned by this application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, deserialize_with = "lenient_date")]
    pub dob: Option<NaiveDate>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub employment: Vec<EmploymentEntry>,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
    #[serde(default)]
    pub resume: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub profile_complete: bool,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Columns that sometimes arrive JSON-encoded as strings.
const STRINGLY_COLUMNS: [&str; 5] = ["education", "employment", "projects", "skills", "address"];

impl Profile {
    /// Normalize a raw row into the canonical structured shape.
    pub fn from_row(mut row: serde_json::Value) -> Result<Self, ProfileError> {
        if let Some(object) = row.as_object_mut() {
            for column in STRINGLY_COLUMNS {
                let Some(value) = object.get_mut(column) else {
                    continue;
                };
                if let Some(encoded) = value.as_str() {
                    match serde_json::from_str::<serde_json::Value>(encoded) {
                        Ok(decoded) => *value = decoded,
                        Err(_) => *value = serde_json::Value::Null,
                    }
                }
                // PostgREST returns SQL NULL columns as JSON null; serde
                // defaults only apply to absent keys.
                if value.is_null() {
                    object.remove(column);
                }
            }
            for column in ["profile_pic", "resume", "dob", "updated_at", "role"] {
                if object.get(column).is_some_and(|v| v.is_null()) {
                    object.remove(column);
                }
            }
        }
        serde_json::from_value(row).map_err(|e| ProfileError::Malformed(e.to_string()))
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Replace one array column from its committed JSON value. Used by the
    /// store's write-through cache after a successful array commit.
    pub(crate) fn set_array_column(&mut self, field: ArrayField, value: &serde_json::Value) {
        match field {
            ArrayField::Education => {
                if let Ok(v) = serde_json::from_value(value.clone()) {
                    self.education = v;
                }
            }
            ArrayField::Employment => {
                if let Ok(v) = serde_json::from_value(value.clone()) {
                    self.employment = v;
                }
            }
            ArrayField::Projects => {
                if let Ok(v) = serde_json::from_value(value.clone()) {
                    self.projects = v;
                }
            }
            ArrayField::Skills => {
                if let Ok(v) = serde_json::from_value(value.clone()) {
                    self.skills = v;
                }
            }
        }
    }
}

/// Everything a full-form submit writes, minus derived fields.
///
/// `profile_complete` is not part of the draft: `commit_full` alone
/// recomputes and persists it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProfileDraft {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub dob: Option<NaiveDate>,
    pub address: Address,
    pub education: Vec<EducationEntry>,
    pub employment: Vec<EmploymentEntry>,
    pub projects: Vec<ProjectEntry>,
    pub skills: Vec<String>,
    pub profile_pic: Option<String>,
    pub resume: Option<String>,
}

impl ProfileDraft {
    /// The completeness invariant: true iff full_name, email, phone, dob,
    /// at least one education entry, both attachments, and a fully populated
    /// address are all present.
    pub fn is_complete(&self) -> bool {
        !self.full_name.trim().is_empty()
            && !self.email.trim().is_empty()
            && !self.phone.trim().is_empty()
            && self.dob.is_some()
            && !self.education.is_empty()
            && self.profile_pic.as_deref().is_some_and(|k| !k.is_empty())
            && self.resume.as_deref().is_some_and(|k| !k.is_empty())
            && self.address.is_complete()
    }
}

static PHONE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Whether a phone number satisfies the `^\d{10}$` field rule.
pub fn phone_is_valid(phone: &str) -> bool {
    PHONE_PATTERN
        .get_or_init(|| Regex::new(r"^\d{10}$").expect("static pattern"))
        .is_match(phone)
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()))
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}
