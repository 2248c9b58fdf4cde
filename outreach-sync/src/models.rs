//! Entity types shared by the local cache and the remote store
//!
//! Field names serialize in camelCase so the JSON stored locally and the JSON
//! exchanged with the remote store use the same shape.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Normalize an email address for comparisons (trim + lowercase).
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn clean_emails(emails: &[String]) -> Vec<String> {
    emails
        .iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

/// A company being contacted (the remote store calls these "contacts")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub company_name: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_interested: bool,
    /// Epoch milliseconds, never mutated after creation
    pub created_at: i64,
}

impl Company {
    /// Whether any of this company's emails matches `email` after normalization
    pub fn has_email(&self, email: &str) -> bool {
        let wanted = normalize_email(email);
        self.emails.iter().any(|e| normalize_email(e) == wanted)
    }
}

/// Input for creating a company
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCompany {
    pub company_name: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_interested: bool,
}

impl NewCompany {
    pub fn new(company_name: impl Into<String>, emails: Vec<String>) -> Self {
        Self {
            company_name: company_name.into(),
            emails,
            ..Self::default()
        }
    }

    /// Check required fields before the company enters the insert path.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` when the name is blank or no
    /// non-blank email is present.
    pub fn validate(&self) -> SyncResult<()> {
        if self.company_name.trim().is_empty() {
            return Err(SyncError::InvalidInput(
                "company name must not be empty".to_string(),
            ));
        }
        if !self.emails.iter().any(|e| !e.trim().is_empty()) {
            return Err(SyncError::InvalidInput(
                "at least one email address is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Emails with surrounding whitespace removed and blanks dropped
    pub fn cleaned_emails(&self) -> Vec<String> {
        clean_emails(&self.emails)
    }

    pub(crate) fn into_company(self, id: String, created_at: i64) -> Company {
        let emails = self.cleaned_emails();
        Company {
            id,
            company_name: self.company_name.trim().to_string(),
            emails,
            phone_number: self.phone_number,
            tags: self.tags,
            location: self.location,
            notes: self.notes,
            is_interested: self.is_interested,
            created_at,
        }
    }
}

/// Partial update for a company; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_interested: Option<bool>,
}

impl CompanyPatch {
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` if the patch would blank the name.
    pub fn apply(&self, company: &mut Company) -> SyncResult<()> {
        if let Some(name) = &self.company_name {
            if name.trim().is_empty() {
                return Err(SyncError::InvalidInput(
                    "company name must not be empty".to_string(),
                ));
            }
            company.company_name = name.trim().to_string();
        }
        if let Some(emails) = &self.emails {
            let cleaned = clean_emails(emails);
            if cleaned.is_empty() {
                return Err(SyncError::InvalidInput(
                    "at least one email address is required".to_string(),
                ));
            }
            company.emails = cleaned;
        }
        if let Some(phone) = &self.phone_number {
            company.phone_number = Some(phone.clone());
        }
        if let Some(tags) = &self.tags {
            company.tags = tags.clone();
        }
        if let Some(location) = &self.location {
            company.location = Some(location.clone());
        }
        if let Some(notes) = &self.notes {
            company.notes = Some(notes.clone());
        }
        if let Some(interested) = self.is_interested {
            company.is_interested = interested;
        }
        Ok(())
    }
}

/// Kind of outreach email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmailType {
    #[serde(rename = "First-time")]
    FirstTime,
    #[serde(rename = "Follow-up")]
    FollowUp,
}

impl EmailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailType::FirstTime => "First-time",
            EmailType::FollowUp => "Follow-up",
        }
    }
}

/// A logged outreach email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLog {
    pub id: String,
    pub company_id: String,
    pub email_address: String,
    pub email_type: EmailType,
    pub date_sent: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_date: Option<i64>,
    #[serde(default)]
    pub completed: bool,
}

impl EmailLog {
    /// An open follow-up obligation: a follow-up date that is not completed
    pub fn is_open_follow_up(&self) -> bool {
        self.follow_up_date.is_some() && !self.completed
    }
}

/// Input for logging an email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLog {
    pub company_id: String,
    pub email_address: String,
    pub email_type: EmailType,
    pub date_sent: i64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub follow_up_date: Option<i64>,
    #[serde(default)]
    pub completed: bool,
}

impl NewLog {
    pub(crate) fn into_log(self, id: String) -> EmailLog {
        EmailLog {
            id,
            company_id: self.company_id,
            email_address: self.email_address,
            email_type: self.email_type,
            date_sent: self.date_sent,
            note: self.note,
            follow_up_date: self.follow_up_date,
            completed: self.completed,
        }
    }
}

/// Partial update for a log; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_type: Option<EmailType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_sent: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl LogPatch {
    pub fn completed() -> Self {
        Self {
            completed: Some(true),
            ..Self::default()
        }
    }

    pub fn apply(&self, log: &mut EmailLog) {
        if let Some(address) = &self.email_address {
            log.email_address = address.clone();
        }
        if let Some(kind) = self.email_type {
            log.email_type = kind;
        }
        if let Some(sent) = self.date_sent {
            log.date_sent = sent;
        }
        if let Some(note) = &self.note {
            log.note = Some(note.clone());
        }
        if let Some(follow_up) = self.follow_up_date {
            log.follow_up_date = Some(follow_up);
        }
        if let Some(completed) = self.completed {
            log.completed = completed;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// An application user. The password is only ever present on the way to the
/// remote store, which hashes it; cached copies never carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub role: Role,
    pub created_at: i64,
}

impl AppUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Copy of this user with the password removed
    pub fn without_password(&self) -> Self {
        Self {
            password: None,
            ..self.clone()
        }
    }
}

/// Input for creating a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
}

/// Partial update for a user; serialized as the PATCH body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl UserPatch {
    /// Apply to a cached user. A new password only travels to the remote
    /// store, so it is not applied here.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` if the patch would blank the username.
    pub fn apply(&self, user: &mut AppUser) -> SyncResult<()> {
        if let Some(username) = &self.username {
            if username.trim().is_empty() {
                return Err(SyncError::InvalidInput("username must not be empty".to_string()));
            }
            user.username = username.trim().to_string();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        Ok(())
    }
}

/// Login request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Full state of both synchronized collections, as exchanged with
/// `GET /api/sync/all` and `POST /api/sync`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub contacts: Vec<Company>,
    #[serde(default)]
    pub logs: Vec<EmailLog>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty() && self.logs.is_empty()
    }
}

/// A bulk-add candidate that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkRejection {
    /// Position of the candidate in the input
    pub index: usize,
    pub reason: String,
}

/// Outcome of `bulk_add_companies`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkAddReport {
    pub added: usize,
    pub skipped: usize,
    pub rejected: Vec<BulkRejection>,
}
