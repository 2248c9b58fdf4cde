//! Entity-level writes and reads on the engine
//!
//! Every write builds the next state on a copy, persists it, and only then
//! swaps it in, so a failed local write leaves memory untouched. Remote
//! propagation follows without being awaited.

use crate::bus::SyncEvent;
use crate::engine::{Collections, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    normalize_email, AppUser, BulkAddReport, BulkRejection, Company, CompanyPatch, EmailLog,
    EmailType, LogPatch, NewCompany, NewLog, NewUser, Snapshot, UserPatch,
};
use crate::remote::Propagation;
use std::collections::HashSet;
use uuid::Uuid;

const UNKNOWN_COMPANY: &str = "Unknown";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl SyncEngine {
    async fn commit(&self, data: &mut Collections, next: Collections) -> SyncResult<()> {
        if let Err(e) = self
            .inner
            .cache
            .persist(&next.companies, &next.logs, &next.users)
            .await
        {
            tracing::error!(error = %e, "Failed to persist local change");
            self.emit(SyncEvent::PersistFailed { error: e.to_string() });
            return Err(e);
        }
        *data = next;
        Ok(())
    }

    // Companies

    /// Companies, newest first
    pub async fn get_companies(&self) -> Vec<Company> {
        let mut companies = self.inner.data.lock().await.companies.clone();
        companies.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        companies
    }

    pub async fn get_company(&self, id: &str) -> Option<Company> {
        let data = self.inner.data.lock().await;
        data.companies.iter().find(|c| c.id == id).cloned()
    }

    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` for a blank name or no email, or a
    /// database error if the local write fails.
    pub async fn add_company(&self, new: NewCompany) -> SyncResult<Company> {
        new.validate()?;
        let company = new.into_company(new_id(), self.inner.clock.now_millis());

        let mut data = self.inner.data.lock().await;
        let mut next = data.clone();
        next.companies.push(company.clone());
        self.commit(&mut data, next).await?;
        drop(data);

        tracing::debug!(company_id = %company.id, "Company added");
        self.propagate(Propagation::UpsertCompany(company.clone()));
        Ok(company)
    }

    /// # Errors
    ///
    /// Returns `SyncError::NotFound` for an unknown id, `SyncError::InvalidInput`
    /// for an invalid patch, or a database error.
    pub async fn update_company(&self, id: &str, patch: &CompanyPatch) -> SyncResult<Company> {
        let mut data = self.inner.data.lock().await;
        let mut next = data.clone();
        let company = next
            .companies
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("company {id}")))?;
        patch.apply(company)?;
        let updated = company.clone();

        self.commit(&mut data, next).await?;
        drop(data);

        self.propagate(Propagation::UpsertCompany(updated.clone()));
        Ok(updated)
    }

    /// Delete a company and every log referencing it. Returns false if the id
    /// was unknown.
    ///
    /// # Errors
    ///
    /// Returns a database error if the local write fails.
    pub async fn delete_company(&self, id: &str) -> SyncResult<bool> {
        let mut data = self.inner.data.lock().await;
        if !data.companies.iter().any(|c| c.id == id) {
            return Ok(false);
        }

        let next = Collections {
            companies: data.companies.iter().filter(|c| c.id != id).cloned().collect(),
            logs: data.logs.iter().filter(|l| l.company_id != id).cloned().collect(),
            users: data.users.clone(),
        };
        let removed_logs = data.logs.len() - next.logs.len();
        self.commit(&mut data, next).await?;
        drop(data);

        tracing::debug!(company_id = %id, removed_logs, "Company deleted");
        self.propagate(Propagation::DeleteCompany(id.to_string()));
        Ok(true)
    }

    /// Insert candidates whose emails collide with no existing company and no
    /// earlier candidate. Only the inserted companies are pushed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the local write fails. Invalid candidates
    /// are reported in the result, not as an error.
    pub async fn bulk_add_companies(&self, items: Vec<NewCompany>) -> SyncResult<BulkAddReport> {
        let now = self.inner.clock.now_millis();
        let mut report = BulkAddReport::default();
        let mut added = Vec::new();

        let mut data = self.inner.data.lock().await;
        let mut seen: HashSet<String> = data
            .companies
            .iter()
            .flat_map(|c| c.emails.iter().map(|e| normalize_email(e)))
            .collect();

        for (index, item) in items.into_iter().enumerate() {
            if let Err(e) = item.validate() {
                report.rejected.push(BulkRejection {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }

            let emails: Vec<String> = item
                .cleaned_emails()
                .iter()
                .map(|e| normalize_email(e))
                .collect();
            if emails.iter().any(|e| seen.contains(e)) {
                report.skipped += 1;
                continue;
            }

            seen.extend(emails);
            added.push(item.into_company(new_id(), now));
        }

        report.added = added.len();
        if added.is_empty() {
            return Ok(report);
        }

        let mut next = data.clone();
        next.companies.extend(added.iter().cloned());
        self.commit(&mut data, next).await?;
        drop(data);

        tracing::info!(
            added = report.added,
            skipped = report.skipped,
            rejected = report.rejected.len(),
            "Bulk import applied"
        );
        self.propagate(Propagation::Batch(Snapshot {
            contacts: added,
            logs: Vec::new(),
        }));
        Ok(report)
    }

    /// Name of the company a log belongs to, or "Unknown" if it is gone
    pub async fn company_name_for(&self, log: &EmailLog) -> String {
        let data = self.inner.data.lock().await;
        data.companies
            .iter()
            .find(|c| c.id == log.company_id)
            .map_or_else(|| UNKNOWN_COMPANY.to_string(), |c| c.company_name.clone())
    }

    // Logs

    /// Logs, most recently sent first
    pub async fn get_logs(&self) -> Vec<EmailLog> {
        let mut logs = self.inner.data.lock().await.logs.clone();
        logs.sort_by(|a, b| b.date_sent.cmp(&a.date_sent));
        logs
    }

    /// Whether a first-time email was already logged to `email`.
    ///
    /// Callers check this before logging a first-time email; `add_log` does
    /// not enforce it.
    pub async fn has_received_first_time(&self, email: &str) -> bool {
        let wanted = normalize_email(email);
        let data = self.inner.data.lock().await;
        data.logs.iter().any(|l| {
            l.email_type == EmailType::FirstTime && normalize_email(&l.email_address) == wanted
        })
    }

    /// Record a sent email. A follow-up completes every earlier open log to
    /// the same address.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` for a blank address, or a database
    /// error.
    pub async fn add_log(&self, new: NewLog) -> SyncResult<EmailLog> {
        if new.email_address.trim().is_empty() {
            return Err(SyncError::InvalidInput("email address must not be empty".to_string()));
        }
        let log = new.into_log(new_id());

        let mut data = self.inner.data.lock().await;
        let mut next = data.clone();
        let mut closed = Vec::new();

        if log.email_type == EmailType::FollowUp {
            let address = normalize_email(&log.email_address);
            for prior in next
                .logs
                .iter_mut()
                .filter(|l| !l.completed && normalize_email(&l.email_address) == address)
            {
                prior.completed = true;
                closed.push(prior.clone());
            }
        }
        next.logs.push(log.clone());
        self.commit(&mut data, next).await?;
        drop(data);

        tracing::debug!(
            log_id = %log.id,
            email_type = log.email_type.as_str(),
            closed = closed.len(),
            "Log added"
        );
        if closed.is_empty() {
            self.propagate(Propagation::UpsertLog(log.clone()));
        } else {
            closed.push(log.clone());
            self.propagate(Propagation::Batch(Snapshot {
                contacts: Vec::new(),
                logs: closed,
            }));
        }
        Ok(log)
    }

    /// # Errors
    ///
    /// Returns `SyncError::NotFound` for an unknown id, or a database error.
    pub async fn update_log(&self, id: &str, patch: &LogPatch) -> SyncResult<EmailLog> {
        let mut data = self.inner.data.lock().await;
        let mut next = data.clone();
        let log = next
            .logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("log {id}")))?;
        patch.apply(log);
        let updated = log.clone();

        self.commit(&mut data, next).await?;
        drop(data);

        self.propagate(Propagation::UpsertLog(updated.clone()));
        Ok(updated)
    }

    /// Mark a log's follow-up as done
    ///
    /// # Errors
    ///
    /// Same as [`SyncEngine::update_log`].
    pub async fn complete_log(&self, id: &str) -> SyncResult<EmailLog> {
        self.update_log(id, &LogPatch::completed()).await
    }

    /// Returns false if the id was unknown.
    ///
    /// # Errors
    ///
    /// Returns a database error if the local write fails.
    pub async fn delete_log(&self, id: &str) -> SyncResult<bool> {
        let mut data = self.inner.data.lock().await;
        if !data.logs.iter().any(|l| l.id == id) {
            return Ok(false);
        }

        let mut next = data.clone();
        next.logs.retain(|l| l.id != id);
        self.commit(&mut data, next).await?;
        drop(data);

        self.propagate(Propagation::DeleteLog(id.to_string()));
        Ok(true)
    }

    // Users

    pub async fn get_users(&self) -> Vec<AppUser> {
        self.inner.data.lock().await.users.clone()
    }

    /// Create a user locally and send it, password included, to the remote
    /// store. The cached copy carries no password.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` for a blank or taken username, or a
    /// database error.
    pub async fn add_user(&self, new: NewUser) -> SyncResult<AppUser> {
        let username = new.username.trim().to_string();
        if username.is_empty() || new.password.is_empty() {
            return Err(SyncError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        let mut data = self.inner.data.lock().await;
        let wanted = username.to_lowercase();
        if data.users.iter().any(|u| u.username.to_lowercase() == wanted) {
            return Err(SyncError::InvalidInput(format!("username {username} is taken")));
        }

        let user = AppUser {
            id: new_id(),
            username,
            password: Some(new.password),
            role: new.role,
            created_at: self.inner.clock.now_millis(),
        };
        let cached = user.without_password();

        let mut next = data.clone();
        next.users.push(cached.clone());
        self.commit(&mut data, next).await?;
        drop(data);

        tracing::info!(user_id = %cached.id, role = ?cached.role, "User added");
        self.propagate(Propagation::CreateUser(user));
        Ok(cached)
    }

    /// # Errors
    ///
    /// Returns `SyncError::NotFound` for an unknown id,
    /// `SyncError::InvalidInput` for a blank or taken username, or a database
    /// error.
    pub async fn update_user(&self, id: &str, patch: UserPatch) -> SyncResult<AppUser> {
        let mut data = self.inner.data.lock().await;

        if let Some(username) = &patch.username {
            let wanted = username.trim().to_lowercase();
            if data
                .users
                .iter()
                .any(|u| u.id != id && u.username.to_lowercase() == wanted)
            {
                return Err(SyncError::InvalidInput(format!("username {username} is taken")));
            }
        }

        let mut next = data.clone();
        let user = next
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("user {id}")))?;
        patch.apply(user)?;
        let updated = user.clone();

        self.commit(&mut data, next).await?;
        drop(data);

        self.propagate(Propagation::PatchUser {
            id: id.to_string(),
            patch,
        });
        Ok(updated)
    }

    /// Returns false if the id was unknown.
    ///
    /// # Errors
    ///
    /// Returns a database error if the local write fails.
    pub async fn delete_user(&self, id: &str) -> SyncResult<bool> {
        let mut data = self.inner.data.lock().await;
        if !data.users.iter().any(|u| u.id == id) {
            return Ok(false);
        }

        let mut next = data.clone();
        next.users.retain(|u| u.id != id);
        self.commit(&mut data, next).await?;
        drop(data);

        self.propagate(Propagation::DeleteUser(id.to_string()));
        Ok(true)
    }
}
