use std::sync::Arc;

use tracing::{debug, info};

use super::domain::{normalize_email, NewTenantProfile, ProfileRole, TenantId};
use super::error::WorkflowError;
use super::retry::RetryPolicy;
use super::store::{ProfileDirectory, StoreError};

/// Find-or-create of tenant profiles keyed by applicant email.
#[derive(Clone)]
pub struct ProfileResolver {
    directory: Arc<dyn ProfileDirectory>,
    retry: RetryPolicy,
}

impl ProfileResolver {
    pub fn new(directory: Arc<dyn ProfileDirectory>, retry: RetryPolicy) -> Self {
        Self { directory, retry }
    }

    /// Resolve the profile for `email`, creating it when absent. Existing profiles are
    /// returned untouched; a lost creation race returns the winner's id.
    pub async fn resolve(
        &self,
        email: &str,
        name: &str,
        phone: &str,
    ) -> Result<TenantId, WorkflowError> {
        let email = validate_email(email)?;

        if let Some(existing) = self.lookup(&email).await? {
            debug!(%email, tenant_id = %existing, "reusing tenant profile");
            return Ok(existing);
        }

        let request = NewTenantProfile {
            email: email.clone(),
            name: name.trim().to_string(),
            phone: phone.trim().to_string(),
            role: ProfileRole::Tenant,
        };

        match self
            .retry
            .run("profiles.create", || self.directory.create(request.clone()))
            .await
        {
            Ok(profile) => {
                info!(%email, tenant_id = %profile.id, "created tenant profile");
                Ok(profile.id)
            }
            Err(StoreError::Conflict) => {
                debug!(%email, "profile created concurrently; re-reading winner");
                self.lookup(&email)
                    .await?
                    .ok_or_else(|| WorkflowError::transient("profiles.find_by_email"))
            }
            Err(err) => Err(WorkflowError::from_store("profiles.create", err)),
        }
    }

    async fn lookup(&self, email: &str) -> Result<Option<TenantId>, WorkflowError> {
        let found = self
            .retry
            .run("profiles.find_by_email", || self.directory.find_by_email(email))
            .await
            .map_err(|err| WorkflowError::from_store("profiles.find_by_email", err))?;
        Ok(found.map(|profile| profile.id))
    }
}

fn validate_email(raw: &str) -> Result<String, WorkflowError> {
    let email = normalize_email(raw);
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };

    if well_formed {
        Ok(email)
    } else {
        Err(WorkflowError::Validation {
            field: "applicant_email",
            reason: format!("'{}' is not a valid email address", raw.trim()),
        })
    }
}
