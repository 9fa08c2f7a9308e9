use tracing::{info, instrument};

use super::context::WorkflowContext;
use super::domain::{ApplicationId, ApplicationStatus, EntityKind};
use super::error::WorkflowError;
use super::events::TenancyEvent;

/// Single-step pending to rejected transition. Nothing downstream needs undoing.
#[derive(Clone)]
pub struct RejectionWorkflow {
    ctx: WorkflowContext,
}

impl RejectionWorkflow {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(application_id = %application_id))]
    pub async fn reject(&self, application_id: &ApplicationId) -> Result<(), WorkflowError> {
        let retry = self.ctx.settings.retry;
        let applications = &self.ctx.stores.applications;

        let rejected = retry
            .run("applications.reject", || {
                applications.transition(
                    application_id,
                    ApplicationStatus::Pending,
                    ApplicationStatus::Rejected,
                )
            })
            .await
            .map_err(|err| WorkflowError::from_store("applications.reject", err))?;

        if !rejected {
            let current = retry
                .run("applications.fetch", || applications.fetch(application_id))
                .await
                .map_err(|err| WorkflowError::from_store("applications.fetch", err))?
                .ok_or_else(|| {
                    WorkflowError::missing("application_id", EntityKind::Application, application_id)
                })?;

            return Err(WorkflowError::invalid_state(
                EntityKind::Application,
                application_id,
                ApplicationStatus::Pending.label(),
                current.status.label(),
            ));
        }

        info!("application rejected");
        self.ctx.emit(TenancyEvent::ApplicationRejected {
            application_id: application_id.clone(),
        });
        Ok(())
    }
}
