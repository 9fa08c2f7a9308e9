use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::{ApplicationId, PropertyId, TenancyId, UnitId, UnitStatus};
use super::error::{ErrorKind, WorkflowError};
use super::service::TenancyLifecycleService;
use super::store::UnitFilter;

/// Router builder exposing the lifecycle operations over HTTP.
pub fn tenancy_router(service: Arc<TenancyLifecycleService>) -> Router {
    Router::new()
        .route(
            "/api/v1/applications/:application_id",
            get(application_handler),
        )
        .route(
            "/api/v1/applications/:application_id/assign",
            post(assign_handler),
        )
        .route(
            "/api/v1/applications/:application_id/reject",
            post(reject_handler),
        )
        .route("/api/v1/tenancies/:tenancy_id", get(tenancy_handler))
        .route(
            "/api/v1/tenancies/:tenancy_id/change-unit",
            post(change_unit_handler),
        )
        .route("/api/v1/tenancies/:tenancy_id/end", post(end_handler))
        .route(
            "/api/v1/properties/:property_id/units",
            get(units_handler),
        )
        .route("/api/v1/audit/occupancy", get(audit_handler))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnitSelection {
    pub(crate) unit_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UnitQuery {
    #[serde(default)]
    pub(crate) status: Option<UnitStatus>,
}

pub(crate) async fn assign_handler(
    State(service): State<Arc<TenancyLifecycleService>>,
    Path(application_id): Path<String>,
    axum::Json(selection): axum::Json<UnitSelection>,
) -> Response {
    let application_id = ApplicationId(application_id);
    let unit_id = UnitId(selection.unit_id);
    let outcome = run_detached(async move { service.assign(&application_id, &unit_id).await }).await;

    match outcome {
        Ok(tenancy) => (StatusCode::CREATED, axum::Json(tenancy)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

pub(crate) async fn reject_handler(
    State(service): State<Arc<TenancyLifecycleService>>,
    Path(application_id): Path<String>,
) -> Response {
    let application_id = ApplicationId(application_id);
    let outcome = run_detached(async move {
        service.reject(&application_id).await?;
        service.application(&application_id).await
    })
    .await;

    match outcome {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

pub(crate) async fn change_unit_handler(
    State(service): State<Arc<TenancyLifecycleService>>,
    Path(tenancy_id): Path<String>,
    axum::Json(selection): axum::Json<UnitSelection>,
) -> Response {
    let tenancy_id = TenancyId(tenancy_id);
    let unit_id = UnitId(selection.unit_id);
    let outcome =
        run_detached(async move { service.change_unit(&tenancy_id, &unit_id).await }).await;

    match outcome {
        Ok(tenancy) => (StatusCode::OK, axum::Json(tenancy)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

pub(crate) async fn end_handler(
    State(service): State<Arc<TenancyLifecycleService>>,
    Path(tenancy_id): Path<String>,
) -> Response {
    let tenancy_id = TenancyId(tenancy_id);
    let outcome = run_detached(async move { service.end_tenancy(&tenancy_id).await }).await;

    match outcome {
        Ok(tenancy) => (StatusCode::OK, axum::Json(tenancy)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

pub(crate) async fn application_handler(
    State(service): State<Arc<TenancyLifecycleService>>,
    Path(application_id): Path<String>,
) -> Response {
    match service.application(&ApplicationId(application_id)).await {
        Ok(application) => (StatusCode::OK, axum::Json(application)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

pub(crate) async fn tenancy_handler(
    State(service): State<Arc<TenancyLifecycleService>>,
    Path(tenancy_id): Path<String>,
) -> Response {
    match service.tenancy(&TenancyId(tenancy_id)).await {
        Ok(tenancy) => (StatusCode::OK, axum::Json(tenancy)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

pub(crate) async fn units_handler(
    State(service): State<Arc<TenancyLifecycleService>>,
    Path(property_id): Path<String>,
    Query(query): Query<UnitQuery>,
) -> Response {
    let filter = UnitFilter {
        property_id: Some(PropertyId(property_id)),
        status: query.status,
    };
    match service.list_units(&filter).await {
        Ok(units) => (StatusCode::OK, axum::Json(units)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

/// Findings are point-in-time: each must show up in two consecutive scans, but a report
/// taken under heavy write traffic can still lag the stores by one workflow step.
pub(crate) async fn audit_handler(State(service): State<Arc<TenancyLifecycleService>>) -> Response {
    match service.audit_occupancy().await {
        Ok(discrepancies) => {
            let payload = json!({
                "consistent": discrepancies.is_empty(),
                "discrepancies": discrepancies,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => workflow_error_response(err),
    }
}

/// Sagas are not abortable once a step has committed, so they run on their own task and
/// finish even if the client disconnects.
async fn run_detached<F, T>(saga: F) -> Result<T, WorkflowError>
where
    F: Future<Output = Result<T, WorkflowError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(saga).await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            error!(error = %join_error, "workflow task failed");
            Err(WorkflowError::TransientFailure {
                operation: "workflow task",
                retryable: true,
            })
        }
    }
}

pub(crate) fn workflow_error_response(err: WorkflowError) -> Response {
    let kind = err.kind();
    let status = match kind {
        ErrorKind::PreconditionFailed => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ManualReconciliation => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut payload = json!({
        "error": err.to_string(),
        "kind": kind,
    });

    match &err {
        WorkflowError::InvalidState {
            entity,
            id,
            expected,
            actual,
        } => {
            payload["entity"] = json!(entity);
            payload["id"] = json!(id);
            payload["expected"] = json!(expected);
            payload["actual"] = json!(actual);
        }
        WorkflowError::UnitUnavailable { unit_id } => {
            payload["unit_id"] = json!(unit_id);
        }
        WorkflowError::ManualReconciliationRequired {
            tenancy_id,
            context,
        } => {
            payload["tenancy_id"] = json!(tenancy_id);
            payload["context"] = json!(context);
            payload["operator_alert"] = json!(true);
        }
        WorkflowError::TransientFailure { retryable, .. } => {
            payload["retryable"] = json!(retryable);
        }
        WorkflowError::Validation { field, .. } => {
            payload["field"] = json!(field);
        }
    }

    (status, axum::Json(payload)).into_response()
}
