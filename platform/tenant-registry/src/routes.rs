//! Tenant API Routes
//!
//! - `POST   /api/tenants`: register an agency
//! - `GET    /api/tenants/{id}`
//! - `PUT    /api/tenants/{id}`: rename or change the contact email
//! - `DELETE /api/tenants/{id}`: soft delete
//! - `POST   /api/outbox/{partition_key}/requeue`: release parked outbox rows

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::outbox::OutboxRelay;
use crate::service::{CreateTenant, ServiceError, TenantService};
use crate::store::TenantStore;
use crate::tenant::{Tenant, TenantError};
use crate::unit_of_work::CommitError;

pub struct TenantApi {
    pub tenants: TenantService<dyn TenantStore>,
    /// Present only when events go through the outbox
    pub relay: Option<Arc<OutboxRelay>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenant {
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TenantResponse {
    pub id: Uuid,
    pub agency_code: String,
    pub name: String,
    pub contact_email: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Tenant> for TenantResponse {
    fn from(tenant: Tenant) -> Self {
        Self {
            active: tenant.is_active(),
            id: tenant.id,
            agency_code: tenant.agency_code,
            name: tenant.name,
            contact_email: tenant.contact_email,
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
            deleted_at: tenant.deleted_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequeueResponse {
    pub partition_key: String,
    pub requeued: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let status = match &error {
            ServiceError::Tenant(TenantError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Tenant(TenantError::DuplicateAgencyCode(_))
            | ServiceError::Tenant(TenantError::Deleted(_)) => StatusCode::CONFLICT,
            ServiceError::Tenant(_) => StatusCode::BAD_REQUEST,
            // The change is committed, only the broker hop failed
            ServiceError::Commit(CommitError::Publish { .. }) => StatusCode::BAD_GATEWAY,
            ServiceError::Commit(_) | ServiceError::Store(_) => {
                tracing::error!(error = %error, "Tenant storage error");
                return ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Storage error".to_string(),
                };
            }
        };
        ApiError {
            status,
            message: error.to_string(),
        }
    }
}

pub fn tenant_router(api: Arc<TenantApi>) -> Router {
    Router::new()
        .route("/api/tenants", post(create_tenant))
        .route(
            "/api/tenants/{id}",
            get(get_tenant).put(update_tenant).delete(delete_tenant),
        )
        .route("/api/outbox/{partition_key}/requeue", post(requeue_outbox))
        .with_state(api)
}

async fn create_tenant(
    State(api): State<Arc<TenantApi>>,
    Json(request): Json<CreateTenant>,
) -> Result<(StatusCode, Json<TenantResponse>), ApiError> {
    let tenant = api.tenants.create_tenant(request).await?;
    Ok((StatusCode::CREATED, Json(tenant.into())))
}

async fn get_tenant(
    State(api): State<Arc<TenantApi>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantResponse>, ApiError> {
    Ok(Json(api.tenants.get_tenant(id).await?.into()))
}

async fn update_tenant(
    State(api): State<Arc<TenantApi>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTenant>,
) -> Result<Json<TenantResponse>, ApiError> {
    let tenant = api
        .tenants
        .update_tenant(id, &request.name, request.contact_email)
        .await?;
    Ok(Json(tenant.into()))
}

async fn delete_tenant(
    State(api): State<Arc<TenantApi>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantResponse>, ApiError> {
    Ok(Json(api.tenants.delete_tenant(id).await?.into()))
}

async fn requeue_outbox(
    State(api): State<Arc<TenantApi>>,
    Path(partition_key): Path<String>,
) -> Result<Json<RequeueResponse>, ApiError> {
    let relay = api.relay.as_ref().ok_or_else(|| ApiError {
        status: StatusCode::CONFLICT,
        message: "outbox dispatch is not enabled".to_string(),
    })?;

    let requeued = relay.requeue_failed(&partition_key).await.map_err(|e| {
        tracing::error!(partition_key = %partition_key, error = %e, "Requeue failed");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Storage error".to_string(),
        }
    })?;

    Ok(Json(RequeueResponse {
        partition_key,
        requeued,
    }))
}
