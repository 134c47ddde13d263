pub mod workflow;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::directory::{self, Actor};
use crate::notifications;
use crate::shared::enums::{RequestCategory, RequestPriority, RequestStatus, UserRole};
use crate::shared::error::ServiceError;
use crate::shared::schema::{service_request_history, service_requests};
use crate::shared::state::AppState;

/// The ticket aggregate. `created_by` is immutable after creation; `status`
/// changes only through the workflow transition table; `version` is the
/// optimistic-lock counter checked and incremented by every write.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = service_requests)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: RequestCategory,
    pub priority: RequestPriority,
    pub status: RequestStatus,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record, one per transition or assignment.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = service_request_history)]
pub struct ServiceRequestHistory {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub action: String,
    pub old_status: Option<RequestStatus>,
    pub new_status: Option<RequestStatus>,
    pub changed_by: Uuid,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequestBody {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusBody {
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub assignee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_category(s: &str) -> Result<RequestCategory, ServiceError> {
    s.parse().map_err(ServiceError::Validation)
}

fn parse_priority(s: &str) -> Result<RequestPriority, ServiceError> {
    s.parse().map_err(ServiceError::Validation)
}

fn parse_status(s: &str) -> Result<RequestStatus, ServiceError> {
    s.parse().map_err(ServiceError::Validation)
}

pub fn load_request(conn: &mut PgConnection, id: Uuid) -> Result<ServiceRequest, ServiceError> {
    service_requests::table
        .filter(service_requests::id.eq(id))
        .first(conn)
        .map_err(|_| ServiceError::NotFound(format!("service request {id} not found")))
}

fn can_view(request: &ServiceRequest, actor: &Actor) -> bool {
    request.created_by == actor.id || actor.role.satisfies(UserRole::Staff)
}

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<ServiceRequest>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;

    if body.title.trim().is_empty() || body.description.trim().is_empty() {
        return Err(ServiceError::Validation(
            "title and description are required".to_string(),
        ));
    }
    let category = parse_category(&body.category)?;
    let priority = match body.priority.as_deref() {
        Some(p) => parse_priority(p)?,
        None => RequestPriority::default(),
    };

    let now = Utc::now();
    let request = ServiceRequest {
        id: Uuid::new_v4(),
        title: body.title,
        description: body.description,
        category,
        priority,
        status: RequestStatus::Draft,
        created_by: actor.id,
        assigned_to: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(service_requests::table)
        .values(&request)
        .execute(&mut conn)?;

    info!("request {} created by {}", request.id, actor.id);
    Ok(Json(request))
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceRequest>>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "staff capability required".to_string(),
        ));
    }
    let requests = filtered_requests(&mut conn, query, None)?;
    Ok(Json(requests))
}

pub async fn list_my_requests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceRequest>>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let requests = filtered_requests(&mut conn, query, Some(actor.id))?;
    Ok(Json(requests))
}

fn filtered_requests(
    conn: &mut PgConnection,
    query: ListQuery,
    created_by: Option<Uuid>,
) -> Result<Vec<ServiceRequest>, ServiceError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = service_requests::table.into_boxed();

    if let Some(creator) = created_by {
        q = q.filter(service_requests::created_by.eq(creator));
    }
    if let Some(status) = query.status.as_deref() {
        q = q.filter(service_requests::status.eq(parse_status(status)?));
    }
    if let Some(category) = query.category.as_deref() {
        q = q.filter(service_requests::category.eq(parse_category(category)?));
    }
    if let Some(priority) = query.priority.as_deref() {
        q = q.filter(service_requests::priority.eq(parse_priority(priority)?));
    }

    q.order(service_requests::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(conn)
        .map_err(Into::into)
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = load_request(&mut conn, id)?;
    if !can_view(&request, &actor) {
        return Err(ServiceError::Forbidden(
            "no permission to view this request".to_string(),
        ));
    }
    Ok(Json(request))
}

pub async fn update_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRequestBody>,
) -> Result<Json<ServiceRequest>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = load_request(&mut conn, id)?;

    if request.created_by != actor.id {
        return Err(ServiceError::Forbidden(
            "only the creator may edit a request".to_string(),
        ));
    }
    if !workflow::can_edit(&request, &actor) {
        return Err(ServiceError::Validation(
            "only draft requests can be edited".to_string(),
        ));
    }

    let title = body.title.unwrap_or_else(|| request.title.clone());
    let description = body.description.unwrap_or_else(|| request.description.clone());
    if title.trim().is_empty() || description.trim().is_empty() {
        return Err(ServiceError::Validation(
            "title and description must not be empty".to_string(),
        ));
    }
    let category = match body.category.as_deref() {
        Some(c) => parse_category(c)?,
        None => request.category,
    };
    let priority = match body.priority.as_deref() {
        Some(p) => parse_priority(p)?,
        None => request.priority,
    };

    let now = Utc::now();
    let updated = diesel::update(
        service_requests::table
            .filter(service_requests::id.eq(request.id))
            .filter(service_requests::version.eq(request.version))
            .filter(service_requests::status.eq(RequestStatus::Draft)),
    )
    .set((
        service_requests::title.eq(&title),
        service_requests::description.eq(&description),
        service_requests::category.eq(category),
        service_requests::priority.eq(priority),
        service_requests::updated_at.eq(now),
        service_requests::version.eq(request.version + 1),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(ServiceError::Conflict(
            "request was modified concurrently".to_string(),
        ));
    }

    let request = load_request(&mut conn, id)?;
    Ok(Json(request))
}

pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = load_request(&mut conn, id)?;

    let rule = workflow::authorize_transition(&request, &actor, RequestStatus::Submitted)?;
    let now = Utc::now();
    let updated = workflow::apply_transition(&mut conn, &request, &actor, rule, None, now)?;

    notifications::notify_submitted(state.clone(), updated.clone());
    Ok(Json(updated))
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeStatusBody>,
) -> Result<Json<ServiceRequest>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = load_request(&mut conn, id)?;
    let new_status = parse_status(&body.status)?;

    let rule = workflow::authorize_transition(&request, &actor, new_status)?;
    let now = Utc::now();
    let old_status = request.status;
    let updated =
        workflow::apply_transition(&mut conn, &request, &actor, rule, body.notes.clone(), now)?;

    notifications::notify_status_change(
        state.clone(),
        updated.clone(),
        old_status,
        new_status,
        body.notes,
    );
    Ok(Json(updated))
}

pub async fn assign_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignBody>,
) -> Result<Json<ServiceRequest>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Admin) {
        return Err(ServiceError::Forbidden(
            "admin capability required to assign".to_string(),
        ));
    }

    let request = load_request(&mut conn, id)?;
    let assignee = directory::load_user(&mut conn, body.assignee_id)?;
    if !assignee.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Validation(format!(
            "assignee {} does not hold the staff capability",
            assignee.id
        )));
    }

    let now = Utc::now();
    let old_assignee = request.assigned_to;
    let updated = conn.transaction::<ServiceRequest, ServiceError, _>(|conn| {
        let updated = diesel::update(
            service_requests::table
                .filter(service_requests::id.eq(request.id))
                .filter(service_requests::version.eq(request.version)),
        )
        .set((
            service_requests::assigned_to.eq(Some(assignee.id)),
            service_requests::updated_at.eq(now),
            service_requests::version.eq(request.version + 1),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Err(ServiceError::Conflict(
                "request was modified concurrently".to_string(),
            ));
        }

        let history = ServiceRequestHistory {
            id: Uuid::new_v4(),
            service_request_id: request.id,
            action: "assigned".to_string(),
            old_status: None,
            new_status: None,
            changed_by: actor.id,
            details: serde_json::json!({
                "old_assignee": old_assignee,
                "new_assignee": assignee.id,
            }),
            timestamp: now,
        };
        diesel::insert_into(service_request_history::table)
            .values(&history)
            .execute(conn)?;

        load_request(conn, request.id)
    })?;

    info!(
        "request {} assigned to {} by {}",
        request.id, assignee.id, actor.id
    );
    notifications::notify_assigned(state.clone(), updated.clone(), assignee.id);
    Ok(Json(updated))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ServiceRequestHistory>>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = load_request(&mut conn, id)?;
    if !can_view(&request, &actor) {
        return Err(ServiceError::Forbidden(
            "no permission to view this request".to_string(),
        ));
    }

    let history: Vec<ServiceRequestHistory> = service_request_history::table
        .filter(service_request_history::service_request_id.eq(id))
        .order(service_request_history::timestamp.asc())
        .load(&mut conn)?;
    Ok(Json(history))
}

/// Structured audit record for a hard delete. The cascade removes the
/// request's own history rows, so this record, emitted to the retained
/// application log before the delete, is the surviving trace.
fn deletion_audit(request: &ServiceRequest, actor: &Actor, now: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "event": "request_deleted",
        "request_id": request.id,
        "title": request.title,
        "status": request.status,
        "created_by": request.created_by,
        "deleted_by": actor.id,
        "deleted_at": now,
    })
}

/// Administrative hard delete. Cascades to history, metrics, and
/// exemptions; the deletion itself is logged with the acting admin.
pub async fn delete_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Admin) {
        return Err(ServiceError::Forbidden(
            "admin capability required to delete".to_string(),
        ));
    }

    let request = load_request(&mut conn, id)?;
    warn!("{}", deletion_audit(&request, &actor, Utc::now()));
    diesel::delete(service_requests::table.filter(service_requests::id.eq(id)))
        .execute(&mut conn)?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletion_audit_captures_request_and_actor() {
        let now = Utc::now();
        let actor = Actor {
            id: Uuid::new_v4(),
            role: UserRole::Admin,
        };
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            title: "Stale duplicate".to_string(),
            description: "Filed twice by mistake".to_string(),
            category: RequestCategory::Other,
            priority: RequestPriority::Low,
            status: RequestStatus::Draft,
            created_by: Uuid::new_v4(),
            assigned_to: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let audit = deletion_audit(&request, &actor, now);
        assert_eq!(audit["event"], "request_deleted");
        assert_eq!(audit["request_id"], serde_json::json!(request.id));
        assert_eq!(audit["title"], "Stale duplicate");
        assert_eq!(audit["created_by"], serde_json::json!(request.created_by));
        assert_eq!(audit["deleted_by"], serde_json::json!(actor.id));
        assert_eq!(audit["deleted_at"], serde_json::json!(now));
    }
}

pub fn configure_requests_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/requests", get(list_requests).post(create_request))
        .route("/api/requests/mine", get(list_my_requests))
        .route(
            "/api/requests/:id",
            get(get_request).put(update_request).delete(delete_request),
        )
        .route("/api/requests/:id/submit", post(submit_request))
        .route("/api/requests/:id/status", put(change_status))
        .route("/api/requests/:id/assign", put(assign_request))
        .route("/api/requests/:id/history", get(get_history))
}
