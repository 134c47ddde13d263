pub mod exemptions;
pub mod policy;
pub mod scanner;
pub mod tracker;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::directory;
use crate::requests;
use crate::shared::enums::{ExemptionType, RequestCategory, RequestPriority, UserRole};
use crate::shared::error::ServiceError;
use crate::shared::schema::{service_requests, sla_definitions, sla_metrics};
use crate::shared::state::AppState;

use exemptions::SlaExemption;
use policy::SlaDefinition;
use scanner::BreachScan;
use tracker::SlaMetric;

#[derive(Debug, Deserialize)]
pub struct UpsertDefinitionBody {
    /// None targets the catch-all tier for the priority.
    pub category: Option<String>,
    pub priority: String,
    pub response_time_hours: i32,
    pub resolution_time_hours: i32,
}

#[derive(Debug, Deserialize)]
pub struct GrantExemptionBody {
    pub reason: String,
    pub exemption_type: String,
    /// Omit for an indefinite exemption.
    pub duration_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SlaStatistics {
    pub window_days: i64,
    pub total_breaches: i64,
    pub response_breaches: i64,
    pub resolution_breaches: i64,
    pub breaches_by_priority: BTreeMap<String, i64>,
}

pub async fn list_definitions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SlaDefinition>>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "staff capability required".to_string(),
        ));
    }

    let definitions: Vec<SlaDefinition> = sla_definitions::table
        .order((sla_definitions::priority.asc(), sla_definitions::category.asc()))
        .load(&mut conn)?;
    Ok(Json(definitions))
}

/// Replace the active definition for a (category, priority) slot. The old
/// row is deactivated rather than deleted so past metric rows keep a valid
/// reference.
pub async fn upsert_definition(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpsertDefinitionBody>,
) -> Result<Json<SlaDefinition>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Admin) {
        return Err(ServiceError::Forbidden(
            "admin capability required to manage SLA definitions".to_string(),
        ));
    }

    let category: Option<RequestCategory> = match body.category.as_deref() {
        Some(c) => Some(c.parse::<RequestCategory>().map_err(ServiceError::Validation)?),
        None => None,
    };
    let priority: RequestPriority = body.priority.parse().map_err(ServiceError::Validation)?;
    if body.response_time_hours <= 0 || body.resolution_time_hours <= 0 {
        return Err(ServiceError::Validation(
            "SLA hours must be positive".to_string(),
        ));
    }
    if body.response_time_hours > body.resolution_time_hours {
        return Err(ServiceError::Validation(
            "response time cannot exceed resolution time".to_string(),
        ));
    }

    let now = Utc::now();
    let definition = SlaDefinition {
        id: Uuid::new_v4(),
        category,
        priority,
        response_time_hours: body.response_time_hours,
        resolution_time_hours: body.resolution_time_hours,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let definition = conn.transaction::<SlaDefinition, ServiceError, _>(|conn| {
        diesel::update(
            sla_definitions::table
                .filter(sla_definitions::priority.eq(priority))
                .filter(sla_definitions::category.is_not_distinct_from(category))
                .filter(sla_definitions::is_active.eq(true)),
        )
        .set((
            sla_definitions::is_active.eq(false),
            sla_definitions::updated_at.eq(now),
        ))
        .execute(conn)?;

        diesel::insert_into(sla_definitions::table)
            .values(&definition)
            .execute(conn)?;
        Ok(definition)
    })?;

    info!(
        "sla definition for ({:?}, {}) set to {}h/{}h by {}",
        definition.category,
        definition.priority,
        definition.response_time_hours,
        definition.resolution_time_hours,
        actor.id
    );
    Ok(Json(definition))
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<SlaMetric>>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = requests::load_request(&mut conn, id)?;
    if request.created_by != actor.id && !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "no permission to view this request".to_string(),
        ));
    }

    let metrics: Vec<SlaMetric> = sla_metrics::table
        .filter(sla_metrics::service_request_id.eq(id))
        .order(sla_metrics::status_changed_at.asc())
        .load(&mut conn)?;
    Ok(Json(metrics))
}

pub async fn grant_exemption(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<GrantExemptionBody>,
) -> Result<Json<SlaExemption>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = requests::load_request(&mut conn, id)?;
    let exemption_type: ExemptionType = body
        .exemption_type
        .parse()
        .map_err(ServiceError::Validation)?;

    let exemption = exemptions::grant_exemption(
        &mut conn,
        request.id,
        &actor,
        &body.reason,
        exemption_type,
        body.duration_hours,
        Utc::now(),
    )?;
    Ok(Json(exemption))
}

pub async fn list_exemptions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<SlaExemption>>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    let request = requests::load_request(&mut conn, id)?;
    if request.created_by != actor.id && !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "no permission to view this request".to_string(),
        ));
    }

    let list = exemptions::exemptions_for_request(&mut conn, request.id)?;
    Ok(Json(list))
}

pub async fn list_breaches(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BreachScan>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "staff capability required".to_string(),
        ));
    }

    let scan = scanner::check_all_breaches(&mut conn, Utc::now())?;
    Ok(Json(scan))
}

#[cfg(feature = "reports")]
pub async fn export_breaches(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<axum::response::Response, ServiceError> {
    use axum::response::IntoResponse;

    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "staff capability required".to_string(),
        ));
    }

    let scan = scanner::check_all_breaches(&mut conn, Utc::now())?;
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "request_id",
            "title",
            "category",
            "priority",
            "status",
            "created_at",
            "breach_type",
            "deadline",
            "hours_overdue",
        ])
        .map_err(|e| ServiceError::Validation(format!("csv export failed: {e}")))?;
    for report in &scan.reports {
        for breach in &report.breaches {
            writer
                .write_record([
                    report.request_id.to_string(),
                    report.title.clone(),
                    report.category.to_string(),
                    report.priority.to_string(),
                    report.status.to_string(),
                    report.created_at.to_rfc3339(),
                    breach.breach_type.to_string(),
                    breach.deadline.to_rfc3339(),
                    format!("{:.2}", breach.hours_overdue),
                ])
                .map_err(|e| ServiceError::Validation(format!("csv export failed: {e}")))?;
        }
    }
    let body = writer
        .into_inner()
        .map_err(|e| ServiceError::Validation(format!("csv export failed: {e}")))?;

    Ok((
        [
            (axum::http::header::CONTENT_TYPE, "text/csv"),
            (
                axum::http::header::CONTENT_DISPOSITION,
                "attachment; filename=\"sla_breaches.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

/// One metric row joined with its request: (request id, response breach
/// timestamp, resolution breach flag, request priority).
type BreachStatRow = (Uuid, Option<chrono::DateTime<Utc>>, bool, RequestPriority);

/// Aggregate breach counts over a metric window. Response and resolution
/// tallies count metric rows; `breaches_by_priority` counts each breached
/// request once, however many of its rows recorded a breach.
fn aggregate_statistics(rows: &[BreachStatRow], window_days: i64) -> SlaStatistics {
    let mut response_breaches = 0;
    let mut resolution_breaches = 0;
    let mut breached_by_priority: BTreeMap<String, std::collections::HashSet<Uuid>> =
        BTreeMap::new();

    for (request_id, response_breach_at, is_breached, priority) in rows {
        let response = response_breach_at.is_some();
        if response {
            response_breaches += 1;
        }
        if *is_breached {
            resolution_breaches += 1;
        }
        if response || *is_breached {
            breached_by_priority
                .entry(priority.to_string())
                .or_default()
                .insert(*request_id);
        }
    }

    SlaStatistics {
        window_days,
        total_breaches: response_breaches + resolution_breaches,
        response_breaches,
        resolution_breaches,
        breaches_by_priority: breached_by_priority
            .into_iter()
            .map(|(priority, ids)| (priority, ids.len() as i64))
            .collect(),
    }
}

pub async fn get_statistics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<SlaStatistics>, ServiceError> {
    let mut conn = state.conn.get()?;
    let actor = directory::resolve_actor(&mut conn, &headers)?;
    if !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "staff capability required".to_string(),
        ));
    }

    let days = query.days.unwrap_or(30).clamp(1, 365);
    let since = Utc::now() - Duration::days(days);

    // Breaches come from two places: response misses are marked on the
    // metric row that recorded the late first response, resolution misses
    // on the completion row.
    let rows: Vec<BreachStatRow> = sla_metrics::table
        .inner_join(service_requests::table)
        .filter(sla_metrics::created_at.ge(since))
        .select((
            service_requests::id,
            sla_metrics::response_breach_at,
            sla_metrics::is_breached,
            service_requests::priority,
        ))
        .load(&mut conn)?;

    Ok(Json(aggregate_statistics(&rows, days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn request_with_both_breach_rows_counts_once_by_priority() {
        let id = Uuid::new_v4();
        let rows = vec![
            // Late first response, then late completion: two breached rows
            // for one request.
            (id, Some(Utc::now()), false, RequestPriority::High),
            (id, None, true, RequestPriority::High),
        ];

        let stats = aggregate_statistics(&rows, 30);
        assert_eq!(stats.response_breaches, 1);
        assert_eq!(stats.resolution_breaches, 1);
        assert_eq!(stats.total_breaches, 2);
        assert_eq!(stats.breaches_by_priority.get("high"), Some(&1));
    }

    #[test]
    fn distinct_requests_count_separately() {
        let rows = vec![
            (Uuid::new_v4(), None, true, RequestPriority::High),
            (Uuid::new_v4(), None, true, RequestPriority::High),
            (Uuid::new_v4(), Some(Utc::now()), false, RequestPriority::Low),
        ];

        let stats = aggregate_statistics(&rows, 7);
        assert_eq!(stats.breaches_by_priority.get("high"), Some(&2));
        assert_eq!(stats.breaches_by_priority.get("low"), Some(&1));
        assert_eq!(stats.total_breaches, 3);
    }

    #[test]
    fn clean_rows_produce_empty_statistics() {
        let rows = vec![
            (Uuid::new_v4(), None, false, RequestPriority::Normal),
            (Uuid::new_v4(), None, false, RequestPriority::Urgent),
        ];

        let stats = aggregate_statistics(&rows, 30);
        assert_eq!(stats.total_breaches, 0);
        assert_eq!(stats.response_breaches, 0);
        assert_eq!(stats.resolution_breaches, 0);
        assert!(stats.breaches_by_priority.is_empty());
    }
}

pub fn configure_sla_routes() -> Router<Arc<AppState>> {
    let router = Router::new()
        .route(
            "/api/sla/definitions",
            get(list_definitions).post(upsert_definition),
        )
        .route("/api/sla/breaches", get(list_breaches))
        .route("/api/sla/statistics", get(get_statistics))
        .route("/api/requests/:id/metrics", get(get_metrics))
        .route(
            "/api/requests/:id/exemptions",
            get(list_exemptions).post(grant_exemption),
        );

    #[cfg(feature = "reports")]
    let router = router.route("/api/sla/breaches/export", get(export_breaches));

    router
}
