//! SLA metric snapshots. One row is inserted per status transition and
//! never mutated afterwards, preserving the full evaluation history.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::requests::ServiceRequest;
use crate::shared::enums::{BreachType, RequestStatus};
use crate::shared::error::ServiceError;
use crate::shared::schema::sla_metrics;
use crate::sla::policy::{self, SlaPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = sla_metrics)]
pub struct SlaMetric {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub sla_definition_id: Option<Uuid>,
    pub status_changed_at: DateTime<Utc>,
    pub status: RequestStatus,
    pub first_response_at: Option<DateTime<Utc>>,
    pub response_sla_met: Option<bool>,
    pub response_breach_at: Option<DateTime<Utc>>,
    pub resolution_target_at: Option<DateTime<Utc>>,
    pub resolution_sla_met: Option<bool>,
    pub resolution_breach_at: Option<DateTime<Utc>>,
    pub time_in_status_minutes: i32,
    pub total_time_minutes: i32,
    pub is_breached: bool,
    pub breach_type: Option<BreachType>,
    pub created_at: DateTime<Utc>,
}

/// SLA evaluation result for a single transition, before persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    pub first_response_at: Option<DateTime<Utc>>,
    pub response_sla_met: Option<bool>,
    pub response_breach_at: Option<DateTime<Utc>>,
    pub resolution_target_at: Option<DateTime<Utc>>,
    pub resolution_sla_met: Option<bool>,
    pub resolution_breach_at: Option<DateTime<Utc>>,
    pub is_breached: bool,
    pub breach_type: Option<BreachType>,
}

/// Evaluate SLA compliance at a transition.
///
/// Entering `Submitted` establishes the baseline; entering `InReview`
/// counts as the first staff response and scores the response SLA;
/// entering `Completed` scores the resolution SLA and flags a resolution
/// breach when the deadline was missed.
pub fn evaluate(
    created_at: DateTime<Utc>,
    new_status: RequestStatus,
    policy: &SlaPolicy,
    now: DateTime<Utc>,
) -> MetricSnapshot {
    let mut snapshot = MetricSnapshot::default();
    match new_status {
        RequestStatus::Submitted => {
            snapshot.response_sla_met = Some(false);
            snapshot.resolution_sla_met = Some(false);
        }
        RequestStatus::InReview => {
            snapshot.first_response_at = Some(now);
            let deadline = policy.response_deadline(created_at);
            let met = now <= deadline;
            snapshot.response_sla_met = Some(met);
            if !met {
                snapshot.response_breach_at = Some(now);
            }
            snapshot.resolution_target_at = Some(policy.resolution_deadline(created_at));
            snapshot.resolution_sla_met = Some(false);
        }
        RequestStatus::Completed => {
            let deadline = policy.resolution_deadline(created_at);
            let met = now <= deadline;
            snapshot.resolution_sla_met = Some(met);
            if !met {
                snapshot.is_breached = true;
                snapshot.breach_type = Some(BreachType::Resolution);
                snapshot.resolution_breach_at = Some(now);
            }
        }
        _ => {}
    }
    snapshot
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i32 {
    (to - from).num_minutes().max(0) as i32
}

/// Record a metric snapshot for a transition. Called inside the transition
/// transaction; a persistence failure here rolls the whole transition back.
pub fn track_status_change(
    conn: &mut PgConnection,
    request: &ServiceRequest,
    new_status: RequestStatus,
    now: DateTime<Utc>,
) -> Result<SlaMetric, ServiceError> {
    let policy = policy::resolve_policy(conn, request.category, request.priority)?;
    let snapshot = evaluate(request.created_at, new_status, &policy, now);

    // Time in the previous status is measured from the last metric row,
    // or from creation when this is the first transition.
    let previous_change: Option<DateTime<Utc>> = sla_metrics::table
        .filter(sla_metrics::service_request_id.eq(request.id))
        .order(sla_metrics::status_changed_at.desc())
        .select(sla_metrics::status_changed_at)
        .first(conn)
        .optional()?;
    let since = previous_change.unwrap_or(request.created_at);

    let metric = SlaMetric {
        id: Uuid::new_v4(),
        service_request_id: request.id,
        sla_definition_id: policy.definition_id,
        status_changed_at: now,
        status: new_status,
        first_response_at: snapshot.first_response_at,
        response_sla_met: snapshot.response_sla_met,
        response_breach_at: snapshot.response_breach_at,
        resolution_target_at: snapshot.resolution_target_at,
        resolution_sla_met: snapshot.resolution_sla_met,
        resolution_breach_at: snapshot.resolution_breach_at,
        time_in_status_minutes: minutes_between(since, now),
        total_time_minutes: minutes_between(request.created_at, now),
        is_breached: snapshot.is_breached,
        breach_type: snapshot.breach_type,
        created_at: now,
    };

    diesel::insert_into(sla_metrics::table)
        .values(&metric)
        .execute(conn)?;

    info!(
        "sla metric recorded for request {}: {}",
        request.id, new_status
    );
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy() -> SlaPolicy {
        SlaPolicy {
            definition_id: None,
            response_time: Duration::hours(4),
            resolution_time: Duration::hours(24),
        }
    }

    #[test]
    fn submission_establishes_baseline() {
        let created = Utc::now();
        let snap = evaluate(created, RequestStatus::Submitted, &policy(), created);
        assert_eq!(snap.response_sla_met, Some(false));
        assert_eq!(snap.resolution_sla_met, Some(false));
        assert!(snap.first_response_at.is_none());
        assert!(!snap.is_breached);
    }

    #[test]
    fn timely_first_response_meets_response_sla() {
        let created = Utc::now();
        let now = created + Duration::hours(2);
        let snap = evaluate(created, RequestStatus::InReview, &policy(), now);
        assert_eq!(snap.first_response_at, Some(now));
        assert_eq!(snap.response_sla_met, Some(true));
        assert!(snap.response_breach_at.is_none());
        assert_eq!(
            snap.resolution_target_at,
            Some(created + Duration::hours(24))
        );
    }

    #[test]
    fn late_first_response_misses_response_sla() {
        let created = Utc::now();
        let now = created + Duration::hours(5);
        let snap = evaluate(created, RequestStatus::InReview, &policy(), now);
        assert_eq!(snap.response_sla_met, Some(false));
        assert_eq!(snap.response_breach_at, Some(now));
    }

    #[test]
    fn timely_completion_meets_resolution_sla() {
        let created = Utc::now();
        let now = created + Duration::hours(20);
        let snap = evaluate(created, RequestStatus::Completed, &policy(), now);
        assert_eq!(snap.resolution_sla_met, Some(true));
        assert!(!snap.is_breached);
        assert!(snap.breach_type.is_none());
    }

    #[test]
    fn late_completion_records_resolution_breach() {
        let created = Utc::now();
        let now = created + Duration::hours(30);
        let snap = evaluate(created, RequestStatus::Completed, &policy(), now);
        assert_eq!(snap.resolution_sla_met, Some(false));
        assert!(snap.is_breached);
        assert_eq!(snap.breach_type, Some(BreachType::Resolution));
        assert_eq!(snap.resolution_breach_at, Some(now));
    }

    #[test]
    fn other_statuses_record_nothing() {
        let created = Utc::now();
        for status in [RequestStatus::Approved, RequestStatus::Rejected] {
            let snap = evaluate(created, status, &policy(), created + Duration::hours(48));
            assert_eq!(snap, MetricSnapshot::default());
        }
    }
}
