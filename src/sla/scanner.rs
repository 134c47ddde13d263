//! Periodic breach detection over all open requests. The scanner is
//! read-only and advisory: it reports breaches for dashboards and alerting
//! but never mutates a request.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::requests::ServiceRequest;
use crate::shared::enums::{BreachType, RequestCategory, RequestPriority, RequestStatus};
use crate::shared::error::ServiceError;
use crate::shared::schema::{service_requests, sla_exemptions};
use crate::shared::state::AppState;
use crate::sla::exemptions::SlaExemption;
use crate::sla::policy::{self, SlaPolicy};

#[derive(Debug, Clone, Serialize)]
pub struct Breach {
    #[serde(rename = "type")]
    pub breach_type: BreachType,
    pub deadline: DateTime<Utc>,
    pub hours_overdue: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreachReport {
    pub request_id: Uuid,
    pub title: String,
    pub category: RequestCategory,
    pub priority: RequestPriority,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub breaches: Vec<Breach>,
}

/// Outcome of one full scan: per-request evaluation errors are counted,
/// not fatal, so one malformed request cannot halt the pass.
#[derive(Debug, Serialize)]
pub struct BreachScan {
    pub generated_at: DateTime<Utc>,
    pub reports: Vec<BreachReport>,
    pub error_count: usize,
}

fn hours_overdue(now: DateTime<Utc>, deadline: DateTime<Utc>) -> f64 {
    (now - deadline).num_seconds() as f64 / 3600.0
}

/// Evaluate both breach types for one request. Exemption checks run first
/// and short-circuit: a covered breach type is never reported, regardless
/// of the deadline.
pub fn evaluate_breaches(
    request: &ServiceRequest,
    policy: &SlaPolicy,
    exemptions: &[SlaExemption],
    now: DateTime<Utc>,
) -> Vec<Breach> {
    let exempt = |breach: BreachType| exemptions.iter().any(|e| e.suppresses(breach, now));
    let mut breaches = Vec::new();

    // Response SLA only applies while the request still awaits its first
    // staff response.
    if request.status == RequestStatus::Submitted && !exempt(BreachType::Response) {
        let deadline = policy.response_deadline(request.created_at);
        if now > deadline {
            breaches.push(Breach {
                breach_type: BreachType::Response,
                deadline,
                hours_overdue: hours_overdue(now, deadline),
            });
        }
    }

    if request.status != RequestStatus::Completed && !exempt(BreachType::Resolution) {
        let deadline = policy.resolution_deadline(request.created_at);
        if now > deadline {
            breaches.push(Breach {
                breach_type: BreachType::Resolution,
                deadline,
                hours_overdue: hours_overdue(now, deadline),
            });
        }
    }

    breaches
}

fn scan_request(
    conn: &mut PgConnection,
    request: &ServiceRequest,
    now: DateTime<Utc>,
) -> Result<Option<BreachReport>, ServiceError> {
    let policy = policy::resolve_policy(conn, request.category, request.priority)?;
    let exemptions: Vec<SlaExemption> = sla_exemptions::table
        .filter(sla_exemptions::service_request_id.eq(request.id))
        .load(conn)?;

    let breaches = evaluate_breaches(request, &policy, &exemptions, now);
    if breaches.is_empty() {
        return Ok(None);
    }
    Ok(Some(BreachReport {
        request_id: request.id,
        title: request.title.clone(),
        category: request.category,
        priority: request.priority,
        status: request.status,
        created_at: request.created_at,
        breaches,
    }))
}

/// Walk every request still awaiting action and collect its breaches.
pub fn check_all_breaches(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
) -> Result<BreachScan, ServiceError> {
    let open: Vec<ServiceRequest> = service_requests::table
        .filter(service_requests::status.eq_any(vec![
            RequestStatus::Submitted,
            RequestStatus::InReview,
        ]))
        .load(conn)?;

    let mut reports = Vec::new();
    let mut error_count = 0;
    for request in &open {
        match scan_request(conn, request, now) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => {
                error!("breach evaluation failed for request {}: {e}", request.id);
                error_count += 1;
            }
        }
    }

    info!(
        "sla breach scan: {} of {} open requests breached ({} errors)",
        reports.len(),
        open.len(),
        error_count
    );
    Ok(BreachScan {
        generated_at: now,
        reports,
        error_count,
    })
}

/// Background driver. The scan is idempotent and side-effect-free on the
/// requests themselves, so a missed or aborted tick is harmless.
pub struct BreachScanner {
    state: Arc<AppState>,
}

impl BreachScanner {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let secs = self.state.config.sla.scan_interval_secs;
            info!("breach scanner started (every {secs}s)");
            let mut tick = interval(Duration::from_secs(secs));
            loop {
                tick.tick().await;
                match self.state.conn.get() {
                    Ok(mut conn) => {
                        if let Err(e) = check_all_breaches(&mut conn, Utc::now()) {
                            error!("breach scan failed: {e}");
                        }
                    }
                    Err(e) => error!("breach scanner could not get connection: {e}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::ExemptionType;
    use chrono::Duration as ChronoDuration;

    fn request(status: RequestStatus, age_hours: i64, now: DateTime<Utc>) -> ServiceRequest {
        let created = now - ChronoDuration::hours(age_hours);
        ServiceRequest {
            id: Uuid::new_v4(),
            title: "VPN access".to_string(),
            description: "Cannot reach the office VPN".to_string(),
            category: RequestCategory::Support,
            priority: RequestPriority::Low,
            status,
            created_by: Uuid::new_v4(),
            assigned_to: None,
            version: 0,
            created_at: created,
            updated_at: created,
        }
    }

    fn exemption(
        request_id: Uuid,
        exemption_type: ExemptionType,
        start_at: DateTime<Utc>,
        end_at: Option<DateTime<Utc>>,
    ) -> SlaExemption {
        SlaExemption {
            id: Uuid::new_v4(),
            service_request_id: request_id,
            reason: "vendor outage".to_string(),
            exemption_type,
            start_at,
            end_at,
            granted_by: Uuid::new_v4(),
            approved: true,
            approved_by: None,
            created_at: start_at,
        }
    }

    #[test]
    fn thirty_hour_old_request_breaches_fallback_resolution_sla() {
        let now = Utc::now();
        let req = request(RequestStatus::InReview, 30, now);
        let breaches = evaluate_breaches(&req, &SlaPolicy::fallback(), &[], now);

        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].breach_type, BreachType::Resolution);
        assert!((breaches[0].hours_overdue - 6.0).abs() < 0.01);
    }

    #[test]
    fn submitted_request_past_both_deadlines_reports_both() {
        let now = Utc::now();
        let req = request(RequestStatus::Submitted, 30, now);
        let breaches = evaluate_breaches(&req, &SlaPolicy::fallback(), &[], now);

        let types: Vec<BreachType> = breaches.iter().map(|b| b.breach_type).collect();
        assert_eq!(types, vec![BreachType::Response, BreachType::Resolution]);
    }

    #[test]
    fn in_review_request_never_reports_response_breach() {
        let now = Utc::now();
        let req = request(RequestStatus::InReview, 30, now);
        let breaches = evaluate_breaches(&req, &SlaPolicy::fallback(), &[], now);
        assert!(breaches.iter().all(|b| b.breach_type != BreachType::Response));
    }

    #[test]
    fn fresh_request_has_no_breaches() {
        let now = Utc::now();
        let req = request(RequestStatus::Submitted, 1, now);
        assert!(evaluate_breaches(&req, &SlaPolicy::fallback(), &[], now).is_empty());
    }

    #[test]
    fn breaches_do_not_self_heal_over_time() {
        let now1 = Utc::now();
        let req = request(RequestStatus::InReview, 30, now1);
        let policy = SlaPolicy::fallback();

        let at_now1 = evaluate_breaches(&req, &policy, &[], now1);
        assert!(!at_now1.is_empty());

        // Later, with no exemption granted in between, still breached.
        let now2 = now1 + ChronoDuration::hours(12);
        let at_now2 = evaluate_breaches(&req, &policy, &[], now2);
        assert!(!at_now2.is_empty());
        assert!(at_now2[0].hours_overdue > at_now1[0].hours_overdue);
    }

    #[test]
    fn active_exemption_suppresses_matching_breach_type() {
        let now = Utc::now();
        let req = request(RequestStatus::InReview, 30, now);
        let policy = SlaPolicy::fallback();

        let active = exemption(
            req.id,
            ExemptionType::Resolution,
            now - ChronoDuration::hours(1),
            Some(now + ChronoDuration::hours(1)),
        );
        assert!(evaluate_breaches(&req, &policy, &[active], now).is_empty());
    }

    #[test]
    fn breach_returns_after_exemption_expires() {
        let now = Utc::now();
        let req = request(RequestStatus::InReview, 30, now);
        let policy = SlaPolicy::fallback();

        let expiring = exemption(
            req.id,
            ExemptionType::Resolution,
            now - ChronoDuration::hours(2),
            Some(now + ChronoDuration::hours(1)),
        );

        assert!(evaluate_breaches(&req, &policy, &[expiring.clone()], now).is_empty());

        let after_expiry = now + ChronoDuration::hours(2);
        let breaches = evaluate_breaches(&req, &policy, &[expiring], after_expiry);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].breach_type, BreachType::Resolution);
    }

    #[test]
    fn response_exemption_does_not_cover_resolution() {
        let now = Utc::now();
        let req = request(RequestStatus::Submitted, 30, now);
        let policy = SlaPolicy::fallback();

        let response_only = exemption(req.id, ExemptionType::Response, now - ChronoDuration::hours(1), None);
        let breaches = evaluate_breaches(&req, &policy, &[response_only], now);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].breach_type, BreachType::Resolution);
    }

    #[test]
    fn both_exemption_suppresses_everything() {
        let now = Utc::now();
        let req = request(RequestStatus::Submitted, 30, now);
        let both = exemption(req.id, ExemptionType::Both, now - ChronoDuration::hours(1), None);
        assert!(evaluate_breaches(&req, &SlaPolicy::fallback(), &[both], now).is_empty());
    }

    #[test]
    fn stacked_exemptions_any_active_one_counts() {
        let now = Utc::now();
        let req = request(RequestStatus::InReview, 30, now);
        let policy = SlaPolicy::fallback();

        let expired = exemption(
            req.id,
            ExemptionType::Resolution,
            now - ChronoDuration::hours(10),
            Some(now - ChronoDuration::hours(5)),
        );
        let active = exemption(req.id, ExemptionType::Resolution, now - ChronoDuration::hours(1), None);

        assert!(evaluate_breaches(&req, &policy, &[expired, active], now).is_empty());
    }
}
