//! Time-bounded SLA waivers. Exemptions stack; any active exemption whose
//! type covers the checked breach type suppresses breach detection.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::Actor;
use crate::shared::enums::{BreachType, ExemptionType, UserRole};
use crate::shared::error::ServiceError;
use crate::shared::schema::sla_exemptions;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = sla_exemptions)]
pub struct SlaExemption {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub reason: String,
    pub exemption_type: ExemptionType,
    pub start_at: DateTime<Utc>,
    /// None means indefinite.
    pub end_at: Option<DateTime<Utc>>,
    pub granted_by: Uuid,
    pub approved: bool,
    pub approved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl SlaExemption {
    /// Active iff `start_at <= now < end_at`, with a missing end meaning
    /// "until revoked".
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_at <= now && self.end_at.map_or(true, |end| now < end)
    }

    /// Whether this exemption suppresses the given breach type right now.
    pub fn suppresses(&self, breach: BreachType, now: DateTime<Utc>) -> bool {
        self.is_active_at(now) && self.exemption_type.covers(breach)
    }
}

/// Grant an exemption starting now. Requires staff capability; exemptions
/// granted by an admin are recorded as approved.
pub fn grant_exemption(
    conn: &mut PgConnection,
    request_id: Uuid,
    actor: &Actor,
    reason: &str,
    exemption_type: ExemptionType,
    duration_hours: Option<i64>,
    now: DateTime<Utc>,
) -> Result<SlaExemption, ServiceError> {
    if !actor.role.satisfies(UserRole::Staff) {
        return Err(ServiceError::Forbidden(
            "staff capability required to grant exemptions".to_string(),
        ));
    }
    if reason.trim().is_empty() {
        return Err(ServiceError::Validation(
            "exemption reason is required".to_string(),
        ));
    }
    if let Some(hours) = duration_hours {
        if hours <= 0 {
            return Err(ServiceError::Validation(
                "exemption duration must be positive".to_string(),
            ));
        }
    }

    let is_admin = actor.role.satisfies(UserRole::Admin);
    let exemption = SlaExemption {
        id: Uuid::new_v4(),
        service_request_id: request_id,
        reason: reason.to_string(),
        exemption_type,
        start_at: now,
        end_at: duration_hours.map(|h| now + Duration::hours(h)),
        granted_by: actor.id,
        approved: is_admin,
        approved_by: is_admin.then_some(actor.id),
        created_at: now,
    };

    diesel::insert_into(sla_exemptions::table)
        .values(&exemption)
        .execute(conn)?;

    info!(
        "sla exemption ({}) granted for request {} by {}: {}",
        exemption_type, request_id, actor.id, reason
    );
    Ok(exemption)
}

pub fn exemptions_for_request(
    conn: &mut PgConnection,
    request_id: Uuid,
) -> Result<Vec<SlaExemption>, ServiceError> {
    sla_exemptions::table
        .filter(sla_exemptions::service_request_id.eq(request_id))
        .order(sla_exemptions::start_at.asc())
        .load(conn)
        .map_err(Into::into)
}

/// True iff any exemption covering the breach type is active at `now`.
pub fn has_active_exemption(
    conn: &mut PgConnection,
    request_id: Uuid,
    breach: BreachType,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let exemptions = exemptions_for_request(conn, request_id)?;
    Ok(exemptions.iter().any(|e| e.suppresses(breach, now)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exemption(
        exemption_type: ExemptionType,
        start_at: DateTime<Utc>,
        end_at: Option<DateTime<Utc>>,
    ) -> SlaExemption {
        SlaExemption {
            id: Uuid::new_v4(),
            service_request_id: Uuid::new_v4(),
            reason: "awaiting customer input".to_string(),
            exemption_type,
            start_at,
            end_at,
            granted_by: Uuid::new_v4(),
            approved: false,
            approved_by: None,
            created_at: start_at,
        }
    }

    #[test]
    fn active_within_window() {
        let now = Utc::now();
        let e = exemption(
            ExemptionType::Both,
            now - Duration::hours(1),
            Some(now + Duration::hours(1)),
        );
        assert!(e.is_active_at(now));
    }

    #[test]
    fn inactive_before_start_and_after_end() {
        let now = Utc::now();
        let e = exemption(
            ExemptionType::Both,
            now + Duration::hours(1),
            Some(now + Duration::hours(2)),
        );
        assert!(!e.is_active_at(now));

        let expired = exemption(
            ExemptionType::Both,
            now - Duration::hours(2),
            Some(now - Duration::hours(1)),
        );
        assert!(!expired.is_active_at(now));
    }

    #[test]
    fn end_boundary_is_exclusive() {
        let now = Utc::now();
        let e = exemption(ExemptionType::Both, now - Duration::hours(1), Some(now));
        assert!(!e.is_active_at(now));
    }

    #[test]
    fn missing_end_means_indefinite() {
        let now = Utc::now();
        let e = exemption(ExemptionType::Resolution, now - Duration::days(365), None);
        assert!(e.is_active_at(now));
        assert!(e.suppresses(BreachType::Resolution, now));
    }

    #[test]
    fn suppression_respects_type() {
        let now = Utc::now();
        let e = exemption(ExemptionType::Response, now - Duration::hours(1), None);
        assert!(e.suppresses(BreachType::Response, now));
        assert!(!e.suppresses(BreachType::Resolution, now));
    }
}
