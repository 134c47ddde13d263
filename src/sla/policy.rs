//! Three-tier SLA policy resolution: exact (category, priority) match,
//! then the catch-all row for the priority, then a hard-coded fallback.
//! A policy always resolves.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::enums::{RequestCategory, RequestPriority};
use crate::shared::error::ServiceError;
use crate::shared::schema::sla_definitions;

/// Policy row. `category = None` marks the catch-all tier for a priority.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = sla_definitions)]
pub struct SlaDefinition {
    pub id: Uuid,
    pub category: Option<RequestCategory>,
    pub priority: RequestPriority,
    pub response_time_hours: i32,
    pub resolution_time_hours: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const FALLBACK_RESPONSE_HOURS: i64 = 4;
pub const FALLBACK_RESOLUTION_HOURS: i64 = 24;

/// Resolved deadlines for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaPolicy {
    /// The definition row this policy came from; None for the hard-coded
    /// fallback.
    pub definition_id: Option<Uuid>,
    pub response_time: Duration,
    pub resolution_time: Duration,
}

impl SlaPolicy {
    pub fn fallback() -> Self {
        Self {
            definition_id: None,
            response_time: Duration::hours(FALLBACK_RESPONSE_HOURS),
            resolution_time: Duration::hours(FALLBACK_RESOLUTION_HOURS),
        }
    }

    pub fn response_deadline(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.response_time
    }

    pub fn resolution_deadline(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.resolution_time
    }
}

impl From<&SlaDefinition> for SlaPolicy {
    fn from(def: &SlaDefinition) -> Self {
        Self {
            definition_id: Some(def.id),
            response_time: Duration::hours(def.response_time_hours as i64),
            resolution_time: Duration::hours(def.resolution_time_hours as i64),
        }
    }
}

/// Pure resolution over already-loaded definitions.
pub fn resolve_from(
    definitions: &[SlaDefinition],
    category: RequestCategory,
    priority: RequestPriority,
) -> SlaPolicy {
    let pick = |want: Option<RequestCategory>| {
        definitions
            .iter()
            .find(|d| d.is_active && d.priority == priority && d.category == want)
    };
    pick(Some(category))
        .or_else(|| pick(None))
        .map(SlaPolicy::from)
        .unwrap_or_else(SlaPolicy::fallback)
}

/// Resolve the policy for a (category, priority) pair from the database.
pub fn resolve_policy(
    conn: &mut PgConnection,
    category: RequestCategory,
    priority: RequestPriority,
) -> Result<SlaPolicy, ServiceError> {
    let definitions: Vec<SlaDefinition> = sla_definitions::table
        .filter(sla_definitions::is_active.eq(true))
        .filter(sla_definitions::priority.eq(priority))
        .load(conn)?;
    Ok(resolve_from(&definitions, category, priority))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(
        category: Option<RequestCategory>,
        priority: RequestPriority,
        response: i32,
        resolution: i32,
        active: bool,
    ) -> SlaDefinition {
        let now = Utc::now();
        SlaDefinition {
            id: Uuid::new_v4(),
            category,
            priority,
            response_time_hours: response,
            resolution_time_hours: resolution,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn exact_match_wins() {
        let defs = vec![
            definition(Some(RequestCategory::Support), RequestPriority::High, 1, 8, true),
            definition(None, RequestPriority::High, 2, 12, true),
        ];
        let policy = resolve_from(&defs, RequestCategory::Support, RequestPriority::High);
        assert_eq!(policy.definition_id, Some(defs[0].id));
        assert_eq!(policy.response_time, Duration::hours(1));
        assert_eq!(policy.resolution_time, Duration::hours(8));
    }

    #[test]
    fn catch_all_tier_applies_without_exact_match() {
        let defs = vec![definition(None, RequestPriority::High, 2, 12, true)];
        let policy = resolve_from(&defs, RequestCategory::Complaint, RequestPriority::High);
        assert_eq!(policy.definition_id, Some(defs[0].id));
        assert_eq!(policy.resolution_time, Duration::hours(12));
    }

    #[test]
    fn hard_coded_fallback_when_nothing_matches() {
        let policy = resolve_from(&[], RequestCategory::Inquiry, RequestPriority::Low);
        assert_eq!(policy.definition_id, None);
        assert_eq!(policy.response_time, Duration::hours(FALLBACK_RESPONSE_HOURS));
        assert_eq!(
            policy.resolution_time,
            Duration::hours(FALLBACK_RESOLUTION_HOURS)
        );
    }

    #[test]
    fn inactive_definitions_are_ignored() {
        let defs = vec![
            definition(Some(RequestCategory::Support), RequestPriority::High, 1, 8, false),
            definition(None, RequestPriority::High, 2, 12, false),
        ];
        let policy = resolve_from(&defs, RequestCategory::Support, RequestPriority::High);
        assert_eq!(policy.definition_id, None);
    }

    #[test]
    fn priority_mismatch_falls_through() {
        let defs = vec![definition(
            Some(RequestCategory::Support),
            RequestPriority::High,
            1,
            8,
            true,
        )];
        let policy = resolve_from(&defs, RequestCategory::Support, RequestPriority::Low);
        assert_eq!(policy.definition_id, None);
    }
}
