//! The request state machine: one declarative transition table consulted by
//! a single entry point, instead of per-handler status checks.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use uuid::Uuid;

use crate::directory::Actor;
use crate::requests::{ServiceRequest, ServiceRequestHistory};
use crate::shared::enums::{RequestStatus, UserRole};
use crate::shared::error::ServiceError;
use crate::shared::schema::{service_request_history, service_requests};
use crate::sla::tracker;

/// One row of the transition table: who may move a request from `from` to
/// `to`, and under what extra guard.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub required: UserRole,
    /// The actor must additionally be the request's creator.
    pub creator_only: bool,
    /// History tag recorded for the transition.
    pub action: &'static str,
}

pub const TRANSITIONS: &[TransitionRule] = &[
    TransitionRule {
        from: RequestStatus::Draft,
        to: RequestStatus::Submitted,
        required: UserRole::User,
        creator_only: true,
        action: "submitted",
    },
    TransitionRule {
        from: RequestStatus::Submitted,
        to: RequestStatus::InReview,
        required: UserRole::Staff,
        creator_only: false,
        action: "status_changed",
    },
    TransitionRule {
        from: RequestStatus::InReview,
        to: RequestStatus::Approved,
        required: UserRole::Admin,
        creator_only: false,
        action: "status_changed",
    },
    TransitionRule {
        from: RequestStatus::InReview,
        to: RequestStatus::Rejected,
        required: UserRole::Admin,
        creator_only: false,
        action: "status_changed",
    },
    TransitionRule {
        from: RequestStatus::Approved,
        to: RequestStatus::Completed,
        required: UserRole::Admin,
        creator_only: false,
        action: "status_changed",
    },
];

/// Look up the rule for a (from, to) pair, if the pair is legal at all.
pub fn transition_rule(from: RequestStatus, to: RequestStatus) -> Option<&'static TransitionRule> {
    TRANSITIONS.iter().find(|r| r.from == from && r.to == to)
}

/// Field edits are allowed only on drafts and only by the creator.
pub fn can_edit(request: &ServiceRequest, actor: &Actor) -> bool {
    request.status == RequestStatus::Draft && request.created_by == actor.id
}

/// Validate a requested transition against the table and the actor's
/// capability. Fails before any mutation; the request is untouched on error.
pub fn authorize_transition(
    request: &ServiceRequest,
    actor: &Actor,
    to: RequestStatus,
) -> Result<&'static TransitionRule, ServiceError> {
    let rule = transition_rule(request.status, to).ok_or(ServiceError::InvalidTransition {
        from: request.status,
        to,
    })?;
    if rule.creator_only && request.created_by != actor.id {
        return Err(ServiceError::Forbidden(
            "only the creator may perform this transition".to_string(),
        ));
    }
    if !actor.role.satisfies(rule.required) {
        return Err(ServiceError::Forbidden(format!(
            "{} capability required",
            rule.required
        )));
    }
    Ok(rule)
}

/// Build the audit row recorded for an authorized transition. History is
/// append-only: exactly one row per applied transition, never updated.
pub fn history_entry(
    request: &ServiceRequest,
    actor: &Actor,
    rule: &TransitionRule,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> ServiceRequestHistory {
    ServiceRequestHistory {
        id: Uuid::new_v4(),
        service_request_id: request.id,
        action: rule.action.to_string(),
        old_status: Some(request.status),
        new_status: Some(rule.to),
        changed_by: actor.id,
        details: serde_json::json!({ "notes": notes }),
        timestamp: now,
    }
}

/// Execute an authorized transition atomically: status update (guarded by
/// the optimistic version counter), history append, and SLA metric insert
/// commit or roll back together. Returns the refreshed request.
pub fn apply_transition(
    conn: &mut PgConnection,
    request: &ServiceRequest,
    actor: &Actor,
    rule: &TransitionRule,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<ServiceRequest, ServiceError> {
    conn.transaction::<ServiceRequest, ServiceError, _>(|conn| {
        let updated = diesel::update(
            service_requests::table
                .filter(service_requests::id.eq(request.id))
                .filter(service_requests::version.eq(request.version))
                .filter(service_requests::status.eq(request.status)),
        )
        .set((
            service_requests::status.eq(rule.to),
            service_requests::updated_at.eq(now),
            service_requests::version.eq(request.version + 1),
        ))
        .execute(conn)?;

        if updated == 0 {
            return Err(ServiceError::Conflict(
                "request was modified concurrently".to_string(),
            ));
        }

        let history = history_entry(request, actor, rule, notes, now);
        diesel::insert_into(service_request_history::table)
            .values(&history)
            .execute(conn)?;

        tracker::track_status_change(conn, request, rule.to, now)?;

        info!(
            "request {} transitioned {} -> {} by {}",
            request.id, request.status, rule.to, actor.id
        );

        service_requests::table
            .filter(service_requests::id.eq(request.id))
            .first(conn)
            .map_err(Into::into)
    })
}
