//! Identity lookups. The rest of the core treats this as an opaque
//! directory: an actor id resolves to a capability tier and an active flag,
//! and every operation takes the resolved actor explicitly.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::enums::UserRole;
use crate::shared::error::ServiceError;
use crate::shared::schema::users;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Resolved actor for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: UserRole,
}

/// Extract the actor id from the `x-user-id` header. Verifying that the
/// header is trustworthy is the session layer's job, not ours.
pub fn actor_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ServiceError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| ServiceError::Forbidden("missing or malformed x-user-id header".to_string()))
}

/// Resolve an actor id against the directory. Unknown or inactive actors
/// may not perform any operation.
pub fn load_actor(conn: &mut PgConnection, actor_id: Uuid) -> Result<Actor, ServiceError> {
    let user: User = users::table
        .filter(users::id.eq(actor_id))
        .first(conn)
        .map_err(|_| ServiceError::Forbidden(format!("unknown actor {actor_id}")))?;
    if !user.is_active {
        return Err(ServiceError::Forbidden(format!(
            "actor {actor_id} is inactive"
        )));
    }
    Ok(Actor {
        id: user.id,
        role: user.role,
    })
}

/// Look up a user by id, e.g. an assignment target.
pub fn load_user(conn: &mut PgConnection, user_id: Uuid) -> Result<User, ServiceError> {
    users::table
        .filter(users::id.eq(user_id))
        .first(conn)
        .map_err(|_| ServiceError::NotFound(format!("user {user_id} not found")))
}

/// Convenience for handlers: header extraction plus directory lookup.
pub fn resolve_actor(conn: &mut PgConnection, headers: &HeaderMap) -> Result<Actor, ServiceError> {
    let actor_id = actor_id_from_headers(headers)?;
    load_actor(conn, actor_id)
}
