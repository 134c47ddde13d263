//! Closed enum types stored as SmallInt columns.
//!
//! Every domain enum maps to a PostgreSQL smallint with explicit
//! `ToSql`/`FromSql` impls, so an out-of-range value in the database is a
//! deserialization error rather than a silently-accepted string.

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::SmallInt;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::io::Write;

// ============================================================================
// REQUEST STATUS
// ============================================================================

/// Lifecycle state of a service request. `Rejected` and `Completed` are
/// terminal; all changes go through the transition table in
/// `requests::workflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RequestStatus {
    Draft = 0,
    Submitted = 1,
    InReview = 2,
    Approved = 3,
    Rejected = 4,
    Completed = 5,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }
}

impl Default for RequestStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl ToSql<SmallInt, Pg> for RequestStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for RequestStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Draft),
            1 => Ok(Self::Submitted),
            2 => Ok(Self::InReview),
            3 => Ok(Self::Approved),
            4 => Ok(Self::Rejected),
            5 => Ok(Self::Completed),
            _ => Err(format!("Unknown RequestStatus: {}", value).into()),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Submitted => write!(f, "submitted"),
            Self::InReview => write!(f, "in_review"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "in_review" => Ok(Self::InReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown request status: {}", s)),
        }
    }
}

// ============================================================================
// REQUEST CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RequestCategory {
    Compliance = 0,
    Support = 1,
    Inquiry = 2,
    Complaint = 3,
    Other = 4,
}

impl ToSql<SmallInt, Pg> for RequestCategory {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for RequestCategory {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Compliance),
            1 => Ok(Self::Support),
            2 => Ok(Self::Inquiry),
            3 => Ok(Self::Complaint),
            4 => Ok(Self::Other),
            _ => Err(format!("Unknown RequestCategory: {}", value).into()),
        }
    }
}

impl std::fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compliance => write!(f, "compliance"),
            Self::Support => write!(f, "support"),
            Self::Inquiry => write!(f, "inquiry"),
            Self::Complaint => write!(f, "complaint"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for RequestCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compliance" => Ok(Self::Compliance),
            "support" => Ok(Self::Support),
            "inquiry" => Ok(Self::Inquiry),
            "complaint" => Ok(Self::Complaint),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown request category: {}", s)),
        }
    }
}

// ============================================================================
// REQUEST PRIORITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RequestPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Default for RequestPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl ToSql<SmallInt, Pg> for RequestPriority {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for RequestPriority {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            3 => Ok(Self::Urgent),
            _ => Err(format!("Unknown RequestPriority: {}", value).into()),
        }
    }
}

impl std::fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for RequestPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Unknown request priority: {}", s)),
        }
    }
}

// ============================================================================
// USER ROLE
// ============================================================================

/// Capability tier. Tiers are ordered: Admin satisfies Staff requirements,
/// Staff satisfies User requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum UserRole {
    User = 0,
    Staff = 1,
    Admin = 2,
}

impl UserRole {
    /// Whether this role meets a required capability tier.
    pub fn satisfies(self, required: UserRole) -> bool {
        self >= required
    }
}

impl Default for UserRole {
    fn default() -> Self {
        Self::User
    }
}

impl ToSql<SmallInt, Pg> for UserRole {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for UserRole {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::User),
            1 => Ok(Self::Staff),
            2 => Ok(Self::Admin),
            _ => Err(format!("Unknown UserRole: {}", value).into()),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Staff => write!(f, "staff"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "staff" => Ok(Self::Staff),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("Unknown user role: {}", s)),
        }
    }
}

// ============================================================================
// EXEMPTION TYPE / BREACH TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ExemptionType {
    Response = 0,
    Resolution = 1,
    Both = 2,
}

impl ExemptionType {
    /// Whether an exemption of this type suppresses the given breach type.
    pub fn covers(self, breach: BreachType) -> bool {
        match self {
            Self::Both => true,
            Self::Response => breach == BreachType::Response,
            Self::Resolution => breach == BreachType::Resolution,
        }
    }
}

impl ToSql<SmallInt, Pg> for ExemptionType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for ExemptionType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Response),
            1 => Ok(Self::Resolution),
            2 => Ok(Self::Both),
            _ => Err(format!("Unknown ExemptionType: {}", value).into()),
        }
    }
}

impl std::fmt::Display for ExemptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response => write!(f, "response"),
            Self::Resolution => write!(f, "resolution"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for ExemptionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "response" => Ok(Self::Response),
            "resolution" => Ok(Self::Resolution),
            "both" => Ok(Self::Both),
            _ => Err(format!("Unknown exemption type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum BreachType {
    Response = 0,
    Resolution = 1,
}

impl ToSql<SmallInt, Pg> for BreachType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for BreachType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Response),
            1 => Ok(Self::Resolution),
            _ => Err(format!("Unknown BreachType: {}", value).into()),
        }
    }
}

impl std::fmt::Display for BreachType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response => write!(f, "response"),
            Self::Resolution => write!(f, "resolution"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_satisfies_lower_tiers() {
        assert!(UserRole::Admin.satisfies(UserRole::Staff));
        assert!(UserRole::Admin.satisfies(UserRole::User));
        assert!(UserRole::Staff.satisfies(UserRole::User));
        assert!(!UserRole::Staff.satisfies(UserRole::Admin));
        assert!(!UserRole::User.satisfies(UserRole::Staff));
    }

    #[test]
    fn exemption_coverage() {
        assert!(ExemptionType::Both.covers(BreachType::Response));
        assert!(ExemptionType::Both.covers(BreachType::Resolution));
        assert!(ExemptionType::Response.covers(BreachType::Response));
        assert!(!ExemptionType::Response.covers(BreachType::Resolution));
        assert!(ExemptionType::Resolution.covers(BreachType::Resolution));
        assert!(!ExemptionType::Resolution.covers(BreachType::Response));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            RequestStatus::Draft,
            RequestStatus::Submitted,
            RequestStatus::InReview,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Completed,
        ] {
            assert_eq!(status.to_string().parse::<RequestStatus>(), Ok(status));
        }
        assert!("reopened".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(!RequestStatus::Approved.is_terminal());
        assert!(!RequestStatus::Draft.is_terminal());
    }
}
