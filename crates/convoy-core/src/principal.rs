//! Principals: the people on both sides of a conversation.
//!
//! A [`Principal`] is any authenticated party. Operators additionally
//! carry an [`OperatorProfile`] with the skill, load, and availability
//! data the assignment engine matches on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::id::PrincipalId;

/// The role a principal plays on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalRole {
    /// End customer seeking support.
    Customer,
    /// Human support agent.
    Operator,
}

impl fmt::Display for PrincipalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Operator => write!(f, "operator"),
        }
    }
}

/// Account status of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    /// Account is usable.
    Active,
    /// Account is suspended; connections are refused.
    Suspended,
}

/// An authenticated party: customer or operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier.
    pub id: PrincipalId,
    /// Display name shown to the other side of the conversation.
    pub display_name: String,
    /// Role tag.
    pub role: PrincipalRole,
    /// Account status.
    pub status: PrincipalStatus,
    /// Service tier of a customer (e.g. "enterprise"); feeds SLA config
    /// matching. `None` means the default tier.
    pub tier: Option<String>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Create an active principal.
    #[must_use]
    pub fn new(id: PrincipalId, display_name: impl Into<String>, role: PrincipalRole) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
            status: PrincipalStatus::Active,
            tier: None,
            created_at: Utc::now(),
        }
    }

    /// Set the customer tier.
    #[must_use]
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// Operator availability as advertised to the assignment engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// Accepting new sessions.
    Online,
    /// Connected but at capacity or heads-down.
    Busy,
    /// Temporarily away; eligible only for high-priority work.
    Away,
    /// Not connected.
    Offline,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Busy => write!(f, "busy"),
            Self::Away => write!(f, "away"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Assignment-relevant profile of an operator.
///
/// Invariant: `current_load <= max_concurrent` at all times. Only the
/// assignment engine's slot accounting mutates `current_load`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorProfile {
    /// The operator's principal id.
    pub id: PrincipalId,
    /// Department tag, used for dashboard broadcasts.
    pub department: String,
    /// Skills this operator can serve.
    pub skills: BTreeSet<String>,
    /// Maximum concurrent sessions.
    pub max_concurrent: u32,
    /// Sessions currently assigned.
    pub current_load: u32,
    /// Advertised availability.
    pub availability: Availability,
    /// Rolling average first-response time, in seconds.
    pub avg_response_secs: f64,
}

impl OperatorProfile {
    /// Create a profile with no load, offline.
    #[must_use]
    pub fn new(id: PrincipalId, department: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            id,
            department: department.into(),
            skills: BTreeSet::new(),
            max_concurrent,
            current_load: 0,
            availability: Availability::Offline,
            avg_response_secs: 0.0,
        }
    }

    /// Add a skill.
    #[must_use]
    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill.into());
        self
    }

    /// Whether the operator has a free slot.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent
    }

    /// Load as a fraction of capacity, in `[0, 1]`.
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 1.0;
        }
        f64::from(self.current_load) / f64::from(self.max_concurrent)
    }

    /// Whether this operator's skill set covers all `required` skills.
    #[must_use]
    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.skills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_ratio_handles_zero_capacity() {
        let mut profile = OperatorProfile::new(PrincipalId(1), "support", 0);
        assert!((profile.load_ratio() - 1.0).abs() < f64::EPSILON);
        profile.max_concurrent = 4;
        profile.current_load = 1;
        assert!((profile.load_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn skill_cover_is_subset() {
        let profile = OperatorProfile::new(PrincipalId(1), "support", 3)
            .with_skill("billing")
            .with_skill("en");
        let mut required = BTreeSet::new();
        required.insert("billing".to_string());
        assert!(profile.covers(&required));
        required.insert("es".to_string());
        assert!(!profile.covers(&required));
    }
}
