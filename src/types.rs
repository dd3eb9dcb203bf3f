/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ServiceError;

/// Kind of an organizational entity stored locally and in the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgKind {
    Distributor,
    Reseller,
    Customer,
}

impl OrgKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgKind::Distributor => "distributor",
            OrgKind::Reseller => "reseller",
            OrgKind::Customer => "customer",
        }
    }

    /// Name of the organization-scoped role granted to members of this kind
    pub fn role_name(&self) -> &'static str {
        match self {
            OrgKind::Distributor => "Distributor",
            OrgKind::Reseller => "Reseller",
            OrgKind::Customer => "Customer",
        }
    }

    /// Depth below the owner root
    pub fn depth(&self) -> usize {
        match self {
            OrgKind::Distributor => 1,
            OrgKind::Reseller => 2,
            OrgKind::Customer => 3,
        }
    }
}

impl fmt::Display for OrgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "distributor" => Ok(OrgKind::Distributor),
            "reseller" => Ok(OrgKind::Reseller),
            "customer" => Ok(OrgKind::Customer),
            other => Err(ServiceError::invalid_field("type", "invalid_kind", other)),
        }
    }
}

/// Organization role declared by a caller. Parsing normalizes case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Distributor,
    Reseller,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Distributor => "distributor",
            Role::Reseller => "reseller",
            Role::Customer => "customer",
        }
    }

    /// Whether this role may create organizations of the given kind
    pub fn can_create(&self, kind: OrgKind) -> bool {
        match kind {
            OrgKind::Distributor => matches!(self, Role::Owner),
            OrgKind::Reseller => matches!(self, Role::Owner | Role::Distributor),
            OrgKind::Customer => matches!(self, Role::Owner | Role::Distributor | Role::Reseller),
        }
    }

    /// Parent hops an ancestor walk may take from a target back to an org holding this role
    pub fn max_hops(&self) -> usize {
        match self {
            Role::Owner => usize::MAX,
            Role::Distributor => 2,
            Role::Reseller => 1,
            Role::Customer => 0,
        }
    }
}

impl From<OrgKind> for Role {
    fn from(kind: OrgKind) -> Self {
        match kind {
            OrgKind::Distributor => Role::Distributor,
            OrgKind::Reseller => Role::Reseller,
            OrgKind::Customer => Role::Customer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "distributor" => Ok(Role::Distributor),
            "reseller" => Ok(Role::Reseller),
            "customer" => Ok(Role::Customer),
            other => Err(ServiceError::invalid_field("role", "invalid_role", other)),
        }
    }
}

/// The authenticated caller on whose behalf a mutation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    /// Remote ID of the caller's organization
    pub org_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
            role,
        }
    }
}

/// Lifecycle state of an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgState {
    Active,
    Suspended,
    Deleted,
}

/// State-changing operations on an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Suspend,
    Reactivate,
    Delete,
}

impl OrgState {
    /// Apply a transition, rejecting anything out of a terminal or mismatched state
    pub fn apply(self, transition: Transition) -> Result<OrgState, ServiceError> {
        match (self, transition) {
            (OrgState::Active, Transition::Suspend) => Ok(OrgState::Suspended),
            (OrgState::Suspended, Transition::Reactivate) => Ok(OrgState::Active),
            (OrgState::Active | OrgState::Suspended, Transition::Delete) => Ok(OrgState::Deleted),
            (state, transition) => Err(ServiceError::InvalidTransition(format!(
                "cannot {:?} an organization in state {:?}",
                transition, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_normalizes_case() {
        assert_eq!("Distributor".parse::<Role>().unwrap(), Role::Distributor);
        assert_eq!(" OWNER ".parse::<Role>().unwrap(), Role::Owner);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn create_permissions_follow_the_tree() {
        assert!(Role::Owner.can_create(OrgKind::Distributor));
        assert!(!Role::Distributor.can_create(OrgKind::Distributor));
        assert!(Role::Distributor.can_create(OrgKind::Reseller));
        assert!(!Role::Reseller.can_create(OrgKind::Reseller));
        assert!(Role::Reseller.can_create(OrgKind::Customer));
        assert!(!Role::Customer.can_create(OrgKind::Customer));
    }

    #[test]
    fn deleted_is_terminal() {
        assert_eq!(OrgState::Active.apply(Transition::Suspend).unwrap(), OrgState::Suspended);
        assert_eq!(OrgState::Suspended.apply(Transition::Reactivate).unwrap(), OrgState::Active);
        assert_eq!(OrgState::Suspended.apply(Transition::Delete).unwrap(), OrgState::Deleted);
        assert!(OrgState::Active.apply(Transition::Reactivate).is_err());
        assert!(OrgState::Suspended.apply(Transition::Suspend).is_err());
        for t in [Transition::Suspend, Transition::Reactivate, Transition::Delete] {
            assert!(OrgState::Deleted.apply(t).is_err());
        }
    }
}
