use serde::Serialize;

use super::domain::{AgentId, PropertyRef, UserId};
use super::window::OperatingWindow;

/// Caller identity after the identity collaborator has resolved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Anonymous visitor known only by the name and phone they type in.
    Visitor,
    Member(UserId),
    Agent { user_id: UserId, agent_id: AgentId },
    Administrator(UserId),
}

impl Principal {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Principal::Visitor => None,
            Principal::Member(user_id)
            | Principal::Agent { user_id, .. }
            | Principal::Administrator(user_id) => Some(user_id),
        }
    }

    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Principal::Agent { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

/// Identity and agency-settings collaborator.
pub trait AgencyDirectory: Send + Sync {
    fn resolve(&self, user_id: &UserId) -> Result<Option<Principal>, DirectoryError>;
    fn can_manage(&self, principal: &Principal, agent_id: &AgentId) -> Result<bool, DirectoryError>;
    /// `None` when the agent has never configured a window.
    fn operating_window(&self, agent_id: &AgentId)
        -> Result<Option<OperatingWindow>, DirectoryError>;
    fn store_operating_window(
        &self,
        agent_id: &AgentId,
        window: OperatingWindow,
    ) -> Result<(), DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("identity directory unavailable: {0}")]
    Unavailable(String),
}

/// Minimal catalog data: existence plus the display name used by free-text search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertySummary {
    pub reference: PropertyRef,
    pub name: String,
}

pub trait PropertyCatalog: Send + Sync {
    fn lookup(&self, reference: &PropertyRef) -> Result<Option<PropertySummary>, CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("property catalog unavailable: {0}")]
    Unavailable(String),
}
