//! Projects and groups, as returned by the suggestion endpoints.

use serde::Serialize;

use crate::api::types::{GroupInfo, ProjectInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GerritProject {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub state: Option<String>,
}

impl GerritProject {
    #[must_use]
    pub fn from_info(info: ProjectInfo) -> Self {
        let name = info.name.clone().unwrap_or_else(|| info.id.clone());
        Self {
            id: info.id,
            name,
            description: info.description,
            state: info.state,
        }
    }

    /// Read-only and hidden projects cannot receive changes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.as_deref().is_none_or(|s| s == "ACTIVE")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GerritGroup {
    pub id: String,
    pub name: String,
    pub group_id: Option<u64>,
    pub owner: Option<String>,
    pub description: Option<String>,
}

impl GerritGroup {
    #[must_use]
    pub fn from_info(info: GroupInfo) -> Self {
        let name = info.name.clone().unwrap_or_else(|| info.id.clone());
        Self {
            id: info.id,
            name,
            group_id: info.group_id,
            owner: info.owner,
            description: info.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_falls_back_to_id() {
        let project = GerritProject::from_info(ProjectInfo {
            id: "demo".to_string(),
            name: None,
            description: None,
            state: Some("READ_ONLY".to_string()),
        });
        assert_eq!(project.name, "demo");
        assert!(!project.is_active());
    }
}
