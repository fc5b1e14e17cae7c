//! Gerrit accounts.

use serde::Serialize;

use crate::api::types::AccountInfo;

/// An account as returned by the server.
///
/// Gerrit sends either a bare `_account_id` or, with `DETAILED_ACCOUNTS`, the
/// name, email and username as well. Which one was received is decided once
/// when the payload is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GerritUser {
    Summary { account_id: Option<u64> },
    Detailed(DetailedUser),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailedUser {
    pub account_id: Option<u64>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl GerritUser {
    #[must_use]
    pub fn from_info(info: &AccountInfo) -> Self {
        let detailed = info.name.is_some()
            || info.display_name.is_some()
            || info.email.is_some()
            || info.username.is_some();
        if !detailed {
            return GerritUser::Summary {
                account_id: info.account_id,
            };
        }
        GerritUser::Detailed(DetailedUser {
            account_id: info.account_id,
            name: info.name.clone(),
            display_name: info.display_name.clone(),
            email: info.email.clone(),
            username: info.username.clone(),
            avatar_url: info
                .avatars
                .iter()
                .max_by_key(|a| a.height.unwrap_or_default())
                .map(|a| a.url.clone()),
        })
    }

    #[must_use]
    pub fn account_id(&self) -> Option<u64> {
        match self {
            GerritUser::Summary { account_id } => *account_id,
            GerritUser::Detailed(user) => user.account_id,
        }
    }

    #[must_use]
    pub fn is_detailed(&self) -> bool {
        matches!(self, GerritUser::Detailed(_))
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            GerritUser::Summary { .. } => None,
            GerritUser::Detailed(user) => user.email.as_deref(),
        }
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            GerritUser::Summary { .. } => None,
            GerritUser::Detailed(user) => user.username.as_deref(),
        }
    }

    /// Best human-readable name available.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            GerritUser::Detailed(user) => user
                .display_name
                .as_ref()
                .or(user.name.as_ref())
                .or(user.username.as_ref())
                .or(user.email.as_ref())
                .cloned()
                .unwrap_or_else(|| fallback_name(user.account_id)),
            GerritUser::Summary { account_id } => fallback_name(*account_id),
        }
    }
}

fn fallback_name(account_id: Option<u64>) -> String {
    match account_id {
        Some(id) => format!("Account {id}"),
        None => "Unknown account".to_string(),
    }
}
