use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Blocked,
    Banned,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
            UserStatus::Banned => "banned",
            UserStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UserStatus::Active),
            "blocked" => Some(UserStatus::Blocked),
            "banned" => Some(UserStatus::Banned),
            "deleted" => Some(UserStatus::Deleted),
            _ => None,
        }
    }

    /// Deactivated users must not retain a billable active subscription.
    pub fn is_deactivated(&self) -> bool {
        matches!(
            self,
            UserStatus::Blocked | UserStatus::Banned | UserStatus::Deleted
        )
    }

    /// Transitions are one-way, except blocked/banned users can be
    /// restored to active. Deleted is terminal.
    pub fn can_transition_to(&self, next: UserStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (UserStatus::Deleted, _) => false,
            (UserStatus::Active, _) => true,
            (UserStatus::Blocked, _) => true,
            (UserStatus::Banned, UserStatus::Active) => true,
            (UserStatus::Banned, UserStatus::Deleted) => true,
            _ => false,
        }
    }
}
