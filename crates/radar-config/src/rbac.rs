use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Roles ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
}

impl Role {
    /// Writers may do everything readers may.
    pub fn can_read(&self) -> bool {
        matches!(self, Role::Reader | Role::Writer)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Role::Writer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Reader => write!(f, "reader"),
            Role::Writer => write!(f, "writer"),
        }
    }
}

// ── Identity → role map ───────────────────────────────────────────────────────

/// Maps mTLS identities (the stable string form of a certificate Subject DN)
/// to their role. Identities not present in the map have no access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RbacConfig {
    #[serde(default)]
    pub roles: HashMap<String, Role>,
}

impl RbacConfig {
    pub fn new(roles: HashMap<String, Role>) -> Self {
        RbacConfig { roles }
    }

    pub fn role_for(&self, identity: &str) -> Option<Role> {
        self.roles.get(identity).copied()
    }
}
