use serde::{Deserialize, Serialize};

/// Permission tokens checked by the route gate.
///
/// Granting and revoking happens outside this service; the gate only consumes
/// the resolved set attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "entities:read")]
    ReadEntities,
    #[serde(rename = "overrides:write")]
    WriteOverrides,
    #[serde(rename = "overrides:delete")]
    DeleteOverrides,
    #[serde(rename = "snapshots:read")]
    ReadSnapshots,
    #[serde(rename = "routes:read")]
    ReadRoutes,
    #[serde(rename = "accounts:read")]
    ReadAccounts,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::ReadEntities,
        Permission::WriteOverrides,
        Permission::DeleteOverrides,
        Permission::ReadSnapshots,
        Permission::ReadRoutes,
        Permission::ReadAccounts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadEntities => "entities:read",
            Permission::WriteOverrides => "overrides:write",
            Permission::DeleteOverrides => "overrides:delete",
            Permission::ReadSnapshots => "snapshots:read",
            Permission::ReadRoutes => "routes:read",
            Permission::ReadAccounts => "accounts:read",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_through_display() {
        for permission in Permission::ALL {
            assert_eq!(permission.to_string().parse::<Permission>(), Ok(permission));
        }
    }

    #[test]
    fn serde_uses_token_strings() {
        let json = serde_json::to_string(&Permission::WriteOverrides).unwrap();
        assert_eq!(json, "\"overrides:write\"");
    }
}
