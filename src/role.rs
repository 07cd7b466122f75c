// kyc-realtime-kit/src/role.rs

//! Portal roles and what each role's dashboard needs.

use crate::cache::key::ScopeKey;
use crate::events::KycEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An authenticated user's role, as issued by the login endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Client,
    /// A third party with read access to client submissions.
    Triparty,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Client, Role::Triparty];

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
            Role::Triparty => "triparty",
        }
    }

    /// Where the role lands after authentication.
    pub const fn dashboard_route(self) -> &'static str {
        match self {
            Role::Admin => "/admin/dashboard",
            Role::Client => "/client/dashboard",
            Role::Triparty => "/triparty/dashboard",
        }
    }

    /// The events the role's dashboard subscribes to. Triparty dashboards
    /// share the client set.
    pub const fn event_set(self) -> &'static [KycEvent] {
        match self {
            Role::Admin => KycEvent::ADMIN_SET,
            Role::Client | Role::Triparty => KycEvent::CLIENT_SET,
        }
    }

    /// `(kyc, <role>)`, the root of every query this role reads.
    pub fn scope(self) -> ScopeKey {
        ScopeKey::kyc().child(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "client" | "user" => Ok(Role::Client),
            "triparty" | "tri-party" => Ok(Role::Triparty),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_a_route_and_an_event_set() {
        let routes: Vec<&str> = Role::ALL.iter().map(|r| r.dashboard_route()).collect();
        assert_eq!(
            routes,
            vec!["/admin/dashboard", "/client/dashboard", "/triparty/dashboard"]
        );
        assert_eq!(Role::Triparty.event_set(), Role::Client.event_set());
        assert!(Role::Admin.event_set().contains(&KycEvent::DocumentUploaded));
    }

    #[test]
    fn roles_parse_leniently_and_reject_unknown_names() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" tri-party ".parse::<Role>(), Ok(Role::Triparty));
        assert_eq!(
            "auditor".parse::<Role>(),
            Err(UnknownRole("auditor".to_string()))
        );
        assert_eq!(Role::Client.scope().to_string(), "(kyc, client)");
    }
}
