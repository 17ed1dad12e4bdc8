//! Strongly-typed entity identifiers.
//!
//! Every persisted entity is keyed by a UUID. Wrapping each family in its
//! own newtype keeps an `AgentId` from ever being passed where a
//! `DeploymentId` is expected, at zero runtime cost. All identifiers
//! serialize as their canonical hyphenated string form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random (v4) identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// A user identifier, issued by the external identity provider
    /// (the JWT `sub` claim of a user token).
    UserId
}

uuid_id! {
    /// A machine-client identifier (the JWT `sub` claim of an M2M token).
    ClientId
}

uuid_id! {
    /// An agent identifier.
    AgentId
}

uuid_id! {
    /// An agent-version identifier. Versions also carry a per-agent
    /// integer `version_number`; this is the global row key.
    VersionId
}

uuid_id! {
    /// A deployment identifier. Also the basis of the idempotency key for
    /// every external resource the deployment pipeline creates.
    DeploymentId
}

uuid_id! {
    /// A conversation identifier.
    ConversationId
}

uuid_id! {
    /// A message identifier.
    MessageId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_display_parse() {
        let id = AgentId::generate();
        let parsed: AgentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_is_transparent() {
        let id = DeploymentId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: DeploymentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn rejects_malformed_uuid() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn debug_includes_type_name() {
        let id = ConversationId::generate();
        let debug = format!("{id:?}");
        assert!(debug.starts_with("ConversationId("));
    }
}
