//! Branded ID newtypes.
//!
//! Every identifier that crosses the wire is a distinct newtype around
//! `String`, so a user ID cannot be passed where an envelope ID is expected.
//! Locally generated IDs are UUID v7 (time-ordered).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier of a single envelope. Used for response correlation.
    EnvelopeId
}

branded_id! {
    /// Identifier of one client session (one authenticated login).
    SessionId
}

branded_id! {
    /// Identifier of an application user.
    UserId
}

branded_id! {
    /// Identifier of a match (the conversation scope between two users).
    MatchId
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_ids_are_unique() {
        let ids: HashSet<EnvelopeId> = (0..1000).map(|_| EnvelopeId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let a = EnvelopeId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = EnvelopeId::new();
        assert!(a < b);
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId::from("user-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user-1\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deref_and_display() {
        let id = MatchId::from("m-42");
        assert_eq!(&*id, "m-42");
        assert_eq!(id.to_string(), "m-42");
        assert_eq!(String::from(id), "m-42");
    }
}
