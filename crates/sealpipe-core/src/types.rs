//! Strong type definitions for sealpipe.
//!
//! All identifiers are newtypes to prevent misuse at compile time. They are
//! strings on the wire because the collaboration backend speaks JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the string form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a symmetric key (UUID-like).
    KeyId
);

string_id!(
    /// Content id of an encrypted literal in the value registry.
    ContentId
);

string_id!(
    /// A collaborator's user id.
    UserId
);

string_id!(
    /// Handle of a data space.
    SpaceHandle
);

impl KeyId {
    /// Generate a fresh random key id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl ContentId {
    /// Generate a fresh content id.
    ///
    /// Content ids must not leak the plaintext they point at, so they are
    /// random rather than derived from the value.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_is_uuid_shaped() {
        let id = KeyId::generate();
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(id.as_str().matches('-').count(), 4);
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(KeyId::generate(), KeyId::generate());
        assert_ne!(ContentId::generate(), ContentId::generate());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let user = UserId::new("alice");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"alice\"");
        let back: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(back, user);
    }
}
