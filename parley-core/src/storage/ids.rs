//! Client-assigned identifiers
//!
//! Ids are minted on the device as UUID v4 strings and used verbatim as
//! primary keys on the remote side.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! client_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wrap an id read back from storage or the remote.
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

client_id!(ConversationId);
client_id!(
    /// Assigned when the message is created, before any network call.
    MessageId
);
client_id!(AttachmentId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = ConversationId::from_string("c-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-1\"");
        assert_eq!(id.to_string(), "c-1");
    }
}
