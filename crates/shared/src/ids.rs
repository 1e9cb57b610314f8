//! Identifier newtypes for the two identifier spaces the bridge joins.
//!
//! `ClientId` is minted by the bridge for a connected browser client (and is
//! also the id the execution engine keys its event stream by). `ExecutionId`
//! is assigned by the engine when a submission is accepted. The two spaces
//! are deliberately distinct types; the pending-execution table is the only
//! place they are joined.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(ClientId);

/// Opaque execution identifier assigned by the execution engine.
///
/// Unlike [`ClientId`] this is not ours to mint; it is whatever string the
/// engine returned from a submission and is only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn execution_id_serializes_as_plain_string() {
        let id = ExecutionId::new("abc-123");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"abc-123\"");
        let back: ExecutionId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
