//! Strongly-typed identifiers for swarm recovery entities
//!
//! Engine-generated IDs are UUID-based and wrapped in newtype structs.
//! Trigger IDs come from the upstream detection subsystem and are kept
//! as opaque strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a recovery workflow
    WorkflowId,
    "workflow"
);

uuid_id!(
    /// Unique identifier for a single attempt inside a workflow
    AttemptId,
    "attempt"
);

uuid_id!(
    /// Unique identifier for a healing session
    SessionId,
    "session"
);

uuid_id!(
    /// Unique identifier for a top-level orchestration
    OrchestrationId,
    "orchestration"
);

/// Identifier of a trigger as assigned by its producer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trigger:{}", self.0)
    }
}
