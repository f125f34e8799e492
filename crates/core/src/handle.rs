//! Opaque resource handles
//!
//! A [`Handle`] names an entry in one of the registries (connection,
//! transaction, statement, cursor). It carries no behavior: callers hold it,
//! pass it back, and compare it. Freshly issued handles are UUID v4 strings,
//! but any string is accepted as a presented handle so that forged or stale
//! values fail lookup with `NotFound` instead of failing to parse.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, globally-unique identifier for a registry entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Issue a fresh handle (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The handle as presented to callers
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the handle, returning its string form
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Handle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Handle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
