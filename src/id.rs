// SPDX-License-Identifier: Apache-2.0/MIT
//! The opaque, totally-ordered target identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, totally-ordered identifier for a [`crate::plan::Target`].
///
/// Unique within one [`crate::plan::Plan`]. The empty id is never valid; it
/// is rejected wherever a `TargetId` enters the system (`Plan::add`,
/// `Executor::execute_selected`, ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(String);

impl TargetId {
    /// Build a `TargetId` from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        TargetId(id.into())
    }

    /// Borrow the id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the empty id, which is never a valid target identifier.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        TargetId(s.to_owned())
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        TargetId(s)
    }
}

impl std::borrow::Borrow<str> for TargetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
