// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability strings: `kind:provider` tokens a worker advertises and a task requires.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque capability string of the form `kind:provider`, e.g. `observation:mistral`.
///
/// Capabilities are compared and hashed as plain strings; the `kind`/`provider`
/// split is informative only (used by capability resolution in the task
/// service) and is not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(kind: impl AsRef<str>, provider: impl AsRef<str>) -> Self {
        Self(format!("{}:{}", kind.as_ref(), provider.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(kind, provider)` if the capability has the expected shape.
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once(':')
    }

    pub fn kind(&self) -> &str {
        self.split().map(|(k, _)| k).unwrap_or(&self.0)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Capability {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Capability {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Capability {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_kind_provider_form() {
        let cap = Capability::new("observation", "mistral");
        assert_eq!(cap.as_str(), "observation:mistral");
        assert_eq!(cap.kind(), "observation");
    }

    #[test]
    fn split_returns_none_without_colon() {
        let cap = Capability::from("malformed");
        assert_eq!(cap.split(), None);
        assert_eq!(cap.kind(), "malformed");
    }
}
