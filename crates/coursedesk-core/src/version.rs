//! Version tokens for optimistic concurrency control.

use serde::{Deserialize, Serialize};

/// Opaque concurrency token attached to every mutable row.
///
/// Tokens are assigned and replaced by the store; domain code only ever
/// compares them for equality. The wrapped integer is deliberately not
/// ordered; a token answers "has this row changed since I read it?" and
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(i64);

impl VersionToken {
    /// The token a store assigns to a freshly inserted row.
    #[must_use]
    pub const fn initial() -> Self {
        Self(1)
    }

    /// The replacement token after a successful conditional write.
    ///
    /// For store implementations only; domain code never advances a token
    /// itself.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw value, for store implementations that bind it into a query.
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Reconstructs a token read back from a store row.
    #[must_use]
    pub const fn from_raw(value: i64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}
