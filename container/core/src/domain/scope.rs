// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The scope governing a contextual instance's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// One instance for the whole container lifetime.
    Application,
    /// One instance per inbound request; destroyed on request completion.
    Request,
    /// One instance per session; destroyed on invalidation or timeout.
    Session,
    /// No context of its own: lifetime rides the owning creational context.
    Dependent,
    /// Extension-provided scope, keyed by name.
    Custom(String),
}

impl ScopeKind {
    /// Normal scopes hold instances in a context; dependent instances are
    /// owned by whatever injected them.
    pub fn is_normal(&self) -> bool {
        !matches!(self, ScopeKind::Dependent)
    }

    /// Session instances are the only ones subject to passivation.
    pub fn is_passivating(&self) -> bool {
        matches!(self, ScopeKind::Session)
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Application => write!(f, "application"),
            ScopeKind::Request => write!(f, "request"),
            ScopeKind::Session => write!(f, "session"),
            ScopeKind::Dependent => write!(f, "dependent"),
            ScopeKind::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependent_is_the_only_non_normal_scope() {
        assert!(ScopeKind::Application.is_normal());
        assert!(ScopeKind::Request.is_normal());
        assert!(ScopeKind::Session.is_normal());
        assert!(ScopeKind::Custom("conversation".into()).is_normal());
        assert!(!ScopeKind::Dependent.is_normal());
    }

    #[test]
    fn scope_kind_round_trips_through_serde() {
        let kind = ScopeKind::Custom("conversation".into());
        let json = serde_json::to_string(&kind).unwrap();
        let back: ScopeKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, back);
    }
}
