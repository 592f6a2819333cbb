// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::bean::BeanId;
use crate::domain::scope::{RequestId, ScopeKind, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scope activation/deactivation signals, exchanged with the surrounding
/// request layer and re-published for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScopeEvent {
    RequestStarted {
        request_id: RequestId,
        started_at: DateTime<Utc>,
    },
    RequestEnded {
        request_id: RequestId,
        destroyed: usize,
        failed: usize,
        ended_at: DateTime<Utc>,
    },
    SessionCreated {
        session_id: SessionId,
        created_at: DateTime<Utc>,
    },
    SessionInvalidated {
        session_id: SessionId,
        destroyed: usize,
        failed: usize,
        invalidated_at: DateTime<Utc>,
    },
    ApplicationStarted {
        started_at: DateTime<Utc>,
    },
    ApplicationStopped {
        stopped_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstanceEvent {
    Created {
        bean: BeanId,
        scope: ScopeKind,
        created_at: DateTime<Utc>,
    },
    Destroyed {
        bean: BeanId,
        destroyed_at: DateTime<Utc>,
    },
    DestroyFailed {
        bean: BeanId,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PassivationEvent {
    Passivated {
        session_id: SessionId,
        bean: BeanId,
        passivated_at: DateTime<Utc>,
    },
    Activated {
        session_id: SessionId,
        bean: BeanId,
        activated_at: DateTime<Utc>,
    },
    Removed {
        session_id: SessionId,
        bean: BeanId,
        removed_at: DateTime<Utc>,
    },
}
