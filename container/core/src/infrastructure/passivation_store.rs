// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Passivation Store - Detached Stateful Instance Payloads
//
// Where passivated state goes while an instance is out of memory. The
// in-memory store backs tests and single-node deployments; the file store
// keeps one JSON payload per session under a root directory.

use crate::domain::bean::BeanId;
use crate::domain::error::ContainerError;
use crate::domain::scope::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

/// Captured state of one passivated instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassivatedState {
    pub bean: BeanId,
    pub state: Value,
    pub passivated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PassivationStore: Send + Sync {
    async fn save(
        &self,
        session_id: SessionId,
        payload: PassivatedState,
    ) -> Result<(), ContainerError>;

    async fn load(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PassivatedState>, ContainerError>;

    async fn remove(&self, session_id: SessionId) -> Result<(), ContainerError>;
}

#[derive(Default)]
pub struct InMemoryPassivationStore {
    entries: DashMap<SessionId, PassivatedState>,
}

impl InMemoryPassivationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PassivationStore for InMemoryPassivationStore {
    async fn save(
        &self,
        session_id: SessionId,
        payload: PassivatedState,
    ) -> Result<(), ContainerError> {
        self.entries.insert(session_id, payload);
        Ok(())
    }

    async fn load(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PassivatedState>, ContainerError> {
        Ok(self.entries.get(&session_id).map(|entry| entry.clone()))
    }

    async fn remove(&self, session_id: SessionId) -> Result<(), ContainerError> {
        self.entries.remove(&session_id);
        Ok(())
    }
}

/// File-backed store: one `<session>.json` per passivated instance.
pub struct FilePassivationStore {
    root: PathBuf,
}

impl FilePassivationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, session_id: SessionId) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl PassivationStore for FilePassivationStore {
    async fn save(
        &self,
        session_id: SessionId,
        payload: PassivatedState,
    ) -> Result<(), ContainerError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| ContainerError::Store(err.to_string()))?;
        let bytes = serde_json::to_vec_pretty(&payload)
            .map_err(|err| ContainerError::Store(err.to_string()))?;
        let path = self.path_for(session_id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| ContainerError::Store(err.to_string()))?;
        debug!(%session_id, path = %path.display(), "passivated state written");
        Ok(())
    }

    async fn load(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PassivatedState>, ContainerError> {
        let path = self.path_for(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ContainerError::Store(err.to_string())),
        };
        let payload = serde_json::from_slice(&bytes)
            .map_err(|err| ContainerError::Store(err.to_string()))?;
        Ok(Some(payload))
    }

    async fn remove(&self, session_id: SessionId) -> Result<(), ContainerError> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ContainerError::Store(err.to_string())),
        }
    }
}
