// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Managed Executor Registry - Name-Keyed Executor Resolution
//
// Managed executors are container-provided thread-pool abstractions backed
// by the tokio runtime. Asynchronous dispatch resolves them by name;
// a missing name surfaces as a rejected-execution error to the caller.

use crate::domain::error::ContainerError;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Name the container registers its default executor under.
pub const DEFAULT_EXECUTOR: &str = "default";

pub struct ManagedExecutor {
    name: String,
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
}

impl ManagedExecutor {
    pub fn new(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
            permits: None,
        }
    }

    /// Executor with a bounded number of concurrently running tasks.
    /// Submission never blocks the caller; tasks over the bound wait for a
    /// permit inside the executor (soft backpressure, no rejection).
    pub fn with_concurrency_limit(
        name: impl Into<String>,
        handle: Handle,
        limit: usize,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            permits: Some(Arc::new(Semaphore::new(limit))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand a task to the executor and return immediately.
    pub fn submit<F>(&self, task: F) -> Result<(), ContainerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let name = self.name.clone();
        self.handle.spawn(async move {
            let _permit = match permits {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!(executor = %name, "executor closed, dropping task");
                        return;
                    }
                },
                None => None,
            };
            task.await;
        });
        Ok(())
    }
}

impl std::fmt::Debug for ManagedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedExecutor")
            .field("name", &self.name)
            .field("bounded", &self.permits.is_some())
            .finish()
    }
}

/// Registry of managed executors, keyed by name.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<String, Arc<ManagedExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its name. The first registration wins;
    /// a later executor with the same name is dropped.
    pub fn register(&self, executor: Arc<ManagedExecutor>) {
        let name = executor.name().to_string();
        debug!(executor = %name, "registering managed executor");
        self.executors.entry(name).or_insert(executor);
    }

    /// Resolve an executor by name. Failure to resolve is a
    /// rejected-execution condition for the requesting invocation.
    pub fn lookup(&self, name: &str) -> Result<Arc<ManagedExecutor>, ContainerError> {
        self.executors
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ContainerError::RejectedExecution(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn available_names(&self) -> Vec<String> {
        self.executors
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.executors.len())
            .finish()
    }
}
