// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Stateful Passivation & Eviction - LRU Detachment Under Capacity Pressure
//
// Tracks stateful instances per session. A periodic background sweep
// passivates least-recently-used instances beyond the configured capacity
// and instances idle past the threshold; the next invocation reactivates
// them transparently from the passivation store. A fully removed instance
// is gone: invoking it raises a no-such-instance error, distinguishable
// from business failures.
//
// Lock discipline: the access-order lock is never taken while holding a
// record guard, so the sweep may read records while holding the order.

use crate::application::injection::InjectionTargetService;
use crate::application::instance_bag::BagEntry;
use crate::domain::bean::{BeanId, BeanRegistry};
use crate::domain::config::PassivationConfig;
use crate::domain::creational::CreationalContext;
use crate::domain::error::ContainerError;
use crate::domain::events::PassivationEvent;
use crate::domain::scope::SessionId;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::passivation_store::{PassivatedState, PassivationStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Passivated,
}

#[derive(Debug)]
struct SessionRecord {
    bean: BeanId,
    state: SessionState,
    last_access: DateTime<Utc>,
    /// Detached while passivated.
    entry: Option<BagEntry>,
}

enum Hit {
    Ready(BagEntry),
    Restore(BeanId),
}

/// Concurrent registry of stateful instances and their access order.
pub struct StatefulInstanceRegistry {
    registry: Arc<BeanRegistry>,
    injection: Arc<InjectionTargetService>,
    store: Arc<dyn PassivationStore>,
    events: EventBus,
    records: DashMap<SessionId, SessionRecord>,
    access_order: Mutex<LruCache<SessionId, ()>>,
}

impl StatefulInstanceRegistry {
    pub fn new(
        registry: Arc<BeanRegistry>,
        injection: Arc<InjectionTargetService>,
        store: Arc<dyn PassivationStore>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            injection,
            store,
            events,
            records: DashMap::new(),
            access_order: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Track a freshly created stateful instance.
    pub fn register(
        &self,
        session_id: SessionId,
        bean: BeanId,
        entry: BagEntry,
    ) -> Result<(), ContainerError> {
        entry.context.mark_passivation_capable();
        match self.records.entry(session_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ContainerError::IllegalState(format!(
                    "session {session_id} already holds a stateful instance"
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(SessionRecord {
                    bean,
                    state: SessionState::Active,
                    last_access: Utc::now(),
                    entry: Some(entry),
                });
            }
        }
        self.touch(session_id);
        Ok(())
    }

    /// The instance bound to a session, transparently reactivated from the
    /// store when it was passivated. A session with no record and no stored
    /// payload is gone for good: `NoSuchInstance`.
    pub async fn access(&self, session_id: SessionId) -> Result<BagEntry, ContainerError> {
        let hit = {
            let mut record = self.records.get_mut(&session_id).ok_or_else(|| {
                ContainerError::NoSuchInstance(session_id.to_string())
            })?;
            record.last_access = Utc::now();
            match (&record.state, &record.entry) {
                (SessionState::Active, Some(entry)) => Hit::Ready(entry.clone()),
                _ => Hit::Restore(record.bean),
            }
        };
        self.touch(session_id);

        match hit {
            Hit::Ready(entry) => Ok(entry),
            Hit::Restore(bean) => self.activate(session_id, bean).await,
        }
    }

    /// Detach an active instance into the passivation store. Returns false
    /// when there is nothing to passivate (unknown session, already
    /// passivated). A store failure reattaches the instance.
    pub async fn passivate(&self, session_id: SessionId) -> Result<bool, ContainerError> {
        let (bean, entry) = {
            let Some(mut record) = self.records.get_mut(&session_id) else {
                return Ok(false);
            };
            if record.state != SessionState::Active {
                return Ok(false);
            }
            let Some(entry) = record.entry.take() else {
                return Ok(false);
            };
            record.state = SessionState::Passivated;
            (record.bean, entry)
        };

        match self.capture_and_store(session_id, bean, &entry).await {
            Ok(()) => {
                debug!(%session_id, "stateful instance passivated");
                self.events
                    .publish_passivation_event(PassivationEvent::Passivated {
                        session_id,
                        bean,
                        passivated_at: Utc::now(),
                    });
                Ok(true)
            }
            Err(err) => {
                self.reattach(session_id, entry);
                Err(err)
            }
        }
    }

    /// Full destruction: the instance is destroyed, its stored payload
    /// dropped, and the session forgotten. Subsequent access raises
    /// `NoSuchInstance`.
    pub async fn remove(&self, session_id: SessionId) -> Result<(), ContainerError> {
        let (_, record) = self.records.remove(&session_id).ok_or_else(|| {
            ContainerError::NoSuchInstance(session_id.to_string())
        })?;
        self.access_order.lock().pop(&session_id);

        if let Some(entry) = record.entry {
            let definition = self.registry.get(record.bean)?;
            if let Err(err) =
                self.injection
                    .pre_destroy(&definition, &entry.instance, &entry.context)
            {
                warn!(%session_id, error = %err, "stateful instance destruction failed");
            }
        }
        self.store.remove(session_id).await?;
        self.events
            .publish_passivation_event(PassivationEvent::Removed {
                session_id,
                bean: record.bean,
                removed_at: Utc::now(),
            });
        Ok(())
    }

    /// One sweep pass: idle instances first, then least-recently-used
    /// instances beyond capacity. Capacity pressure passivates; it never
    /// rejects new registrations.
    pub async fn sweep(&self, config: &PassivationConfig) -> usize {
        let mut passivated = 0;
        for session_id in self.idle_victims(config.idle_timeout) {
            match self.passivate(session_id).await {
                Ok(true) => passivated += 1,
                Ok(false) => {}
                Err(err) => warn!(%session_id, error = %err, "idle passivation failed"),
            }
        }
        for session_id in self.capacity_victims(config.capacity) {
            match self.passivate(session_id).await {
                Ok(true) => passivated += 1,
                Ok(false) => {}
                Err(err) => warn!(%session_id, error = %err, "capacity passivation failed"),
            }
        }
        if passivated > 0 {
            debug!(passivated, "passivation sweep complete");
        }
        passivated
    }

    pub async fn shutdown(&self) {
        let session_ids: Vec<SessionId> = self.records.iter().map(|e| *e.key()).collect();
        for session_id in session_ids {
            if let Err(err) = self.remove(session_id).await {
                warn!(%session_id, error = %err, "stateful removal failed during shutdown");
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.state == SessionState::Active)
            .count()
    }

    pub fn passivated_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.state == SessionState::Passivated)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn touch(&self, session_id: SessionId) {
        self.access_order.lock().put(session_id, ());
    }

    fn reattach(&self, session_id: SessionId, entry: BagEntry) {
        if let Some(mut record) = self.records.get_mut(&session_id) {
            record.state = SessionState::Active;
            record.entry = Some(entry);
        }
    }

    async fn capture_and_store(
        &self,
        session_id: SessionId,
        bean: BeanId,
        entry: &BagEntry,
    ) -> Result<(), ContainerError> {
        let definition = self.registry.get(bean)?;
        let hooks = definition.passivation_hooks().ok_or_else(|| {
            ContainerError::Definition(format!(
                "bean '{}' is not passivation capable",
                definition.name()
            ))
        })?;
        let state = (hooks.capture)(&entry.instance)?;
        self.store
            .save(
                session_id,
                PassivatedState {
                    bean,
                    state,
                    passivated_at: Utc::now(),
                },
            )
            .await
    }

    async fn activate(
        &self,
        session_id: SessionId,
        bean: BeanId,
    ) -> Result<BagEntry, ContainerError> {
        let definition = self.registry.get(bean)?;
        let hooks = definition.passivation_hooks().ok_or_else(|| {
            ContainerError::Definition(format!(
                "bean '{}' is not passivation capable",
                definition.name()
            ))
        })?;
        let payload = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| ContainerError::NoSuchInstance(session_id.to_string()))?;
        let instance = (hooks.restore)(payload.state)?;
        let context = Arc::new(CreationalContext::new(bean));
        context.mark_passivation_capable();
        let entry = BagEntry { instance, context };

        {
            let mut record = self.records.get_mut(&session_id).ok_or_else(|| {
                ContainerError::NoSuchInstance(session_id.to_string())
            })?;
            record.state = SessionState::Active;
            record.entry = Some(entry.clone());
            record.last_access = Utc::now();
        }
        self.touch(session_id);
        let _ = self.store.remove(session_id).await;

        debug!(%session_id, "stateful instance reactivated");
        self.events
            .publish_passivation_event(PassivationEvent::Activated {
                session_id,
                bean,
                activated_at: Utc::now(),
            });
        Ok(entry)
    }

    fn idle_victims(&self, idle_timeout: Duration) -> Vec<SessionId> {
        let idle = chrono::Duration::from_std(idle_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now() - idle;
        self.records
            .iter()
            .filter(|record| record.state == SessionState::Active && record.last_access < cutoff)
            .map(|record| *record.key())
            .collect()
    }

    fn capacity_victims(&self, capacity: usize) -> Vec<SessionId> {
        let mut excess = self.active_count().saturating_sub(capacity);
        if excess == 0 {
            return Vec::new();
        }
        let mut order = self.access_order.lock();
        let mut victims = Vec::new();
        while excess > 0 {
            match order.pop_lru() {
                Some((session_id, ())) => {
                    let active = self
                        .records
                        .get(&session_id)
                        .map(|record| {
                            record.state == SessionState::Active && record.entry.is_some()
                        })
                        .unwrap_or(false);
                    // Passivated or removed sessions simply fall out of the
                    // order; they re-enter on next access.
                    if active {
                        victims.push(session_id);
                        excess -= 1;
                    }
                }
                None => break,
            }
        }
        victims
    }
}

impl std::fmt::Debug for StatefulInstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulInstanceRegistry")
            .field("records", &self.records.len())
            .finish()
    }
}

/// Long-lived background sweep, owned by the container lifecycle: started
/// on first use, stopped on shutdown.
pub struct PassivationSweeper {
    registry: Arc<StatefulInstanceRegistry>,
    config: PassivationConfig,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PassivationSweeper {
    pub fn new(registry: Arc<StatefulInstanceRegistry>, config: PassivationConfig) -> Self {
        Self {
            registry,
            config,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Start the periodic sweep. Idempotent: a running sweeper stays as is.
    pub fn start(&self) -> Result<(), ContainerError> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ContainerError::IllegalState(
                "passivation sweeper requires a running async runtime".into(),
            )
        })?;

        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        *slot = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh container
            // does not sweep before anything was registered.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep(&config).await;
                    }
                }
            }
            debug!("passivation sweeper stopped");
        }));
        info!(
            interval = ?self.config.sweep_interval,
            capacity = self.config.capacity,
            "passivation sweeper started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl std::fmt::Debug for PassivationSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassivationSweeper")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chain::InterceptorChainResolver;
    use crate::domain::bean::{BeanDefinition, BeanHandle, PassivationHooks};
    use crate::infrastructure::passivation_store::InMemoryPassivationStore;
    use serde_json::json;

    struct Counter {
        value: Mutex<u64>,
    }

    fn counter_definition() -> BeanDefinition {
        BeanDefinition::builder("counter")
            .scope(crate::domain::scope::ScopeKind::Session)
            .passivation_hooks(PassivationHooks::new(
                |instance| {
                    let counter = instance
                        .downcast_ref::<Counter>()
                        .ok_or_else(|| ContainerError::IllegalState("wrong type".into()))?;
                    Ok(json!({ "value": *counter.value.lock() }))
                },
                |state| {
                    let value = state["value"].as_u64().unwrap_or(0);
                    Ok(Arc::new(Counter {
                        value: Mutex::new(value),
                    }) as BeanHandle)
                },
            ))
            .constructor(|_ctx| {
                Ok(Arc::new(Counter {
                    value: Mutex::new(0),
                }) as BeanHandle)
            })
            .build()
            .unwrap()
    }

    fn stateful_registry(definition: BeanDefinition) -> (StatefulInstanceRegistry, BeanId) {
        let bean = definition.id();
        let registry = Arc::new(BeanRegistry::new(vec![definition]).unwrap());
        let injection = Arc::new(InjectionTargetService::new(Arc::new(
            InterceptorChainResolver::new(Vec::new()),
        )));
        let stateful = StatefulInstanceRegistry::new(
            registry,
            injection,
            Arc::new(InMemoryPassivationStore::new()),
            EventBus::new(16),
        );
        (stateful, bean)
    }

    fn entry_with(value: u64, bean: BeanId) -> BagEntry {
        BagEntry {
            instance: Arc::new(Counter {
                value: Mutex::new(value),
            }) as BeanHandle,
            context: Arc::new(CreationalContext::new(bean)),
        }
    }

    #[tokio::test]
    async fn passivated_instance_reactivates_with_state_intact() {
        let (stateful, bean) = stateful_registry(counter_definition());
        let session_id = SessionId::new();
        stateful
            .register(session_id, bean, entry_with(41, bean))
            .unwrap();

        assert!(stateful.passivate(session_id).await.unwrap());
        assert_eq!(stateful.active_count(), 0);
        assert_eq!(stateful.passivated_count(), 1);

        // Transparent reactivation on next access.
        let entry = stateful.access(session_id).await.unwrap();
        let counter = entry.instance.downcast_ref::<Counter>().unwrap();
        assert_eq!(*counter.value.lock(), 41);
        assert_eq!(stateful.active_count(), 1);
    }

    #[tokio::test]
    async fn removed_instance_raises_no_such_instance() {
        let (stateful, bean) = stateful_registry(counter_definition());
        let session_id = SessionId::new();
        stateful
            .register(session_id, bean, entry_with(1, bean))
            .unwrap();

        stateful.remove(session_id).await.unwrap();
        let err = stateful.access(session_id).await.unwrap_err();
        assert!(matches!(err, ContainerError::NoSuchInstance(_)));
    }

    #[tokio::test]
    async fn capacity_sweep_passivates_least_recently_used_first() {
        let (stateful, bean) = stateful_registry(counter_definition());
        let first = SessionId::new();
        let second = SessionId::new();
        let third = SessionId::new();
        for (session_id, value) in [(first, 1), (second, 2), (third, 3)] {
            stateful
                .register(session_id, bean, entry_with(value, bean))
                .unwrap();
        }
        // Refresh the first session: the second becomes least recently used.
        stateful.access(first).await.unwrap();

        let config = PassivationConfig {
            capacity: 2,
            sweep_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(3600),
        };
        let passivated = stateful.sweep(&config).await;
        assert_eq!(passivated, 1);
        assert_eq!(stateful.active_count(), 2);

        let entry = stateful.access(second).await.unwrap();
        let counter = entry.instance.downcast_ref::<Counter>().unwrap();
        assert_eq!(*counter.value.lock(), 2);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (stateful, bean) = stateful_registry(counter_definition());
        let session_id = SessionId::new();
        stateful
            .register(session_id, bean, entry_with(1, bean))
            .unwrap();
        let err = stateful
            .register(session_id, bean, entry_with(2, bean))
            .unwrap_err();
        assert!(matches!(err, ContainerError::IllegalState(_)));
    }
}
