// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Scope Lifecycle Manager - Context Activation, Deactivation and Teardown
//
// Each normal scope holds its instances in a ScopeContext. Contexts move
// INACTIVE -> ACTIVE -> DESTROYED and are never reused; request contexts
// ride inbound requests, session contexts ride sessions, the application
// context rides the container itself. Dependent instances have no context
// here: their lifetime is the owning creational context.

use crate::application::injection::InjectionTargetService;
use crate::application::instance_bag::{BagEntry, InstanceBag};
use crate::domain::bean::{BeanId, BeanRegistry};
use crate::domain::error::{ContainerError, InvocationError};
use crate::domain::events::{InstanceEvent, ScopeEvent};
use crate::domain::scope::{RequestId, ScopeKind, SessionId};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Inactive,
    Active,
    /// Terminal: a destroyed context is torn down, never reactivated.
    Destroyed,
}

/// Holds the instance bags of one scope instance.
pub struct ScopeContext {
    scope: ScopeKind,
    state: Mutex<ContextState>,
    bags: DashMap<BeanId, Arc<InstanceBag>>,
}

impl ScopeContext {
    pub fn new(scope: ScopeKind) -> Self {
        Self {
            scope,
            state: Mutex::new(ContextState::Inactive),
            bags: DashMap::new(),
        }
    }

    pub fn scope(&self) -> &ScopeKind {
        &self.scope
    }

    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ContextState::Active
    }

    pub fn activate(&self) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        match *state {
            ContextState::Inactive => {
                *state = ContextState::Active;
                Ok(())
            }
            ContextState::Active => Err(ContainerError::IllegalState(format!(
                "{} context is already active",
                self.scope
            ))),
            ContextState::Destroyed => Err(ContainerError::IllegalState(format!(
                "{} context is torn down and cannot be reactivated",
                self.scope
            ))),
        }
    }

    /// The slot for a bean in this context, created atomically on first
    /// registration.
    pub fn bag_for(&self, bean: BeanId) -> Result<Arc<InstanceBag>, ContainerError> {
        if !self.is_active() {
            return Err(ContainerError::IllegalState(format!(
                "{} context is not active",
                self.scope
            )));
        }
        Ok(Arc::clone(
            self.bags
                .entry(bean)
                .or_insert_with(|| Arc::new(InstanceBag::new(bean)))
                .value(),
        ))
    }

    pub fn instance_count(&self) -> usize {
        self.bags
            .iter()
            .filter(|entry| entry.value().is_populated())
            .count()
    }

    /// Tear the context down, destroying every contained instance.
    ///
    /// Failures are isolated per instance: one failing destroy callback is
    /// reported and the remaining siblings are still destroyed. Returns the
    /// destroyed count and the collected failures.
    pub fn destroy<F>(&self, mut destroyer: F) -> (usize, Vec<InvocationError>)
    where
        F: FnMut(BeanId, BagEntry) -> Result<(), InvocationError>,
    {
        {
            let mut state = self.state.lock();
            if *state == ContextState::Destroyed {
                return (0, Vec::new());
            }
            *state = ContextState::Destroyed;
        }

        let beans: Vec<BeanId> = self.bags.iter().map(|entry| *entry.key()).collect();
        let mut destroyed = 0;
        let mut failures = Vec::new();
        for bean in beans {
            let Some((_, bag)) = self.bags.remove(&bean) else {
                continue;
            };
            let Some(entry) = bag.take() else {
                continue;
            };
            match destroyer(bean, entry) {
                Ok(()) => destroyed += 1,
                Err(err) => {
                    warn!(scope = %self.scope, %bean, error = %err, "instance destruction failed");
                    failures.push(err);
                }
            }
        }
        debug!(scope = %self.scope, destroyed, failed = failures.len(), "context torn down");
        (destroyed, failures)
    }
}

impl std::fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeContext")
            .field("scope", &self.scope)
            .field("state", &self.state())
            .field("bags", &self.bags.len())
            .finish()
    }
}

/// Drives scope transitions from the surrounding request layer's signals.
pub struct ScopeLifecycleService {
    registry: Arc<BeanRegistry>,
    injection: Arc<InjectionTargetService>,
    events: EventBus,
    application: Arc<ScopeContext>,
    requests: DashMap<RequestId, Arc<ScopeContext>>,
    sessions: DashMap<SessionId, Arc<ScopeContext>>,
    custom: DashMap<String, Arc<ScopeContext>>,
}

impl ScopeLifecycleService {
    pub fn new(
        registry: Arc<BeanRegistry>,
        injection: Arc<InjectionTargetService>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            injection,
            events,
            application: Arc::new(ScopeContext::new(ScopeKind::Application)),
            requests: DashMap::new(),
            sessions: DashMap::new(),
            custom: DashMap::new(),
        }
    }

    pub fn application(&self) -> &Arc<ScopeContext> {
        &self.application
    }

    pub fn activate_application(&self) -> Result<(), ContainerError> {
        self.application.activate()?;
        self.events.publish_scope_event(ScopeEvent::ApplicationStarted {
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Inbound request start: activates a fresh request context.
    pub fn begin_request(&self) -> RequestId {
        let request_id = RequestId::new();
        let context = Arc::new(ScopeContext::new(ScopeKind::Request));
        // A freshly built context cannot refuse activation.
        let _ = context.activate();
        self.requests.insert(request_id, context);
        debug!(%request_id, "request scope activated");
        self.events.publish_scope_event(ScopeEvent::RequestStarted {
            request_id,
            started_at: Utc::now(),
        });
        request_id
    }

    /// Request completion, normal or abnormal: destroys every
    /// request-scoped instance the request created.
    pub fn end_request(&self, request_id: RequestId) -> Result<(), ContainerError> {
        let (_, context) = self.requests.remove(&request_id).ok_or_else(|| {
            ContainerError::IllegalState(format!("unknown request {request_id}"))
        })?;
        let (destroyed, failures) = self.teardown(&context);
        self.events.publish_scope_event(ScopeEvent::RequestEnded {
            request_id,
            destroyed,
            failed: failures.len(),
            ended_at: Utc::now(),
        });
        Ok(())
    }

    pub fn create_session(&self) -> SessionId {
        let session_id = SessionId::new();
        let context = Arc::new(ScopeContext::new(ScopeKind::Session));
        let _ = context.activate();
        self.sessions.insert(session_id, context);
        debug!(%session_id, "session scope activated");
        self.events.publish_scope_event(ScopeEvent::SessionCreated {
            session_id,
            created_at: Utc::now(),
        });
        session_id
    }

    /// Explicit invalidation or session timeout.
    pub fn invalidate_session(&self, session_id: SessionId) -> Result<(), ContainerError> {
        let (_, context) = self.sessions.remove(&session_id).ok_or_else(|| {
            ContainerError::IllegalState(format!("unknown session {session_id}"))
        })?;
        let (destroyed, failures) = self.teardown(&context);
        self.events.publish_scope_event(ScopeEvent::SessionInvalidated {
            session_id,
            destroyed,
            failed: failures.len(),
            invalidated_at: Utc::now(),
        });
        Ok(())
    }

    /// Activate an extension-provided scope under a name.
    pub fn activate_custom(&self, name: &str) -> Arc<ScopeContext> {
        let context = Arc::new(ScopeContext::new(ScopeKind::Custom(name.to_string())));
        let _ = context.activate();
        self.custom.insert(name.to_string(), Arc::clone(&context));
        context
    }

    pub fn deactivate_custom(&self, name: &str) -> Result<(), ContainerError> {
        let (_, context) = self.custom.remove(name).ok_or_else(|| {
            ContainerError::IllegalState(format!("unknown custom scope '{name}'"))
        })?;
        self.teardown(&context);
        Ok(())
    }

    /// The active context a bean of the given scope lives in.
    pub fn context_for(
        &self,
        scope: &ScopeKind,
        request: Option<RequestId>,
        session: Option<SessionId>,
    ) -> Result<Arc<ScopeContext>, ContainerError> {
        match scope {
            ScopeKind::Application => Ok(Arc::clone(&self.application)),
            ScopeKind::Request => {
                let request_id = request.ok_or_else(|| {
                    ContainerError::IllegalState("no request context for this invocation".into())
                })?;
                self.requests
                    .get(&request_id)
                    .map(|entry| Arc::clone(entry.value()))
                    .ok_or_else(|| {
                        ContainerError::IllegalState(format!("unknown request {request_id}"))
                    })
            }
            ScopeKind::Session => {
                let session_id = session.ok_or_else(|| {
                    ContainerError::IllegalState("no session context for this invocation".into())
                })?;
                self.sessions
                    .get(&session_id)
                    .map(|entry| Arc::clone(entry.value()))
                    .ok_or_else(|| {
                        ContainerError::IllegalState(format!("unknown session {session_id}"))
                    })
            }
            ScopeKind::Dependent => Err(ContainerError::IllegalState(
                "dependent instances ride their owner's creational context".into(),
            )),
            ScopeKind::Custom(name) => self
                .custom
                .get(name)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| {
                    ContainerError::IllegalState(format!("custom scope '{name}' is not active"))
                }),
        }
    }

    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Container shutdown: tear down everything, application context last.
    pub fn shutdown(&self) {
        let request_ids: Vec<RequestId> = self.requests.iter().map(|e| *e.key()).collect();
        for request_id in request_ids {
            if let Err(err) = self.end_request(request_id) {
                warn!(%request_id, error = %err, "request teardown failed during shutdown");
            }
        }
        let session_ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for session_id in session_ids {
            if let Err(err) = self.invalidate_session(session_id) {
                warn!(%session_id, error = %err, "session teardown failed during shutdown");
            }
        }
        let custom_names: Vec<String> = self.custom.iter().map(|e| e.key().clone()).collect();
        for name in custom_names {
            let _ = self.deactivate_custom(&name);
        }
        self.teardown(&self.application);
        self.events.publish_scope_event(ScopeEvent::ApplicationStopped {
            stopped_at: Utc::now(),
        });
        info!("all scope contexts torn down");
    }

    fn teardown(&self, context: &Arc<ScopeContext>) -> (usize, Vec<InvocationError>) {
        context.destroy(|bean, entry| {
            let definition = self.registry.get(bean)?;
            let result = self
                .injection
                .pre_destroy(&definition, &entry.instance, &entry.context);
            match &result {
                Ok(()) => self.events.publish_instance_event(InstanceEvent::Destroyed {
                    bean,
                    destroyed_at: Utc::now(),
                }),
                Err(err) => {
                    self.events.publish_instance_event(InstanceEvent::DestroyFailed {
                        bean,
                        error: err.to_string(),
                        failed_at: Utc::now(),
                    })
                }
            }
            result
        })
    }
}

impl std::fmt::Debug for ScopeLifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeLifecycleService")
            .field("requests", &self.requests.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
