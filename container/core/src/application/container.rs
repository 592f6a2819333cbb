// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Container Runtime - Composition Root and Entry Points
//
// Owns the bean registry, the interceptor chain resolver, the scope
// lifecycle service, the managed executors and the passivation machinery.
// Start activates the application context and the background sweep;
// shutdown tears everything down in reverse.

use crate::application::async_dispatch::AsynchronousInterceptor;
use crate::application::chain::InterceptorChainResolver;
use crate::application::injection::InjectionTargetService;
use crate::application::passivation::{PassivationSweeper, StatefulInstanceRegistry};
use crate::application::scope_manager::ScopeLifecycleService;
use crate::domain::bean::{
    BeanDefinition, BeanHandle, BeanRegistry, InterceptionProxy, MethodOutcome,
};
use crate::domain::config::ContainerConfig;
use crate::domain::creational::{CreationalContext, CreationalScope};
use crate::domain::error::{ContainerError, InvocationError};
use crate::domain::events::InstanceEvent;
use crate::domain::interceptor::{InterceptionType, Interceptor, InvocationContext};
use crate::domain::scope::{RequestId, SessionId};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::executor_registry::{
    ExecutorRegistry, ManagedExecutor, DEFAULT_EXECUTOR,
};
use crate::infrastructure::passivation_store::{InMemoryPassivationStore, PassivationStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ContainerRuntime {
    config: ContainerConfig,
    registry: Arc<BeanRegistry>,
    resolver: Arc<InterceptorChainResolver>,
    injection: Arc<InjectionTargetService>,
    scopes: Arc<ScopeLifecycleService>,
    executors: Arc<ExecutorRegistry>,
    stateful: Arc<StatefulInstanceRegistry>,
    sweeper: PassivationSweeper,
    events: EventBus,
    started: AtomicBool,
}

impl ContainerRuntime {
    pub fn builder() -> ContainerRuntimeBuilder {
        ContainerRuntimeBuilder::new()
    }

    /// Activate the application context, register the default executor and
    /// start the passivation sweep. Must run inside an async runtime.
    pub fn start(&self) -> Result<(), ContainerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ContainerError::IllegalState(
                "container already started".into(),
            ));
        }
        if !self.executors.contains(DEFAULT_EXECUTOR) {
            let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                ContainerError::IllegalState(
                    "container start requires a running async runtime".into(),
                )
            })?;
            self.executors.register(Arc::new(
                ManagedExecutor::with_concurrency_limit(
                    DEFAULT_EXECUTOR,
                    handle,
                    self.config.default_executor_concurrency,
                ),
            ));
        }
        self.scopes.activate_application()?;
        self.sweeper.start()?;
        info!(beans = self.registry.len(), "container started");
        Ok(())
    }

    /// Stop the sweep, destroy stateful instances and tear down every
    /// scope context, the application context last.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.sweeper.stop().await;
        self.stateful.shutdown().await;
        self.scopes.shutdown();
        info!("container stopped");
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    pub fn scopes(&self) -> &Arc<ScopeLifecycleService> {
        &self.scopes
    }

    pub fn stateful(&self) -> &Arc<StatefulInstanceRegistry> {
        &self.stateful
    }

    pub fn definition(&self, name: &str) -> Result<Arc<BeanDefinition>, ContainerError> {
        self.registry.by_name(name)
    }

    pub fn begin_request(&self) -> RequestId {
        self.scopes.begin_request()
    }

    pub fn end_request(&self, request_id: RequestId) -> Result<(), ContainerError> {
        self.scopes.end_request(request_id)
    }

    pub fn create_session(&self) -> SessionId {
        self.scopes.create_session()
    }

    /// Session invalidation also drops the session's stateful record, if
    /// one exists.
    pub async fn invalidate_session(&self, session_id: SessionId) -> Result<(), ContainerError> {
        match self.stateful.remove(session_id).await {
            Ok(()) | Err(ContainerError::NoSuchInstance(_)) => {}
            Err(err) => return Err(err),
        }
        self.scopes.invalidate_session(session_id)
    }

    /// The application-scoped instance of a bean, created on first access.
    pub fn application_instance(&self, name: &str) -> Result<BeanHandle, ContainerError> {
        self.contextual_instance(name, None, None)
    }

    /// The request-scoped instance of a bean within the given request.
    pub fn request_instance(
        &self,
        request_id: RequestId,
        name: &str,
    ) -> Result<BeanHandle, ContainerError> {
        self.contextual_instance(name, Some(request_id), None)
    }

    /// The session-scoped instance of a bean within the given session.
    ///
    /// Passivation-capable beans are held by the stateful registry alone,
    /// so the background sweep can detach them; everything else lives in
    /// the session's scope context. Either way the instance is created on
    /// first access and reused afterwards.
    pub async fn session_instance(
        &self,
        session_id: SessionId,
        name: &str,
    ) -> Result<BeanHandle, ContainerError> {
        let definition = self.registry.by_name(name)?;
        if definition.passivation_hooks().is_none() {
            let context = self
                .scopes
                .context_for(definition.scope(), None, Some(session_id))?;
            let bag = context.bag_for(definition.id())?;
            let entry = bag.get_or_create(|ctx| self.construct(&definition, ctx))?;
            return Ok(entry.instance);
        }

        match self.stateful.access(session_id).await {
            Ok(entry) => return Ok(entry.instance),
            Err(ContainerError::NoSuchInstance(_)) => {}
            Err(err) => return Err(err),
        }
        let context = Arc::new(CreationalContext::new(definition.id()));
        let instance = self.construct(&definition, &context)?;
        let entry = crate::application::instance_bag::BagEntry {
            instance: instance.clone(),
            context: Arc::clone(&context),
        };
        match self.stateful.register(session_id, definition.id(), entry) {
            Ok(()) => Ok(instance),
            Err(ContainerError::IllegalState(_)) => {
                // Lost the registration race; discard this instance and use
                // the winner's.
                let _ = context.release();
                Ok(self.stateful.access(session_id).await?.instance)
            }
            Err(err) => Err(err),
        }
    }

    /// A fresh dependent-scoped instance, owned by `owner`: it is destroyed
    /// when the owning creational context is released.
    pub fn dependent_instance(
        &self,
        name: &str,
        owner: &Arc<CreationalContext>,
    ) -> Result<BeanHandle, ContainerError> {
        let definition = self.registry.by_name(name)?;
        let context = Arc::new(CreationalContext::new(definition.id()));
        let instance = self.construct(&definition, &context)?;

        let injection = Arc::clone(&self.injection);
        let owned_definition = Arc::clone(&definition);
        let owned_context = Arc::clone(&context);
        owner.push_dependent(
            definition.name(),
            instance.clone(),
            Some(Box::new(move |handle| {
                injection
                    .pre_destroy(&owned_definition, &handle, &owned_context)
                    .map_err(|err| ContainerError::IllegalState(err.to_string()))
            })),
        );
        Ok(instance)
    }

    /// Invoke a business method through its interceptor chain.
    ///
    /// Asynchronous methods return immediately: an incomplete stage for
    /// future-like return kinds, nothing for no-value methods.
    pub fn invoke(
        &self,
        bean: &str,
        instance: &BeanHandle,
        method: &str,
        parameters: Value,
    ) -> Result<MethodOutcome, InvocationError> {
        let definition = self.registry.by_name(bean)?;
        let method = Arc::clone(definition.method(method)?);
        let chain = self
            .resolver
            .resolve(&definition, Some(&method), InterceptionType::AroundInvoke);
        // Invocations on a proxy run against the real instance underneath.
        let target = match instance.downcast_ref::<InterceptionProxy>() {
            Some(proxy) => proxy.inner().clone(),
            None => instance.clone(),
        };
        let mut ctx = InvocationContext::for_method(target, method, parameters, chain);
        ctx.proceed()
    }

    /// Invoke a method on the stateful instance bound to `session_id`,
    /// transparently reactivating it when passivated.
    pub async fn invoke_stateful(
        &self,
        session_id: SessionId,
        bean: &str,
        method: &str,
        parameters: Value,
    ) -> Result<MethodOutcome, InvocationError> {
        let entry = self.stateful.access(session_id).await?;
        self.invoke(bean, &entry.instance, method, parameters)
    }

    fn contextual_instance(
        &self,
        name: &str,
        request: Option<RequestId>,
        session: Option<SessionId>,
    ) -> Result<BeanHandle, ContainerError> {
        let definition = self.registry.by_name(name)?;
        let context = self
            .scopes
            .context_for(definition.scope(), request, session)?;
        let bag = context.bag_for(definition.id())?;
        let entry = bag.get_or_create(|ctx| self.construct(&definition, ctx))?;
        Ok(entry.instance)
    }

    /// Create, inject and post-construct a new instance. Runs inside the
    /// bag's creation critical section, so no thread observes an instance
    /// before its POST_CONSTRUCT chain completed.
    fn construct(
        &self,
        definition: &Arc<BeanDefinition>,
        context: &Arc<CreationalContext>,
    ) -> Result<BeanHandle, ContainerError> {
        let instance = definition.contextual().create(context).map_err(|err| {
            ContainerError::CreationFailed {
                bean: definition.name().to_string(),
                reason: err.to_string(),
            }
        })?;
        self.injection.inject(
            definition,
            &instance,
            Arc::clone(context) as Arc<dyn CreationalScope>,
        )?;
        self.injection
            .post_construct(definition, &instance)
            .map_err(|err| {
                ContainerError::Definition(format!(
                    "post-construct of '{}' failed: {err}",
                    definition.name()
                ))
            })?;
        debug!(bean = %definition.name(), scope = %definition.scope(), "instance constructed");
        self.events.publish_instance_event(InstanceEvent::Created {
            bean: definition.id(),
            scope: definition.scope().clone(),
            created_at: Utc::now(),
        });
        Ok(instance)
    }
}

impl std::fmt::Debug for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRuntime")
            .field("beans", &self.registry.len())
            .field("started", &self.started.load(Ordering::Acquire))
            .finish()
    }
}

pub struct ContainerRuntimeBuilder {
    config: ContainerConfig,
    definitions: Vec<BeanDefinition>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    executors: Vec<Arc<ManagedExecutor>>,
    store: Option<Arc<dyn PassivationStore>>,
}

impl ContainerRuntimeBuilder {
    fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
            definitions: Vec::new(),
            interceptors: Vec::new(),
            executors: Vec::new(),
            store: None,
        }
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn definition(mut self, definition: BeanDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn executor(mut self, executor: Arc<ManagedExecutor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn passivation_store(mut self, store: Arc<dyn PassivationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<ContainerRuntime, ContainerError> {
        self.config
            .validate()
            .map_err(ContainerError::Definition)?;

        let registry = Arc::new(BeanRegistry::new(self.definitions)?);
        let events = EventBus::new(self.config.event_capacity);

        let executors = Arc::new(ExecutorRegistry::new());
        for executor in self.executors {
            executors.register(executor);
        }

        // The dispatch interceptor joins the deployment's interceptors; its
        // priority places it ahead of business-adjacent ones.
        let mut interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(AsynchronousInterceptor::new(Arc::clone(&executors)))];
        interceptors.extend(self.interceptors);
        let resolver = Arc::new(InterceptorChainResolver::new(interceptors));

        let injection = Arc::new(InjectionTargetService::new(Arc::clone(&resolver)));
        let scopes = Arc::new(ScopeLifecycleService::new(
            Arc::clone(&registry),
            Arc::clone(&injection),
            events.clone(),
        ));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryPassivationStore::new()));
        let stateful = Arc::new(StatefulInstanceRegistry::new(
            Arc::clone(&registry),
            Arc::clone(&injection),
            store,
            events.clone(),
        ));
        let sweeper = PassivationSweeper::new(
            Arc::clone(&stateful),
            self.config.passivation.clone(),
        );

        Ok(ContainerRuntime {
            config: self.config,
            registry,
            resolver,
            injection,
            scopes,
            executors,
            stateful,
            sweeper,
            events,
            started: AtomicBool::new(false),
        })
    }
}

impl Default for ContainerRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_is_not_reentrant() {
        let container = ContainerRuntime::builder().build().unwrap();
        container.start().unwrap();
        assert!(matches!(
            container.start(),
            Err(ContainerError::IllegalState(_))
        ));
        container.shutdown().await;
    }

    #[tokio::test]
    async fn builder_rejects_invalid_config() {
        let mut config = ContainerConfig::default();
        config.event_capacity = 0;
        let err = ContainerRuntime::builder().config(config).build().unwrap_err();
        assert!(matches!(err, ContainerError::Definition(_)));
    }

    #[tokio::test]
    async fn unknown_bean_resolution_fails() {
        let container = ContainerRuntime::builder().build().unwrap();
        container.start().unwrap();
        let err = container.application_instance("missing").unwrap_err();
        assert!(matches!(err, ContainerError::UnknownBean(_)));
        container.shutdown().await;
    }
}
