// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Injection Target Service - Member Injection and Lifecycle Callbacks
//
// Orchestrates resource/field/method injection in superclass-first order,
// then the POST_CONSTRUCT chain. The thread-local instance-under-injection
// slot uses save/restore discipline: nested injections restore the previous
// occupant on exit instead of clearing the slot.

use crate::application::chain::InterceptorChainResolver;
use crate::domain::bean::{
    BeanDefinition, BeanHandle, BeanId, InterceptionProxy, LifecycleCallback, MethodBody,
    MethodOutcome,
};
use crate::domain::creational::{CreationalContext, CreationalScope};
use crate::domain::error::{ContainerError, InvocationError};
use crate::domain::interceptor::{InterceptionType, InvocationContext};
use crate::domain::scope::ScopeKind;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, warn};

thread_local! {
    static INSTANCE_UNDER_INJECTION: RefCell<Option<BeanId>> = const { RefCell::new(None) };
}

pub struct InjectionTargetService {
    resolver: Arc<InterceptorChainResolver>,
}

impl InjectionTargetService {
    pub fn new(resolver: Arc<InterceptorChainResolver>) -> Self {
        Self { resolver }
    }

    /// The bean currently being injected on this thread, if any.
    pub fn current_injection_target() -> Option<BeanId> {
        INSTANCE_UNDER_INJECTION.with(|slot| *slot.borrow())
    }

    /// Run the definition's injection plan against `instance`.
    ///
    /// The creational scope is adapted into the internal context type
    /// first, so dependents created by appliers are tracked for cascading
    /// destruction regardless of where the scope came from.
    pub fn inject(
        &self,
        definition: &BeanDefinition,
        instance: &BeanHandle,
        scope: Arc<dyn CreationalScope>,
    ) -> Result<(), ContainerError> {
        let context = CreationalContext::internalize(scope);

        let previous =
            INSTANCE_UNDER_INJECTION.with(|slot| slot.replace(Some(definition.id())));
        let into_other_bean = previous.is_some_and(|prev| prev != definition.id());
        let _restore = scopeguard::guard(previous, |previous| {
            INSTANCE_UNDER_INJECTION.with(|slot| *slot.borrow_mut() = previous);
        });

        // A dependent-scoped bean being wired into its own interception
        // proxy gets no injection here: the real instance underneath is the
        // injection target, and injecting the wrapper too would run every
        // applier twice.
        if *definition.scope() == ScopeKind::Dependent
            && !into_other_bean
            && instance.downcast_ref::<InterceptionProxy>().is_some()
        {
            debug!(bean = %definition.name(), "skipping injection into interception proxy");
            return Ok(());
        }

        for step in definition.injection_plan().steps() {
            (step.apply)(instance, &context).map_err(|err| {
                ContainerError::Definition(format!(
                    "injection of '{}' on bean '{}' failed: {}",
                    step.member,
                    definition.name(),
                    err
                ))
            })?;
        }
        Ok(())
    }

    /// Invoke the POST_CONSTRUCT chain: interceptors first, then the
    /// bean's own callbacks. Enterprise-bean-marked definitions manage
    /// their lifecycle externally and are skipped.
    pub fn post_construct(
        &self,
        definition: &BeanDefinition,
        instance: &BeanHandle,
    ) -> Result<(), InvocationError> {
        if definition.enterprise_lifecycle() {
            debug!(bean = %definition.name(), "post-construct managed externally");
            return Ok(());
        }
        let chain = self
            .resolver
            .resolve(definition, None, InterceptionType::PostConstruct);
        let terminal = callback_terminal(definition.post_construct_callbacks());
        let mut ctx = InvocationContext::for_lifecycle(
            instance.clone(),
            InterceptionType::PostConstruct,
            chain,
            terminal,
        );
        ctx.proceed().map(|_| ())
    }

    /// Invoke the PRE_DESTROY chain, destroy the instance through its
    /// contextual, and release the creational context so dependents are
    /// destroyed in reverse creation order.
    ///
    /// The context is always released, even when a callback fails; the
    /// first chain failure is reported to the caller.
    pub fn pre_destroy(
        &self,
        definition: &BeanDefinition,
        instance: &BeanHandle,
        context: &Arc<CreationalContext>,
    ) -> Result<(), InvocationError> {
        let chain = self
            .resolver
            .resolve(definition, None, InterceptionType::PreDestroy);
        let terminal = callback_terminal(definition.pre_destroy_callbacks());
        let mut ctx = InvocationContext::for_lifecycle(
            instance.clone(),
            InterceptionType::PreDestroy,
            chain,
            terminal,
        );
        let outcome = ctx.proceed().map(|_| ());

        definition.contextual().destroy(instance.clone(), context);
        for err in context.release() {
            warn!(bean = %definition.name(), error = %err, "dependent destruction failed");
        }
        outcome
    }
}

fn callback_terminal(callbacks: &[LifecycleCallback]) -> MethodBody {
    let callbacks = callbacks.to_vec();
    Arc::new(move |target: &BeanHandle, _params| {
        for callback in &callbacks {
            callback(target)?;
        }
        Ok(MethodOutcome::Empty)
    })
}

impl std::fmt::Debug for InjectionTargetService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionTargetService").finish()
    }
}
