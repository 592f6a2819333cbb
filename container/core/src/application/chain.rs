// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Interceptor Chain Resolver - Binding Matching and Deterministic Ordering
//
// Given a bean definition, an optional method and an interception type,
// produces the ordered, deduplicated interceptor list. Resolution works on
// binding sets flattened at deployment time; resolved chains are cached per
// (bean, method, type) in a concurrent map whose population is idempotent.

use crate::domain::bean::{BeanDefinition, BeanId, MethodMetadata};
use crate::domain::interceptor::{InterceptionType, Interceptor, InterceptorBinding};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

type ChainKey = (BeanId, Option<String>, InterceptionType);

pub struct InterceptorChainResolver {
    /// Deployment-time registration order; immutable afterwards. Ties in
    /// priority are broken by position in this list.
    interceptors: Vec<Arc<dyn Interceptor>>,
    chains: DashMap<ChainKey, Arc<Vec<Arc<dyn Interceptor>>>>,
}

impl InterceptorChainResolver {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors,
            chains: DashMap::new(),
        }
    }

    pub fn registered(&self) -> usize {
        self.interceptors.len()
    }

    /// Resolve the interceptor chain for an invocation.
    ///
    /// The applicable binding set is the union of the definition's
    /// flattened class-level bindings and the method-level bindings.
    /// Ordering is total and deterministic: ascending priority, then
    /// registration order. An interceptor never appears in a chain for an
    /// interception type its `intercepts` rejects.
    pub fn resolve(
        &self,
        definition: &BeanDefinition,
        method: Option<&Arc<MethodMetadata>>,
        ty: InterceptionType,
    ) -> Vec<Arc<dyn Interceptor>> {
        let key: ChainKey = (definition.id(), method.map(|m| m.name.clone()), ty);
        if let Some(chain) = self.chains.get(&key) {
            return chain.as_ref().clone();
        }

        let chain = Arc::new(self.compute(definition, method, ty));
        debug!(
            bean = %definition.name(),
            method = key.1.as_deref().unwrap_or("-"),
            ?ty,
            interceptors = chain.len(),
            "resolved interceptor chain"
        );
        self.chains.insert(key, Arc::clone(&chain));
        chain.as_ref().clone()
    }

    fn compute(
        &self,
        definition: &BeanDefinition,
        method: Option<&Arc<MethodMetadata>>,
        ty: InterceptionType,
    ) -> Vec<Arc<dyn Interceptor>> {
        let mut bindings: Vec<&InterceptorBinding> =
            definition.flattened_bindings().iter().collect();
        if let Some(method) = method {
            for binding in &method.bindings {
                if !bindings.iter().any(|seen| seen.name == binding.name) {
                    bindings.push(binding);
                }
            }
        }

        let mut chain: Vec<Arc<dyn Interceptor>> = Vec::new();
        for candidate in &self.interceptors {
            if !candidate.intercepts(ty) {
                continue;
            }
            let matches = candidate
                .bindings()
                .iter()
                .any(|declared| bindings.iter().any(|b| b.name == declared.name));
            if !matches {
                continue;
            }
            if chain.iter().any(|seen| Arc::ptr_eq(seen, candidate)) {
                continue;
            }
            chain.push(Arc::clone(candidate));
        }

        // Stable sort: equal priorities keep registration order.
        chain.sort_by_key(|interceptor| interceptor.priority());
        chain
    }
}

impl std::fmt::Debug for InterceptorChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChainResolver")
            .field("registered", &self.interceptors.len())
            .field("cached_chains", &self.chains.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bean::{BeanHandle, MethodOutcome};
    use crate::domain::error::InvocationError;
    use crate::domain::interceptor::{AncestorMetadata, InvocationContext};

    struct Named {
        name: String,
        bindings: Vec<InterceptorBinding>,
        priority: i32,
        types: Vec<InterceptionType>,
    }

    impl Named {
        fn around(name: &str, binding: &str, priority: i32) -> Arc<dyn Interceptor> {
            Arc::new(Self {
                name: name.into(),
                bindings: vec![InterceptorBinding::new(binding)],
                priority,
                types: vec![InterceptionType::AroundInvoke],
            })
        }
    }

    impl Interceptor for Named {
        fn name(&self) -> &str {
            &self.name
        }

        fn bindings(&self) -> &[InterceptorBinding] {
            &self.bindings
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn intercepts(&self, ty: InterceptionType) -> bool {
            self.types.contains(&ty)
        }

        fn invoke(
            &self,
            _ty: InterceptionType,
            ctx: &mut InvocationContext,
        ) -> Result<MethodOutcome, InvocationError> {
            ctx.proceed()
        }
    }

    fn definition_with(bindings: Vec<InterceptorBinding>) -> BeanDefinition {
        let mut builder = BeanDefinition::builder("orders");
        for binding in bindings {
            builder = builder.binding(binding);
        }
        builder
            .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
            .build()
            .unwrap()
    }

    fn names(chain: &[Arc<dyn Interceptor>]) -> Vec<&str> {
        chain.iter().map(|i| i.name()).collect()
    }

    #[test]
    fn chain_orders_by_priority_then_registration() {
        let resolver = InterceptorChainResolver::new(vec![
            Named::around("late", "transactional", 2000),
            Named::around("early", "transactional", 10),
            Named::around("tied-first", "transactional", 500),
            Named::around("tied-second", "transactional", 500),
        ]);
        let definition = definition_with(vec![InterceptorBinding::new("transactional")]);

        let chain = resolver.resolve(&definition, None, InterceptionType::AroundInvoke);
        assert_eq!(
            names(&chain),
            vec!["early", "tied-first", "tied-second", "late"]
        );

        // Resolution is deterministic across invocations.
        let again = resolver.resolve(&definition, None, InterceptionType::AroundInvoke);
        assert_eq!(names(&again), names(&chain));
    }

    #[test]
    fn unsupported_interception_types_are_never_selected() {
        let resolver = InterceptorChainResolver::new(vec![Named::around(
            "tx",
            "transactional",
            100,
        )]);
        let definition = definition_with(vec![InterceptorBinding::new("transactional")]);

        let chain = resolver.resolve(&definition, None, InterceptionType::PreDestroy);
        assert!(chain.is_empty());
    }

    #[test]
    fn inherited_ancestor_bindings_select_interceptors() {
        let resolver = InterceptorChainResolver::new(vec![
            Named::around("audit", "audited", 100),
            Named::around("cache", "cached", 100),
        ]);
        let definition = BeanDefinition::builder("orders")
            .ancestor(AncestorMetadata::new(
                "BaseService",
                vec![
                    InterceptorBinding::inherited("audited"),
                    // Lacking the inherited marker, this does not propagate.
                    InterceptorBinding::new("cached"),
                ],
            ))
            .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
            .build()
            .unwrap();

        let chain = resolver.resolve(&definition, None, InterceptionType::AroundInvoke);
        assert_eq!(names(&chain), vec!["audit"]);
    }

    #[test]
    fn method_level_bindings_extend_the_class_set_without_duplicates() {
        let resolver = InterceptorChainResolver::new(vec![
            Named::around("tx", "transactional", 100),
            Named::around("audit", "audited", 200),
        ]);
        let definition = BeanDefinition::builder("orders")
            .binding(InterceptorBinding::new("transactional"))
            .method(
                MethodMetadata::new("place", |_t, _p| Ok(MethodOutcome::Empty))
                    .with_binding(InterceptorBinding::new("audited"))
                    .with_binding(InterceptorBinding::new("transactional")),
            )
            .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
            .build()
            .unwrap();

        let method = definition.method("place").unwrap();
        let chain = resolver.resolve(&definition, Some(method), InterceptionType::AroundInvoke);
        assert_eq!(names(&chain), vec!["tx", "audit"]);
    }
}
