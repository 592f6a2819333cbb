// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Bean Metadata - Definitions, Methods and the Contextual SPI
//
// A BeanDefinition is assembled once at deployment time from pre-resolved
// metadata (the discovery subsystem hands it over; no scanning happens
// here) and is immutable afterwards. The registry of definitions is freely
// shared across threads without locking.

use crate::domain::creational::CreationalContext;
use crate::domain::error::{ContainerError, InvocationError};
use crate::domain::injection::{InjectionPlan, InjectionStep};
use crate::domain::interceptor::{AncestorMetadata, InterceptorBinding};
use crate::domain::scope::ScopeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::async_result::AsyncResult;

/// Binding type the container attaches to asynchronous business methods.
pub const ASYNCHRONOUS_BINDING: &str = "asynchronous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeanId(pub Uuid);

impl BeanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for BeanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BeanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque contextual instance.
pub type BeanHandle = Arc<dyn Any + Send + Sync>;

/// A business-method body. Parameters and return values travel as JSON
/// payloads, the same shape task inputs use elsewhere in the platform.
pub type MethodBody =
    Arc<dyn Fn(&BeanHandle, Value) -> Result<MethodOutcome, InvocationError> + Send + Sync>;

/// A POST_CONSTRUCT / PRE_DESTROY callback on the bean itself.
pub type LifecycleCallback =
    Arc<dyn Fn(&BeanHandle) -> Result<(), InvocationError> + Send + Sync>;

/// Qualifier attached to a bean definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qualifier {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Qualifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Declared return shape of a business method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// No value: the caller receives null immediately on async dispatch.
    Unit,
    /// A future-like handle.
    Future,
    /// A completion-stage-like handle.
    CompletionStage,
    /// Any other declared type, by name.
    Other(String),
}

/// What a business-method invocation produced.
#[derive(Debug, Clone)]
pub enum MethodOutcome {
    Empty,
    Value(Value),
    Stage(AsyncResult),
}

impl MethodOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            MethodOutcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<&AsyncResult> {
        match self {
            MethodOutcome::Stage(s) => Some(s),
            _ => None,
        }
    }
}

/// Cache key for per-method state (validation outcomes, resolved chains).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub bean: BeanId,
    pub method: String,
}

/// Immutable metadata of one business method.
#[derive(Clone)]
pub struct MethodMetadata {
    pub name: String,
    /// The declaring bean, stamped when the definition is built.
    pub owner: BeanId,
    /// Position in the declaring class, used to break ordering ties.
    pub declaration_index: usize,
    pub bindings: Vec<InterceptorBinding>,
    pub asynchronous: bool,
    /// An incompatible third-party asynchronous annotation is also present.
    pub conflicting_async_marker: bool,
    pub return_kind: ReturnKind,
    /// Named managed executor; the container default when absent.
    pub executor: Option<String>,
    pub body: MethodBody,
}

impl MethodMetadata {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&BeanHandle, Value) -> Result<MethodOutcome, InvocationError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            owner: BeanId(Uuid::nil()),
            declaration_index: 0,
            bindings: Vec::new(),
            asynchronous: false,
            conflicting_async_marker: false,
            return_kind: ReturnKind::Other("object".into()),
            executor: None,
            body: Arc::new(body),
        }
    }

    pub fn with_binding(mut self, binding: InterceptorBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn asynchronous(mut self, return_kind: ReturnKind) -> Self {
        self.asynchronous = true;
        self.return_kind = return_kind;
        self
    }

    pub fn on_executor(mut self, name: impl Into<String>) -> Self {
        self.executor = Some(name.into());
        self
    }

    pub fn with_conflicting_async_marker(mut self) -> Self {
        self.conflicting_async_marker = true;
        self
    }

    pub fn key(&self) -> MethodKey {
        MethodKey {
            bean: self.owner,
            method: self.name.clone(),
        }
    }
}

impl fmt::Debug for MethodMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodMetadata")
            .field("name", &self.name)
            .field("asynchronous", &self.asynchronous)
            .field("return_kind", &self.return_kind)
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// State snapshot hooks for passivation-capable beans.
///
/// `capture` snapshots the instance state before it is detached from
/// memory; `restore` rebuilds an equivalent instance from the snapshot on
/// the next invocation.
#[derive(Clone)]
pub struct PassivationHooks {
    pub capture: Arc<dyn Fn(&BeanHandle) -> Result<Value, ContainerError> + Send + Sync>,
    pub restore: Arc<dyn Fn(Value) -> Result<BeanHandle, ContainerError> + Send + Sync>,
}

impl PassivationHooks {
    pub fn new(
        capture: impl Fn(&BeanHandle) -> Result<Value, ContainerError> + Send + Sync + 'static,
        restore: impl Fn(Value) -> Result<BeanHandle, ContainerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            capture: Arc::new(capture),
            restore: Arc::new(restore),
        }
    }
}

/// Creation/destruction routine of a contextual type.
pub trait Contextual: Send + Sync {
    fn create(&self, ctx: &CreationalContext) -> Result<BeanHandle, ContainerError>;

    fn destroy(&self, instance: BeanHandle, ctx: &CreationalContext) {
        let _ = (instance, ctx);
    }
}

struct ClosureContextual<F> {
    create: F,
}

impl<F> Contextual for ClosureContextual<F>
where
    F: Fn(&CreationalContext) -> Result<BeanHandle, ContainerError> + Send + Sync,
{
    fn create(&self, ctx: &CreationalContext) -> Result<BeanHandle, ContainerError> {
        (self.create)(ctx)
    }
}

/// Wrapper placed around dependent-scoped instances that carry an
/// interception chain. Injection always happens on the real instance; the
/// proxy only forwards invocations.
pub struct InterceptionProxy {
    bean: BeanId,
    inner: BeanHandle,
}

impl InterceptionProxy {
    pub fn new(bean: BeanId, inner: BeanHandle) -> Self {
        Self { bean, inner }
    }

    pub fn bean(&self) -> BeanId {
        self.bean
    }

    pub fn inner(&self) -> &BeanHandle {
        &self.inner
    }
}

/// Immutable bean metadata: scope, qualifiers, bindings, methods,
/// injection plan and lifecycle callbacks.
#[derive(Clone)]
pub struct BeanDefinition {
    id: BeanId,
    name: String,
    bean_class: String,
    scope: ScopeKind,
    qualifiers: Vec<Qualifier>,
    class_bindings: Vec<InterceptorBinding>,
    ancestors: Vec<AncestorMetadata>,
    /// Class-level bindings merged with inheritable ancestor bindings,
    /// flattened once at build time.
    flattened_bindings: Vec<InterceptorBinding>,
    methods: HashMap<String, Arc<MethodMetadata>>,
    injection_plan: InjectionPlan,
    post_construct: Vec<LifecycleCallback>,
    pre_destroy: Vec<LifecycleCallback>,
    /// Enterprise-bean-marked types manage their own lifecycle externally;
    /// the container skips POST_CONSTRUCT for them.
    enterprise_lifecycle: bool,
    passivation: Option<PassivationHooks>,
    contextual: Arc<dyn Contextual>,
}

impl BeanDefinition {
    pub fn builder(name: impl Into<String>) -> BeanDefinitionBuilder {
        BeanDefinitionBuilder::new(name)
    }

    pub fn id(&self) -> BeanId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bean_class(&self) -> &str {
        &self.bean_class
    }

    pub fn scope(&self) -> &ScopeKind {
        &self.scope
    }

    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.qualifiers
    }

    pub fn class_bindings(&self) -> &[InterceptorBinding] {
        &self.class_bindings
    }

    pub fn ancestors(&self) -> &[AncestorMetadata] {
        &self.ancestors
    }

    pub fn flattened_bindings(&self) -> &[InterceptorBinding] {
        &self.flattened_bindings
    }

    pub fn method(&self, name: &str) -> Result<&Arc<MethodMetadata>, ContainerError> {
        self.methods.get(name).ok_or_else(|| {
            ContainerError::Definition(format!("no method '{}' on bean '{}'", name, self.name))
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodMetadata>> {
        self.methods.values()
    }

    pub fn injection_plan(&self) -> &InjectionPlan {
        &self.injection_plan
    }

    pub fn post_construct_callbacks(&self) -> &[LifecycleCallback] {
        &self.post_construct
    }

    pub fn pre_destroy_callbacks(&self) -> &[LifecycleCallback] {
        &self.pre_destroy
    }

    pub fn enterprise_lifecycle(&self) -> bool {
        self.enterprise_lifecycle
    }

    pub fn passivation_hooks(&self) -> Option<&PassivationHooks> {
        self.passivation.as_ref()
    }

    pub fn contextual(&self) -> &Arc<dyn Contextual> {
        &self.contextual
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("methods", &self.methods.len())
            .finish()
    }
}

pub struct BeanDefinitionBuilder {
    name: String,
    bean_class: Option<String>,
    scope: ScopeKind,
    qualifiers: Vec<Qualifier>,
    class_bindings: Vec<InterceptorBinding>,
    ancestors: Vec<AncestorMetadata>,
    methods: Vec<MethodMetadata>,
    injection_steps: Vec<InjectionStep>,
    post_construct: Vec<LifecycleCallback>,
    pre_destroy: Vec<LifecycleCallback>,
    enterprise_lifecycle: bool,
    passivation: Option<PassivationHooks>,
    contextual: Option<Arc<dyn Contextual>>,
}

impl BeanDefinitionBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bean_class: None,
            scope: ScopeKind::Dependent,
            qualifiers: Vec::new(),
            class_bindings: Vec::new(),
            ancestors: Vec::new(),
            methods: Vec::new(),
            injection_steps: Vec::new(),
            post_construct: Vec::new(),
            pre_destroy: Vec::new(),
            enterprise_lifecycle: false,
            passivation: None,
            contextual: None,
        }
    }

    pub fn bean_class(mut self, class: impl Into<String>) -> Self {
        self.bean_class = Some(class.into());
        self
    }

    pub fn scope(mut self, scope: ScopeKind) -> Self {
        self.scope = scope;
        self
    }

    pub fn qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn binding(mut self, binding: InterceptorBinding) -> Self {
        self.class_bindings.push(binding);
        self
    }

    /// Ancestors are supplied nearest-first, already resolved by the
    /// discovery subsystem.
    pub fn ancestor(mut self, ancestor: AncestorMetadata) -> Self {
        self.ancestors.push(ancestor);
        self
    }

    pub fn method(mut self, method: MethodMetadata) -> Self {
        self.methods.push(method);
        self
    }

    pub fn injection_step(mut self, step: InjectionStep) -> Self {
        self.injection_steps.push(step);
        self
    }

    pub fn post_construct(
        mut self,
        callback: impl Fn(&BeanHandle) -> Result<(), InvocationError> + Send + Sync + 'static,
    ) -> Self {
        self.post_construct.push(Arc::new(callback));
        self
    }

    pub fn pre_destroy(
        mut self,
        callback: impl Fn(&BeanHandle) -> Result<(), InvocationError> + Send + Sync + 'static,
    ) -> Self {
        self.pre_destroy.push(Arc::new(callback));
        self
    }

    pub fn enterprise_lifecycle(mut self) -> Self {
        self.enterprise_lifecycle = true;
        self
    }

    pub fn passivation_hooks(mut self, hooks: PassivationHooks) -> Self {
        self.passivation = Some(hooks);
        self
    }

    pub fn contextual(mut self, contextual: Arc<dyn Contextual>) -> Self {
        self.contextual = Some(contextual);
        self
    }

    pub fn constructor(
        mut self,
        create: impl Fn(&CreationalContext) -> Result<BeanHandle, ContainerError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.contextual = Some(Arc::new(ClosureContextual { create }));
        self
    }

    pub fn build(self) -> Result<BeanDefinition, ContainerError> {
        if self.name.is_empty() {
            return Err(ContainerError::Definition(
                "bean name cannot be empty".into(),
            ));
        }
        let contextual = self.contextual.ok_or_else(|| {
            ContainerError::Definition(format!(
                "bean '{}' has no creation routine",
                self.name
            ))
        })?;

        let flattened_bindings = flatten_bindings(&self.class_bindings, &self.ancestors);
        let id = BeanId::new();

        let mut methods = HashMap::with_capacity(self.methods.len());
        for (index, mut method) in self.methods.into_iter().enumerate() {
            method.owner = id;
            method.declaration_index = index;
            if method.asynchronous
                && !method.bindings.iter().any(|b| b.name == ASYNCHRONOUS_BINDING)
            {
                method
                    .bindings
                    .push(InterceptorBinding::new(ASYNCHRONOUS_BINDING));
            }
            if methods.insert(method.name.clone(), Arc::new(method)).is_some() {
                return Err(ContainerError::Definition(format!(
                    "duplicate method declaration on bean '{}'",
                    self.name
                )));
            }
        }

        Ok(BeanDefinition {
            id,
            bean_class: self.bean_class.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            scope: self.scope,
            qualifiers: self.qualifiers,
            class_bindings: self.class_bindings,
            ancestors: self.ancestors,
            flattened_bindings,
            methods,
            injection_plan: InjectionPlan::new(self.injection_steps),
            post_construct: self.post_construct,
            pre_destroy: self.pre_destroy,
            enterprise_lifecycle: self.enterprise_lifecycle,
            passivation: self.passivation,
            contextual,
        })
    }
}

/// Union of class-level bindings with ancestor bindings, walking the chain
/// nearest-first. Ancestor bindings only propagate when the binding type
/// carries the inherited marker, and a binding already seen at a more
/// specific level shadows the inherited one.
fn flatten_bindings(
    class_bindings: &[InterceptorBinding],
    ancestors: &[AncestorMetadata],
) -> Vec<InterceptorBinding> {
    let mut flattened = class_bindings.to_vec();
    for ancestor in ancestors {
        for binding in &ancestor.bindings {
            if !binding.inherited {
                continue;
            }
            if flattened.iter().any(|seen| seen.name == binding.name) {
                continue;
            }
            flattened.push(binding.clone());
        }
    }
    flattened
}

/// Deployment-time bean registry, immutable once built.
pub struct BeanRegistry {
    by_id: HashMap<BeanId, Arc<BeanDefinition>>,
    by_name: HashMap<String, BeanId>,
}

impl std::fmt::Debug for BeanRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanRegistry")
            .field("bean_count", &self.by_id.len())
            .field("names", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BeanRegistry {
    pub fn new(definitions: Vec<BeanDefinition>) -> Result<Self, ContainerError> {
        let mut by_id = HashMap::with_capacity(definitions.len());
        let mut by_name = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let id = definition.id();
            if by_name.insert(definition.name().to_string(), id).is_some() {
                return Err(ContainerError::Definition(format!(
                    "duplicate bean name '{}'",
                    definition.name()
                )));
            }
            by_id.insert(id, Arc::new(definition));
        }
        Ok(Self { by_id, by_name })
    }

    pub fn get(&self, id: BeanId) -> Result<Arc<BeanDefinition>, ContainerError> {
        self.by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| ContainerError::UnknownBean(id.to_string()))
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<BeanDefinition>, ContainerError> {
        let id = self
            .by_name
            .get(name)
            .ok_or_else(|| ContainerError::UnknownBean(name.to_string()))?;
        self.get(*id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BeanDefinition>> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_definition(name: &str) -> BeanDefinition {
        BeanDefinition::builder(name)
            .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_rejects_missing_constructor() {
        let err = BeanDefinition::builder("orders").build().unwrap_err();
        assert!(matches!(err, ContainerError::Definition(_)));
    }

    #[test]
    fn inherited_bindings_flatten_with_specific_level_winning() {
        let definition = BeanDefinition::builder("orders")
            .binding(InterceptorBinding::new("transactional"))
            .ancestor(AncestorMetadata::new(
                "BaseService",
                vec![
                    InterceptorBinding::inherited("transactional"),
                    InterceptorBinding::inherited("audited"),
                    InterceptorBinding::new("cached"),
                ],
            ))
            .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
            .build()
            .unwrap();

        let names: Vec<&str> = definition
            .flattened_bindings()
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        // "cached" lacks the inherited marker and does not propagate;
        // "transactional" is shadowed by the declaration on the bean itself.
        assert_eq!(names, vec!["transactional", "audited"]);
        assert!(!definition.flattened_bindings()[0].inherited);
    }

    #[test]
    fn asynchronous_methods_receive_the_dispatch_binding() {
        let definition = BeanDefinition::builder("mailer")
            .method(
                MethodMetadata::new("fire", |_target, _params| Ok(MethodOutcome::Empty))
                    .asynchronous(ReturnKind::Unit),
            )
            .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
            .build()
            .unwrap();

        let method = definition.method("fire").unwrap();
        assert!(method
            .bindings
            .iter()
            .any(|b| b.name == ASYNCHRONOUS_BINDING));
    }

    #[test]
    fn registry_rejects_duplicate_names_and_resolves_by_name() {
        let err =
            BeanRegistry::new(vec![noop_definition("orders"), noop_definition("orders")])
                .unwrap_err();
        assert!(matches!(err, ContainerError::Definition(_)));

        let registry = BeanRegistry::new(vec![noop_definition("orders")]).unwrap();
        let definition = registry.by_name("orders").unwrap();
        assert_eq!(definition.name(), "orders");
        assert!(matches!(
            registry.by_name("billing").unwrap_err(),
            ContainerError::UnknownBean(_)
        ));
    }
}
