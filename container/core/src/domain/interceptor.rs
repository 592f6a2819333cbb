// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Interception SPI - Bindings, Interceptor Contract and Invocation Context
//
// Interceptors attach to business methods through binding types; transaction
// and security collaborators plug into the around-invoke positions without
// the engine knowing their semantics.

use crate::domain::bean::{BeanHandle, MethodBody, MethodMetadata, MethodOutcome, Qualifier};
use crate::domain::error::InvocationError;
use crate::domain::scope::ScopeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The lifecycle position an interceptor can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptionType {
    AroundInvoke,
    PostConstruct,
    PreDestroy,
}

/// An interceptor-binding annotation type.
///
/// `inherited` marks bindings that propagate down the ancestor chain;
/// bindings without the marker apply only where they are declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterceptorBinding {
    pub name: String,
    pub inherited: bool,
}

impl InterceptorBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inherited: false,
        }
    }

    pub fn inherited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inherited: true,
        }
    }
}

/// Class-level bindings of one ancestor, nearest ancestor first.
///
/// Computed once when the bean definition is built; resolution never walks
/// type hierarchies at invocation time.
#[derive(Debug, Clone)]
pub struct AncestorMetadata {
    pub class_name: String,
    pub bindings: Vec<InterceptorBinding>,
}

impl AncestorMetadata {
    pub fn new(class_name: impl Into<String>, bindings: Vec<InterceptorBinding>) -> Self {
        Self {
            class_name: class_name.into(),
            bindings,
        }
    }
}

/// The interceptor contract.
///
/// `intercepts` is authoritative: the chain resolver never invokes an
/// interceptor for an interception type it does not declare. Lower
/// priority values run earlier; ties fall back to registration order.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    fn bindings(&self) -> &[InterceptorBinding];

    fn priority(&self) -> i32 {
        DEFAULT_INTERCEPTOR_PRIORITY
    }

    fn intercepts(&self, ty: InterceptionType) -> bool;

    fn invoke(
        &self,
        ty: InterceptionType,
        ctx: &mut InvocationContext,
    ) -> Result<MethodOutcome, InvocationError>;

    fn bean_class(&self) -> &str {
        self.name()
    }

    fn scope(&self) -> ScopeKind {
        ScopeKind::Dependent
    }

    fn qualifiers(&self) -> &[Qualifier] {
        &[]
    }

    fn stereotypes(&self) -> &[String] {
        &[]
    }

    fn is_alternative(&self) -> bool {
        false
    }

    fn is_nullable(&self) -> bool {
        false
    }
}

pub const DEFAULT_INTERCEPTOR_PRIORITY: i32 = 1000;

/// A wrapped interceptor definition: every SPI query is forwarded to the
/// inner delegate, and identity semantics (equality, hashing) key on the
/// delegate rather than the wrapper.
#[derive(Clone)]
pub struct DelegatingInterceptor {
    delegate: Arc<dyn Interceptor>,
}

impl DelegatingInterceptor {
    pub fn new(delegate: Arc<dyn Interceptor>) -> Self {
        Self { delegate }
    }

    pub fn delegate(&self) -> &Arc<dyn Interceptor> {
        &self.delegate
    }

    fn delegate_key(&self) -> usize {
        Arc::as_ptr(&self.delegate) as *const () as usize
    }
}

impl Interceptor for DelegatingInterceptor {
    fn name(&self) -> &str {
        self.delegate.name()
    }

    fn bindings(&self) -> &[InterceptorBinding] {
        self.delegate.bindings()
    }

    fn priority(&self) -> i32 {
        self.delegate.priority()
    }

    fn intercepts(&self, ty: InterceptionType) -> bool {
        self.delegate.intercepts(ty)
    }

    fn invoke(
        &self,
        ty: InterceptionType,
        ctx: &mut InvocationContext,
    ) -> Result<MethodOutcome, InvocationError> {
        self.delegate.invoke(ty, ctx)
    }

    fn bean_class(&self) -> &str {
        self.delegate.bean_class()
    }

    fn scope(&self) -> ScopeKind {
        self.delegate.scope()
    }

    fn qualifiers(&self) -> &[Qualifier] {
        self.delegate.qualifiers()
    }

    fn stereotypes(&self) -> &[String] {
        self.delegate.stereotypes()
    }

    fn is_alternative(&self) -> bool {
        self.delegate.is_alternative()
    }

    fn is_nullable(&self) -> bool {
        self.delegate.is_nullable()
    }
}

impl PartialEq for DelegatingInterceptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.delegate, &other.delegate)
    }
}

impl Eq for DelegatingInterceptor {}

impl std::fmt::Debug for DelegatingInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingInterceptor")
            .field("delegate_key", &self.delegate_key())
            .finish()
    }
}

impl Hash for DelegatingInterceptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.delegate_key().hash(state);
    }
}

/// Per-invocation execution context.
///
/// Carries the target instance, the method under invocation, the mutable
/// parameter payload and the remaining chain position. `proceed` advances
/// the chain; the terminal state runs the business body (or the lifecycle
/// callback chain for POST_CONSTRUCT / PRE_DESTROY invocations).
///
/// Everything inside is owned (`Arc`-shared), so a context can be detached
/// and moved onto an executor task.
#[derive(Clone)]
pub struct InvocationContext {
    target: BeanHandle,
    method: Option<Arc<MethodMetadata>>,
    parameters: Value,
    interceptors: Vec<Arc<dyn Interceptor>>,
    terminal: MethodBody,
    position: usize,
    ty: InterceptionType,
}

impl InvocationContext {
    /// Context for a business-method invocation; the terminal state is the
    /// method body itself.
    pub fn for_method(
        target: BeanHandle,
        method: Arc<MethodMetadata>,
        parameters: Value,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Self {
        let terminal = method.body.clone();
        Self {
            target,
            method: Some(method),
            parameters,
            interceptors,
            terminal,
            position: 0,
            ty: InterceptionType::AroundInvoke,
        }
    }

    /// Context for a lifecycle invocation; the terminal state runs the
    /// bean's callback chain.
    pub fn for_lifecycle(
        target: BeanHandle,
        ty: InterceptionType,
        interceptors: Vec<Arc<dyn Interceptor>>,
        terminal: MethodBody,
    ) -> Self {
        Self {
            target,
            method: None,
            parameters: Value::Null,
            interceptors,
            terminal,
            position: 0,
            ty,
        }
    }

    pub fn target(&self) -> &BeanHandle {
        &self.target
    }

    pub fn method(&self) -> Option<&Arc<MethodMetadata>> {
        self.method.as_ref()
    }

    pub fn interception_type(&self) -> InterceptionType {
        self.ty
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Interceptors may rewrite parameters before proceeding.
    pub fn set_parameters(&mut self, parameters: Value) {
        self.parameters = parameters;
    }

    pub fn remaining(&self) -> usize {
        self.interceptors.len().saturating_sub(self.position)
    }

    /// An independent continuation of this chain from the current position,
    /// suitable for moving onto another thread.
    pub fn detach(&self) -> InvocationContext {
        self.clone()
    }

    /// Advance to the next interceptor, or run the terminal state once the
    /// chain is exhausted.
    pub fn proceed(&mut self) -> Result<MethodOutcome, InvocationError> {
        if self.position < self.interceptors.len() {
            let next = Arc::clone(&self.interceptors[self.position]);
            self.position += 1;
            next.invoke(self.ty, self)
        } else {
            (self.terminal)(&self.target, self.parameters.clone())
        }
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("type", &self.ty)
            .field("method", &self.method.as_ref().map(|m| m.name.clone()))
            .field("position", &self.position)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
