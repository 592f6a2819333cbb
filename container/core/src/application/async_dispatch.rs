// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Asynchronous Dispatch Interceptor - Executor Hand-Off and Result Bridging
//
// Wraps business methods declared asynchronous: validates the declaration
// once per method, hands the remaining chain to a managed executor and
// returns a pre-created result to the caller immediately. The dispatched
// task installs that result as the thread's current result around the
// proceed call and bridges whatever the method returned into it.

use crate::domain::async_result::AsyncResult;
use crate::domain::bean::{MethodKey, MethodMetadata, MethodOutcome, ReturnKind};
use crate::domain::error::{ContainerError, InvocationError};
use crate::domain::interceptor::{
    InterceptionType, Interceptor, InterceptorBinding, InvocationContext,
};
use crate::infrastructure::executor_registry::{ExecutorRegistry, DEFAULT_EXECUTOR};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Runs ahead of business-logic-adjacent interceptors.
pub const ASYNC_DISPATCH_PRIORITY: i32 = 100;

#[derive(Debug, Clone)]
enum ValidationOutcome {
    Valid,
    Rejected(String),
}

pub struct AsynchronousInterceptor {
    executors: Arc<ExecutorRegistry>,
    /// Per-method validation outcomes. Population is idempotent: racing
    /// threads compute the same pure result, and only one entry remains.
    validated: DashMap<MethodKey, ValidationOutcome>,
    bindings: Vec<InterceptorBinding>,
}

impl AsynchronousInterceptor {
    pub fn new(executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            executors,
            validated: DashMap::new(),
            bindings: vec![InterceptorBinding::new(
                crate::domain::bean::ASYNCHRONOUS_BINDING,
            )],
        }
    }

    pub fn validated_methods(&self) -> usize {
        self.validated.len()
    }

    fn validate(&self, method: &MethodMetadata) -> Result<(), ContainerError> {
        let outcome = self
            .validated
            .entry(method.key())
            .or_insert_with(|| Self::check(method))
            .clone();
        match outcome {
            ValidationOutcome::Valid => Ok(()),
            ValidationOutcome::Rejected(reason) => Err(ContainerError::Unsupported(reason)),
        }
    }

    fn check(method: &MethodMetadata) -> ValidationOutcome {
        if method.conflicting_async_marker {
            return ValidationOutcome::Rejected(format!(
                "method '{}' combines container-managed asynchronous execution \
                 with an incompatible asynchronous annotation",
                method.name
            ));
        }
        match &method.return_kind {
            ReturnKind::Unit | ReturnKind::Future | ReturnKind::CompletionStage => {
                ValidationOutcome::Valid
            }
            ReturnKind::Other(declared) => ValidationOutcome::Rejected(format!(
                "asynchronous method '{}' must return no value, a future or a \
                 completion stage, not '{}'",
                method.name, declared
            )),
        }
    }
}

impl Interceptor for AsynchronousInterceptor {
    fn name(&self) -> &str {
        "asynchronous-dispatch"
    }

    fn bindings(&self) -> &[InterceptorBinding] {
        &self.bindings
    }

    fn priority(&self) -> i32 {
        ASYNC_DISPATCH_PRIORITY
    }

    fn intercepts(&self, ty: InterceptionType) -> bool {
        ty == InterceptionType::AroundInvoke
    }

    fn invoke(
        &self,
        _ty: InterceptionType,
        ctx: &mut InvocationContext,
    ) -> Result<MethodOutcome, InvocationError> {
        let method = match ctx.method() {
            Some(method) => Arc::clone(method),
            None => return ctx.proceed(),
        };
        if !method.asynchronous {
            return ctx.proceed();
        }

        self.validate(&method)?;

        let executor_name = method.executor.as_deref().unwrap_or(DEFAULT_EXECUTOR);
        let executor = self.executors.lookup(executor_name)?;

        let result = AsyncResult::incomplete();
        let task_result = result.clone();
        let mut continuation = ctx.detach();
        let method_name = method.name.clone();

        executor.submit(async move {
            if task_result.is_cancelled() {
                // Never re-invoke the business method for a settled result.
                debug!(method = %method_name, "result cancelled before dispatch");
                return;
            }

            let outcome = proceed_with_current(&mut continuation, &task_result);
            match outcome {
                Ok(MethodOutcome::Stage(stage)) if !stage.same_cell(&task_result) => {
                    // The method produced its own stage: bridge its
                    // completion, success or failure, into the pre-created
                    // result.
                    match stage.ready().await {
                        Ok(value) => {
                            task_result.complete(value);
                        }
                        Err(err) => {
                            task_result.fail(err);
                        }
                    }
                }
                Ok(MethodOutcome::Value(value)) => {
                    task_result.complete(value);
                }
                // No value returned, or the method handed back the
                // pre-created result itself. Both complete with null: a
                // method that deliberately returns null is
                // indistinguishable from one that returned nothing.
                Ok(_) => {
                    task_result.complete(Value::Null);
                }
                Err(err) => {
                    // Business failures land in the exceptional channel,
                    // never on the executor thread.
                    task_result.fail(err);
                }
            }
        })?;

        match method.return_kind {
            ReturnKind::Unit => Ok(MethodOutcome::Empty),
            _ => Ok(MethodOutcome::Stage(result)),
        }
    }
}

/// Run the remaining chain with `current` installed as the thread's
/// current result. The previous occupant is restored in all paths before
/// the settlement of `current`, including when proceed panics or errors.
fn proceed_with_current(
    chain: &mut InvocationContext,
    current: &AsyncResult,
) -> Result<MethodOutcome, InvocationError> {
    let previous = AsyncResult::swap_current(Some(current.clone()));
    let _restore = scopeguard::guard(previous, |previous| {
        AsyncResult::swap_current(previous);
    });
    chain.proceed()
}

impl std::fmt::Debug for AsynchronousInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsynchronousInterceptor")
            .field("validated_methods", &self.validated.len())
            .finish()
    }
}
