// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use thiserror::Error;

/// Container-level failures: configuration, resolution and lifecycle errors.
///
/// Validation and resolution errors fail fast and are never retried by the
/// container itself; callers can distinguish them from business failures
/// through [`InvocationError`].
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("no managed executor registered under '{0}'")]
    RejectedExecution(String),
    #[error("no such instance: {0}")]
    NoSuchInstance(String),
    #[error("unknown bean: {0}")]
    UnknownBean(String),
    #[error("bean definition error: {0}")]
    Definition(String),
    #[error("failed to create contextual instance of '{bean}': {reason}")]
    CreationFailed { bean: String, reason: String },
    #[error("illegal container state: {0}")]
    IllegalState(String),
    #[error("invocation cancelled")]
    Cancelled,
    #[error("passivation store failure: {0}")]
    Store(String),
}

/// Failure channel of a business-method invocation.
///
/// Container errors and business exceptions travel through the same chain
/// but must stay distinguishable so callers can make retry-or-fail
/// decisions. The payload is `Arc`-shared because an asynchronous result
/// hands the same failure to every cloned handle.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("{0}")]
    Container(Arc<ContainerError>),
    #[error("business exception: {0}")]
    Business(Arc<anyhow::Error>),
}

impl InvocationError {
    pub fn business(err: impl Into<anyhow::Error>) -> Self {
        Self::Business(Arc::new(err.into()))
    }

    pub fn is_business(&self) -> bool {
        matches!(self, Self::Business(_))
    }

    pub fn as_container(&self) -> Option<&ContainerError> {
        match self {
            Self::Container(err) => Some(err),
            Self::Business(_) => None,
        }
    }
}

impl From<ContainerError> for InvocationError {
    fn from(err: ContainerError) -> Self {
        Self::Container(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_and_container_errors_stay_distinguishable() {
        let business = InvocationError::business(anyhow::anyhow!("order rejected"));
        assert!(business.is_business());
        assert!(business.as_container().is_none());

        let container: InvocationError = ContainerError::NoSuchInstance("s-1".into()).into();
        assert!(!container.is_business());
        assert!(matches!(
            container.as_container(),
            Some(ContainerError::NoSuchInstance(_))
        ));
    }

    #[test]
    fn cloned_errors_share_the_same_payload() {
        let err = InvocationError::business(anyhow::anyhow!("boom"));
        let clone = err.clone();
        assert_eq!(err.to_string(), clone.to_string());
    }
}
