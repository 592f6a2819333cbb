// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Async Result - Shared Completion Cell for Asynchronous Dispatch
//
// A cloneable future/promise handle: dispatch pre-creates an incomplete
// result, hands it to the caller immediately, and completes it from the
// executor task. The thread-local current-result slot follows save/restore
// discipline so nested asynchronous invocations never cross-talk.

use crate::domain::error::{ContainerError, InvocationError};
use parking_lot::Mutex;
use serde_json::Value;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

thread_local! {
    static CURRENT_RESULT: RefCell<Option<AsyncResult>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone)]
enum CompletionState {
    Pending,
    Completed(Value),
    Failed(InvocationError),
    Cancelled,
}

struct ResultCell {
    completion: CompletionState,
    wakers: Vec<Waker>,
}

/// Cloneable handle to a single asynchronous completion.
///
/// All clones observe the same settlement; the first of `complete`, `fail`
/// or `cancel` wins and later settlements are ignored.
#[derive(Clone)]
pub struct AsyncResult {
    inner: Arc<Mutex<ResultCell>>,
}

impl AsyncResult {
    /// Create a not-yet-settled result.
    pub fn incomplete() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResultCell {
                completion: CompletionState::Pending,
                wakers: Vec::new(),
            })),
        }
    }

    /// Whether two handles share the same completion cell.
    pub fn same_cell(&self, other: &AsyncResult) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn complete(&self, value: Value) -> bool {
        self.settle(CompletionState::Completed(value))
    }

    pub fn fail(&self, error: InvocationError) -> bool {
        self.settle(CompletionState::Failed(error))
    }

    /// Cancel the result. A cancelled result is settled: the dispatched
    /// task observes it and skips the business invocation.
    pub fn cancel(&self) -> bool {
        self.settle(CompletionState::Cancelled)
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.lock().completion, CompletionState::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.lock().completion, CompletionState::Cancelled)
    }

    /// Non-blocking read of the settlement, if any.
    pub fn try_get(&self) -> Option<Result<Value, InvocationError>> {
        match &self.inner.lock().completion {
            CompletionState::Pending => None,
            CompletionState::Completed(value) => Some(Ok(value.clone())),
            CompletionState::Failed(err) => Some(Err(err.clone())),
            CompletionState::Cancelled => {
                Some(Err(ContainerError::Cancelled.into()))
            }
        }
    }

    /// Await the settlement.
    pub async fn ready(&self) -> Result<Value, InvocationError> {
        self.clone().await
    }

    fn settle(&self, next: CompletionState) -> bool {
        let wakers = {
            let mut cell = self.inner.lock();
            if !matches!(cell.completion, CompletionState::Pending) {
                return false;
            }
            cell.completion = next;
            std::mem::take(&mut cell.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// The result currently being produced on this thread, if any.
    pub fn current() -> Option<AsyncResult> {
        CURRENT_RESULT.with(|slot| slot.borrow().clone())
    }

    /// Install `result` as the thread's current result and return the
    /// previous occupant. Callers restore the returned value on exit;
    /// clearing the slot outright would leak across nested invocations.
    pub fn swap_current(result: Option<AsyncResult>) -> Option<AsyncResult> {
        CURRENT_RESULT.with(|slot| slot.replace(result))
    }
}

impl Future for AsyncResult {
    type Output = Result<Value, InvocationError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut cell = self.inner.lock();
        match &cell.completion {
            CompletionState::Pending => {
                if !cell.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    cell.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            CompletionState::Completed(value) => Poll::Ready(Ok(value.clone())),
            CompletionState::Failed(err) => Poll::Ready(Err(err.clone())),
            CompletionState::Cancelled => {
                Poll::Ready(Err(ContainerError::Cancelled.into()))
            }
        }
    }
}

impl std::fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult")
            .field("settled", &self.is_settled())
            .finish()
    }
}
