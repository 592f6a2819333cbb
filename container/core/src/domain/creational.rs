// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Creational Context - Dependent-Object Ownership for One Instance
//
// One creational context exists per instance-creation episode. Dependent
// objects created while building the instance are recorded in creation
// order and destroyed exactly once, in reverse order, when the owning
// instance goes away.

use crate::domain::bean::{BeanHandle, BeanId};
use crate::domain::error::ContainerError;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Destruction routine of a single dependent object.
pub type DependentDestroyer = Box<dyn FnOnce(BeanHandle) -> Result<(), ContainerError> + Send>;

/// The creational-context surface other containers hand to the injection
/// path. A foreign implementation gets adapted into the internal type.
pub trait CreationalScope: Send + Sync {
    fn register_dependent(
        &self,
        name: &str,
        instance: BeanHandle,
        destroyer: Option<DependentDestroyer>,
    );

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct DependentEntry {
    name: String,
    instance: BeanHandle,
    destroyer: Option<DependentDestroyer>,
}

/// Internal creational context.
pub struct CreationalContext {
    bean: Option<BeanId>,
    dependents: Mutex<Vec<DependentEntry>>,
    released: AtomicBool,
    passivation_capable: AtomicBool,
    /// When adapting a foreign scope, dependents are forwarded to it and
    /// it keeps ownership of their destruction.
    foreign: Option<Arc<dyn CreationalScope>>,
}

impl CreationalContext {
    pub fn new(bean: BeanId) -> Self {
        Self {
            bean: Some(bean),
            dependents: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            passivation_capable: AtomicBool::new(false),
            foreign: None,
        }
    }

    /// Context with no owning definition (lifecycle plumbing, tests).
    pub fn unowned() -> Self {
        Self {
            bean: None,
            dependents: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            passivation_capable: AtomicBool::new(false),
            foreign: None,
        }
    }

    fn adapting(foreign: Arc<dyn CreationalScope>) -> Self {
        Self {
            bean: None,
            dependents: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            passivation_capable: AtomicBool::new(false),
            foreign: Some(foreign),
        }
    }

    /// Adapt an arbitrary creational scope into the internal type. An
    /// already-internal context passes through untouched.
    pub fn internalize(scope: Arc<dyn CreationalScope>) -> Arc<CreationalContext> {
        match Arc::downcast::<CreationalContext>(Arc::clone(&scope).into_any()) {
            Ok(internal) => internal,
            Err(_) => Arc::new(CreationalContext::adapting(scope)),
        }
    }

    pub fn owner(&self) -> Option<BeanId> {
        self.bean
    }

    pub fn mark_passivation_capable(&self) {
        self.passivation_capable.store(true, Ordering::Release);
    }

    pub fn is_passivation_capable(&self) -> bool {
        self.passivation_capable.load(Ordering::Acquire)
    }

    /// Record a dependent object created during this creation episode.
    pub fn push_dependent(
        &self,
        name: impl Into<String>,
        instance: BeanHandle,
        destroyer: Option<DependentDestroyer>,
    ) {
        let name = name.into();
        if let Some(foreign) = &self.foreign {
            foreign.register_dependent(&name, instance, destroyer);
            return;
        }
        self.dependents.lock().push(DependentEntry {
            name,
            instance,
            destroyer,
        });
    }

    pub fn dependent_count(&self) -> usize {
        self.dependents.lock().len()
    }

    /// Destroy all tracked dependents, newest first. Runs at most once;
    /// a second release is a no-op. A failing destroyer does not stop the
    /// remaining dependents from being destroyed.
    pub fn release(&self) -> Vec<ContainerError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        let mut entries = {
            let mut dependents = self.dependents.lock();
            std::mem::take(&mut *dependents)
        };

        let mut failures = Vec::new();
        while let Some(entry) = entries.pop() {
            debug!(dependent = %entry.name, "destroying dependent object");
            if let Some(destroyer) = entry.destroyer {
                if let Err(err) = destroyer(entry.instance) {
                    warn!(dependent = %entry.name, error = %err, "dependent destruction failed");
                    failures.push(err);
                }
            }
        }
        failures
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl CreationalScope for CreationalContext {
    fn register_dependent(
        &self,
        name: &str,
        instance: BeanHandle,
        destroyer: Option<DependentDestroyer>,
    ) {
        self.push_dependent(name, instance, destroyer);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl std::fmt::Debug for CreationalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationalContext")
            .field("bean", &self.bean)
            .field("dependents", &self.dependent_count())
            .field("released", &self.is_released())
            .finish()
    }
}
