// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Instance Bag - Single-Slot Contextual Instance Holder
//
// One bag exists per (context, bean) pair. It pairs exactly one instance
// with its creational context and guarantees at-most-once creation under
// concurrent access: the first caller runs the creation block under an
// exclusive lock, every later caller observes the published instance
// without touching that lock.

use crate::domain::bean::{BeanHandle, BeanId};
use crate::domain::creational::CreationalContext;
use crate::domain::error::ContainerError;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

/// An instance together with the creational context that built it.
#[derive(Clone)]
pub struct BagEntry {
    pub instance: BeanHandle,
    pub context: Arc<CreationalContext>,
}

impl std::fmt::Debug for BagEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BagEntry")
            .field("context", &self.context)
            .finish()
    }
}

pub struct InstanceBag {
    bean: BeanId,
    slot: RwLock<Option<BagEntry>>,
    creation_lock: Mutex<()>,
}

impl InstanceBag {
    pub fn new(bean: BeanId) -> Self {
        Self {
            bean,
            slot: RwLock::new(None),
            creation_lock: Mutex::new(()),
        }
    }

    pub fn bean(&self) -> BeanId {
        self.bean
    }

    /// The published entry, if the instance has been created.
    pub fn get(&self) -> Option<BagEntry> {
        self.slot.read().clone()
    }

    pub fn is_populated(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Return the shared instance, creating it on first access.
    ///
    /// Only one thread runs `create`; threads arriving while creation is in
    /// flight block on the creation lock and re-check the slot once they
    /// hold it. A creation failure propagates to the calling thread and
    /// leaves the bag empty, so a later caller may retry — failures are
    /// never cached.
    pub fn get_or_create<F>(&self, create: F) -> Result<BagEntry, ContainerError>
    where
        F: FnOnce(&Arc<CreationalContext>) -> Result<BeanHandle, ContainerError>,
    {
        if let Some(entry) = self.get() {
            return Ok(entry);
        }

        let _creation = self.creation_lock.lock();
        if let Some(entry) = self.get() {
            // Another thread created the instance while this one waited.
            return Ok(entry);
        }

        debug!(bean = %self.bean, "creating contextual instance");
        let context = Arc::new(CreationalContext::new(self.bean));
        let instance = create(&context)?;
        let entry = BagEntry { instance, context };
        *self.slot.write() = Some(entry.clone());
        Ok(entry)
    }

    /// Detach the entry, leaving the bag empty. Used at scope teardown.
    pub fn take(&self) -> Option<BagEntry> {
        self.slot.write().take()
    }
}

impl std::fmt::Debug for InstanceBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceBag")
            .field("bean", &self.bean)
            .field("populated", &self.is_populated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn concurrent_callers_observe_exactly_one_creation() {
        let bag = Arc::new(InstanceBag::new(BeanId::new()));
        let creations = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bag = Arc::clone(&bag);
                let creations = Arc::clone(&creations);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let entry = bag
                        .get_or_create(|_ctx| {
                            creations.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(42_u64) as BeanHandle)
                        })
                        .unwrap();
                    Arc::as_ptr(&entry.instance) as *const () as usize
                })
            })
            .collect();

        let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn creation_failure_leaves_the_bag_empty_for_retry() {
        let bag = InstanceBag::new(BeanId::new());

        let err = bag
            .get_or_create(|_ctx| {
                Err(ContainerError::IllegalState("constructor blew up".into()))
            })
            .unwrap_err();
        assert!(matches!(err, ContainerError::IllegalState(_)));
        assert!(!bag.is_populated());

        // The next caller retries and succeeds.
        let entry = bag
            .get_or_create(|_ctx| Ok(Arc::new("recovered") as BeanHandle))
            .unwrap();
        assert!(entry.instance.downcast_ref::<&str>().is_some());
        assert!(bag.is_populated());
    }

    #[test]
    fn take_detaches_the_entry() {
        let bag = InstanceBag::new(BeanId::new());
        bag.get_or_create(|_ctx| Ok(Arc::new(()) as BeanHandle))
            .unwrap();

        assert!(bag.take().is_some());
        assert!(!bag.is_populated());
        assert!(bag.take().is_none());
    }
}
