// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod async_dispatch;
pub mod chain;
pub mod container;
pub mod injection;
pub mod instance_bag;
pub mod passivation;
pub mod scope_manager;

// Re-export the main entry points for convenience
pub use container::{ContainerRuntime, ContainerRuntimeBuilder};
pub use instance_bag::{BagEntry, InstanceBag};
