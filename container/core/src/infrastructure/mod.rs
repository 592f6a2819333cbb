// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod executor_registry;
pub mod passivation_store;

pub use executor_registry::{ExecutorRegistry, ManagedExecutor, DEFAULT_EXECUTOR};
