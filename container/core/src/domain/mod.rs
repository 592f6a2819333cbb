// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mod

pub mod async_result;
pub mod bean;
pub mod config;
pub mod creational;
pub mod error;
pub mod events;
pub mod injection;
pub mod interceptor;
pub mod scope;
