// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use aegis_container_core::application::container::ContainerRuntime;
use aegis_container_core::domain::bean::{
    BeanDefinition, BeanHandle, MethodMetadata, MethodOutcome, PassivationHooks,
};
use aegis_container_core::domain::config::{ContainerConfig, PassivationConfig};
use aegis_container_core::domain::error::ContainerError;
use aegis_container_core::domain::events::PassivationEvent;
use aegis_container_core::domain::scope::ScopeKind;
use aegis_container_core::infrastructure::passivation_store::FilePassivationStore;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

struct Cart {
    items: Mutex<Vec<String>>,
}

fn cart_definition() -> BeanDefinition {
    BeanDefinition::builder("cart")
        .scope(ScopeKind::Session)
        .passivation_hooks(PassivationHooks::new(
            |instance| {
                let cart = instance
                    .downcast_ref::<Cart>()
                    .ok_or_else(|| ContainerError::IllegalState("not a cart".into()))?;
                Ok(json!({ "items": *cart.items.lock() }))
            },
            |state| {
                let items: Vec<String> = state["items"]
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Arc::new(Cart {
                    items: Mutex::new(items),
                }) as BeanHandle)
            },
        ))
        .method(MethodMetadata::new("add", |target, params| {
            let cart = target
                .downcast_ref::<Cart>()
                .ok_or_else(|| ContainerError::IllegalState("not a cart".into()))?;
            if let Some(item) = params["item"].as_str() {
                cart.items.lock().push(item.to_string());
            }
            Ok(MethodOutcome::Empty)
        }))
        .method(MethodMetadata::new("list", |target, _params| {
            let cart = target
                .downcast_ref::<Cart>()
                .ok_or_else(|| ContainerError::IllegalState("not a cart".into()))?;
            Ok(MethodOutcome::Value(json!(*cart.items.lock())))
        }))
        .constructor(|_ctx| {
            Ok(Arc::new(Cart {
                items: Mutex::new(Vec::new()),
            }) as BeanHandle)
        })
        .build()
        .unwrap()
}

fn fast_sweep_config() -> ContainerConfig {
    ContainerConfig {
        passivation: PassivationConfig {
            capacity: 64,
            sweep_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(50),
        },
        ..ContainerConfig::default()
    }
}

#[tokio::test]
async fn idle_instance_is_passivated_and_reactivates_with_state_intact() {
    let container = ContainerRuntime::builder()
        .definition(cart_definition())
        .config(fast_sweep_config())
        .build()
        .unwrap();
    container.start().unwrap();

    let session = container.create_session();
    container.session_instance(session, "cart").await.unwrap();
    container
        .invoke_stateful(session, "cart", "add", json!({"item": "espresso"}))
        .await
        .unwrap();
    container
        .invoke_stateful(session, "cart", "add", json!({"item": "grinder"}))
        .await
        .unwrap();

    // The background sweep passivates the idle instance.
    timeout(Duration::from_secs(2), async {
        while container.stateful().passivated_count() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("sweep never passivated the idle instance");
    assert_eq!(container.stateful().active_count(), 0);

    // Next invocation transparently reactivates with the captured state.
    let outcome = container
        .invoke_stateful(session, "cart", "list", Value::Null)
        .await
        .unwrap();
    assert_eq!(outcome.value(), Some(&json!(["espresso", "grinder"])));
    assert_eq!(container.stateful().active_count(), 1);

    container.shutdown().await;
}

#[tokio::test]
async fn fully_removed_instance_raises_no_such_instance() {
    let container = ContainerRuntime::builder()
        .definition(cart_definition())
        .build()
        .unwrap();
    container.start().unwrap();

    let session = container.create_session();
    container.session_instance(session, "cart").await.unwrap();
    container.stateful().remove(session).await.unwrap();

    let err = container
        .invoke_stateful(session, "cart", "list", Value::Null)
        .await
        .unwrap_err();
    // Distinguishable from a business failure.
    assert!(!err.is_business());
    assert!(matches!(
        err.as_container(),
        Some(ContainerError::NoSuchInstance(_))
    ));

    container.shutdown().await;
}

#[tokio::test]
async fn passivated_state_round_trips_through_the_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let container = ContainerRuntime::builder()
        .definition(cart_definition())
        .passivation_store(Arc::new(FilePassivationStore::new(dir.path())))
        .build()
        .unwrap();
    container.start().unwrap();

    let session = container.create_session();
    container.session_instance(session, "cart").await.unwrap();
    container
        .invoke_stateful(session, "cart", "add", json!({"item": "kettle"}))
        .await
        .unwrap();

    assert!(container.stateful().passivate(session).await.unwrap());
    // The detached payload is on disk.
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 1);

    let outcome = container
        .invoke_stateful(session, "cart", "list", Value::Null)
        .await
        .unwrap();
    assert_eq!(outcome.value(), Some(&json!(["kettle"])));

    container.shutdown().await;
}

#[tokio::test]
async fn passivation_activity_is_observable_per_session() {
    let container = ContainerRuntime::builder()
        .definition(cart_definition())
        .build()
        .unwrap();
    container.start().unwrap();

    let session = container.create_session();
    let mut receiver = container.events().subscribe_session(session);

    // Activity on another session never reaches this subscriber.
    let other = container.create_session();
    container.session_instance(other, "cart").await.unwrap();
    container.stateful().passivate(other).await.unwrap();

    container.session_instance(session, "cart").await.unwrap();
    container.stateful().passivate(session).await.unwrap();

    let event = timeout(Duration::from_secs(1), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        PassivationEvent::Passivated { session_id, .. } => assert_eq!(session_id, session),
        other => panic!("unexpected event {other:?}"),
    }

    container.shutdown().await;
}

#[tokio::test]
async fn session_invalidation_destroys_the_stateful_instance() {
    let container = ContainerRuntime::builder()
        .definition(cart_definition())
        .build()
        .unwrap();
    container.start().unwrap();

    let session = container.create_session();
    container.session_instance(session, "cart").await.unwrap();
    assert_eq!(container.stateful().len(), 1);

    container.invalidate_session(session).await.unwrap();
    assert_eq!(container.stateful().len(), 0);

    let err = container
        .invoke_stateful(session, "cart", "list", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_container(),
        Some(ContainerError::NoSuchInstance(_))
    ));

    container.shutdown().await;
}
