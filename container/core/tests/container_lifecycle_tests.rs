// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use aegis_container_core::application::container::ContainerRuntime;
use aegis_container_core::domain::bean::{
    BeanDefinition, BeanHandle, MethodMetadata, MethodOutcome,
};
use aegis_container_core::domain::creational::CreationalContext;
use aegis_container_core::domain::error::InvocationError;
use aegis_container_core::domain::events::ScopeEvent;
use aegis_container_core::domain::interceptor::{
    InterceptionType, Interceptor, InterceptorBinding, InvocationContext,
};
use aegis_container_core::domain::scope::ScopeKind;
use aegis_container_core::infrastructure::event_bus::ContainerEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

type Log = Arc<Mutex<Vec<String>>>;

struct RecordingInterceptor {
    name: String,
    bindings: Vec<InterceptorBinding>,
    priority: i32,
    types: Vec<InterceptionType>,
    log: Log,
}

impl RecordingInterceptor {
    fn around(name: &str, binding: &str, priority: i32, log: &Log) -> Arc<dyn Interceptor> {
        Arc::new(Self {
            name: name.into(),
            bindings: vec![InterceptorBinding::new(binding)],
            priority,
            types: vec![InterceptionType::AroundInvoke],
            log: Arc::clone(log),
        })
    }

    fn lifecycle(name: &str, binding: &str, log: &Log) -> Arc<dyn Interceptor> {
        Arc::new(Self {
            name: name.into(),
            bindings: vec![InterceptorBinding::new(binding)],
            priority: 300,
            types: vec![InterceptionType::PostConstruct, InterceptionType::PreDestroy],
            log: Arc::clone(log),
        })
    }
}

impl Interceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn bindings(&self) -> &[InterceptorBinding] {
        &self.bindings
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn intercepts(&self, ty: InterceptionType) -> bool {
        self.types.contains(&ty)
    }

    fn invoke(
        &self,
        _ty: InterceptionType,
        ctx: &mut InvocationContext,
    ) -> Result<MethodOutcome, InvocationError> {
        self.log.lock().push(format!("{}:before", self.name));
        let outcome = ctx.proceed();
        self.log.lock().push(format!("{}:after", self.name));
        outcome
    }
}

#[tokio::test]
async fn interceptor_chain_wraps_business_logic_in_priority_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let body_log = Arc::clone(&log);

    let orders = BeanDefinition::builder("orders")
        .scope(ScopeKind::Application)
        .binding(InterceptorBinding::new("transactional"))
        .binding(InterceptorBinding::new("audited"))
        .method(MethodMetadata::new("place", move |_target, _params| {
            body_log.lock().push("business".into());
            Ok(MethodOutcome::Value(serde_json::json!("placed")))
        }))
        .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
        .build()
        .unwrap();

    let container = ContainerRuntime::builder()
        .definition(orders)
        // Transaction and security collaborators plug in as plain
        // around-invoke interceptors; the engine only orders the chain.
        .interceptor(RecordingInterceptor::around("tx", "transactional", 200, &log))
        .interceptor(RecordingInterceptor::around("audit", "audited", 500, &log))
        .build()
        .unwrap();
    container.start().unwrap();

    let instance = container.application_instance("orders").unwrap();
    let outcome = container
        .invoke("orders", &instance, "place", serde_json::Value::Null)
        .unwrap();
    assert_eq!(outcome.value(), Some(&serde_json::json!("placed")));
    assert_eq!(
        *log.lock(),
        vec!["tx:before", "audit:before", "business", "audit:after", "tx:after"]
    );

    container.shutdown().await;
}

#[tokio::test]
async fn request_scope_shares_one_instance_and_destroys_it_on_request_end() {
    let destroyed: Log = Arc::new(Mutex::new(Vec::new()));
    let destroy_log = Arc::clone(&destroyed);

    let basket = BeanDefinition::builder("basket")
        .scope(ScopeKind::Request)
        .pre_destroy(move |_instance| {
            destroy_log.lock().push("basket destroyed".into());
            Ok(())
        })
        .constructor(|_ctx| Ok(Arc::new(Mutex::new(Vec::<String>::new())) as BeanHandle))
        .build()
        .unwrap();

    let container = ContainerRuntime::builder().definition(basket).build().unwrap();
    container.start().unwrap();

    let request = container.begin_request();
    let first = container.request_instance(request, "basket").unwrap();
    let second = container.request_instance(request, "basket").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other_request = container.begin_request();
    let third = container.request_instance(other_request, "basket").unwrap();
    assert!(!Arc::ptr_eq(&first, &third));

    container.end_request(request).unwrap();
    assert_eq!(*destroyed.lock(), vec!["basket destroyed"]);

    // The ended request's context is gone.
    assert!(container.request_instance(request, "basket").is_err());

    container.end_request(other_request).unwrap();
    container.shutdown().await;
}

#[tokio::test]
async fn post_construct_chain_runs_interceptors_before_bean_callbacks() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let callback_log = Arc::clone(&log);

    let service = BeanDefinition::builder("service")
        .scope(ScopeKind::Application)
        .binding(InterceptorBinding::new("observed"))
        .post_construct(move |_instance| {
            callback_log.lock().push("callback".into());
            Ok(())
        })
        .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
        .build()
        .unwrap();

    let container = ContainerRuntime::builder()
        .definition(service)
        .interceptor(RecordingInterceptor::lifecycle("observer", "observed", &log))
        .build()
        .unwrap();
    container.start().unwrap();

    container.application_instance("service").unwrap();
    assert_eq!(
        *log.lock(),
        vec!["observer:before", "callback", "observer:after"]
    );

    container.shutdown().await;
}

#[tokio::test]
async fn dependent_instances_cascade_destroy_in_reverse_creation_order() {
    let destroyed: Log = Arc::new(Mutex::new(Vec::new()));

    let mut definitions = Vec::new();
    for name in ["validator", "formatter"] {
        let log = Arc::clone(&destroyed);
        let owned = name.to_string();
        definitions.push(
            BeanDefinition::builder(name)
                .scope(ScopeKind::Dependent)
                .pre_destroy(move |_instance| {
                    log.lock().push(owned.clone());
                    Ok(())
                })
                .constructor(|_ctx| Ok(Arc::new(()) as BeanHandle))
                .build()
                .unwrap(),
        );
    }

    let container = ContainerRuntime::builder()
        .definition(definitions.remove(0))
        .definition(definitions.remove(0))
        .build()
        .unwrap();
    container.start().unwrap();

    let owner = Arc::new(CreationalContext::unowned());
    container.dependent_instance("validator", &owner).unwrap();
    container.dependent_instance("formatter", &owner).unwrap();
    assert_eq!(owner.dependent_count(), 2);

    let failures = owner.release();
    assert!(failures.is_empty());
    assert_eq!(*destroyed.lock(), vec!["formatter", "validator"]);

    // A second release is a no-op: each destroy callback ran exactly once.
    owner.release();
    assert_eq!(destroyed.lock().len(), 2);

    container.shutdown().await;
}

#[tokio::test]
async fn scope_transitions_are_published_on_the_event_bus() {
    let container = ContainerRuntime::builder().build().unwrap();
    let mut receiver = container.events().subscribe();
    container.start().unwrap();

    let request = container.begin_request();
    container.end_request(request).unwrap();

    let mut saw_started = false;
    let mut saw_request_started = false;
    let mut saw_request_ended = false;
    for _ in 0..3 {
        let event = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ContainerEvent::Scope(ScopeEvent::ApplicationStarted { .. }) => saw_started = true,
            ContainerEvent::Scope(ScopeEvent::RequestStarted { request_id, .. }) => {
                assert_eq!(request_id, request);
                saw_request_started = true;
            }
            ContainerEvent::Scope(ScopeEvent::RequestEnded { request_id, .. }) => {
                assert_eq!(request_id, request);
                saw_request_ended = true;
            }
            _ => {}
        }
    }
    assert!(saw_started && saw_request_started && saw_request_ended);

    container.shutdown().await;
}
