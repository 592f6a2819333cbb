// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::bean::BeanHandle;
use crate::domain::creational::CreationalContext;
use crate::domain::error::ContainerError;
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

/// What kind of member an injection step targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectionStepKind {
    Resource,
    Field,
    Method,
}

impl InjectionStepKind {
    fn rank(self) -> u8 {
        match self {
            // Resources are injected before any member injection.
            InjectionStepKind::Resource => 0,
            InjectionStepKind::Field => 1,
            InjectionStepKind::Method => 2,
        }
    }
}

/// One unit of injection work, pre-resolved at deployment time.
///
/// `ancestor_depth` is 0 for members declared on the bean class itself and
/// grows toward the root superclass. The applier receives the creational
/// context so dependent-scoped collaborators it creates are registered for
/// cascading destruction.
#[derive(Clone)]
pub struct InjectionStep {
    pub kind: InjectionStepKind,
    pub ancestor_depth: usize,
    pub member: String,
    pub apply: Arc<dyn Fn(&BeanHandle, &CreationalContext) -> Result<(), ContainerError> + Send + Sync>,
}

impl InjectionStep {
    pub fn new(
        kind: InjectionStepKind,
        ancestor_depth: usize,
        member: impl Into<String>,
        apply: impl Fn(&BeanHandle, &CreationalContext) -> Result<(), ContainerError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            kind,
            ancestor_depth,
            member: member.into(),
            apply: Arc::new(apply),
        }
    }

    pub fn resource(
        member: impl Into<String>,
        apply: impl Fn(&BeanHandle, &CreationalContext) -> Result<(), ContainerError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(InjectionStepKind::Resource, 0, member, apply)
    }

    pub fn field(
        ancestor_depth: usize,
        member: impl Into<String>,
        apply: impl Fn(&BeanHandle, &CreationalContext) -> Result<(), ContainerError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(InjectionStepKind::Field, ancestor_depth, member, apply)
    }

    pub fn method(
        ancestor_depth: usize,
        member: impl Into<String>,
        apply: impl Fn(&BeanHandle, &CreationalContext) -> Result<(), ContainerError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(InjectionStepKind::Method, ancestor_depth, member, apply)
    }
}

impl fmt::Debug for InjectionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionStep")
            .field("kind", &self.kind)
            .field("ancestor_depth", &self.ancestor_depth)
            .field("member", &self.member)
            .finish()
    }
}

/// The full, ordered injection plan of a bean definition.
///
/// Order is fixed once at build time: resources, then superclass members
/// before declared members (deepest ancestor first), fields before methods
/// within a level. Registration order breaks the remaining ties.
#[derive(Clone, Default)]
pub struct InjectionPlan {
    steps: Vec<InjectionStep>,
}

impl InjectionPlan {
    pub fn new(mut steps: Vec<InjectionStep>) -> Self {
        steps.sort_by_key(|step| {
            let resource = u8::from(step.kind != InjectionStepKind::Resource);
            (resource, Reverse(step.ancestor_depth), step.kind.rank())
        });
        Self { steps }
    }

    pub fn steps(&self) -> &[InjectionStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for InjectionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPlan")
            .field("steps", &self.steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(kind: InjectionStepKind, depth: usize, member: &str) -> InjectionStep {
        InjectionStep::new(kind, depth, member, |_instance, _ctx| Ok(()))
    }

    #[test]
    fn plan_orders_resources_then_superclass_first_members() {
        let plan = InjectionPlan::new(vec![
            step(InjectionStepKind::Method, 0, "set_repository"),
            step(InjectionStepKind::Field, 0, "repository"),
            step(InjectionStepKind::Method, 1, "set_clock"),
            step(InjectionStepKind::Resource, 0, "data_source"),
            step(InjectionStepKind::Field, 1, "clock"),
        ]);

        let members: Vec<&str> = plan.steps().iter().map(|s| s.member.as_str()).collect();
        assert_eq!(
            members,
            vec![
                "data_source",
                "clock",
                "set_clock",
                "repository",
                "set_repository"
            ]
        );
    }

    #[test]
    fn registration_order_breaks_ties() {
        let plan = InjectionPlan::new(vec![
            step(InjectionStepKind::Field, 0, "first"),
            step(InjectionStepKind::Field, 0, "second"),
        ]);
        let members: Vec<&str> = plan.steps().iter().map(|s| s.member.as_str()).collect();
        assert_eq!(members, vec!["first", "second"]);
    }
}
