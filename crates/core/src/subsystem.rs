// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subsystems: individually requirable components of a robot
//!
//! A subsystem is a named unit of exclusive access. Commands declare the
//! subsystems they require; the registry guarantees at most one active
//! holder per subsystem. An optional idle action runs whenever the
//! subsystem is enabled and unclaimed, filling the role of a default
//! command.

use crate::context::RequirementContext;
use crate::error::BodyError;
use crate::execution::BodyFuture;
use crate::registry::{Registry, RegistryShared};
use crate::RegistryError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub(crate) type IdleAction = Arc<dyn Fn(RequirementContext) -> BodyFuture + Send + Sync>;
pub(crate) type ResetHook = Box<dyn Fn() + Send + Sync>;

/// An individually requirable component with enable/disable lifecycle.
///
/// Subsystems are disabled at registration; `enable` must be called before
/// the idle action will run. Enable state gates the idle action and lets
/// `disable` cancel whatever currently holds the subsystem; it does not
/// gate acquisition itself.
pub struct Subsystem {
    name: String,
    enabled: AtomicBool,
    idle_action: Option<IdleAction>,
    reset: Option<ResetHook>,
    registry: Weak<RegistryShared>,
}

impl Subsystem {
    pub(crate) fn create(
        name: String,
        idle_action: Option<IdleAction>,
        reset: Option<ResetHook>,
        registry: Weak<RegistryShared>,
    ) -> Self {
        Self {
            name,
            enabled: AtomicBool::new(false),
            idle_action,
            reset,
            registry,
        }
    }

    pub fn builder(name: impl Into<String>) -> SubsystemBuilder {
        SubsystemBuilder {
            name: name.into(),
            idle_action: None,
            reset: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable the subsystem, scheduling the idle action if one is
    /// configured and the subsystem is unclaimed.
    pub fn enable(self: &Arc<Self>) {
        if let Some(shared) = self.registry.upgrade() {
            Registry::from_shared(shared).set_enabled(self, true);
        }
    }

    /// Disable the subsystem, cancelling whatever execution currently
    /// holds it. The displaced holder winds down cooperatively.
    pub fn disable(self: &Arc<Self>) {
        if let Some(shared) = self.registry.upgrade() {
            Registry::from_shared(shared).set_enabled(self, false);
        }
    }

    /// Flip the enabled flag, returning the previous value
    pub(crate) fn set_enabled_flag(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst)
    }

    pub(crate) fn idle_action(&self) -> Option<IdleAction> {
        self.idle_action.clone()
    }

    pub(crate) fn has_idle_action(&self) -> bool {
        self.idle_action.is_some()
    }

    /// Run the reset hook after an exclusive-use session completes
    pub(crate) fn run_reset(&self) {
        if let Some(reset) = &self.reset {
            reset();
        }
    }
}

impl std::fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subsystem")
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Builder for [`Subsystem`] registration
pub struct SubsystemBuilder {
    name: String,
    idle_action: Option<IdleAction>,
    reset: Option<ResetHook>,
}

impl SubsystemBuilder {
    /// Run the given action whenever the subsystem is enabled and
    /// unclaimed. The action implicitly holds the subsystem while it runs,
    /// so it is cancelled when a command claims the subsystem and
    /// rescheduled once the claim is released.
    pub fn with_idle_action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(RequirementContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
    {
        self.idle_action = Some(Arc::new(move |ctx| -> BodyFuture { Box::pin(action(ctx)) }));
        self
    }

    /// Hook invoked after every exclusive-use session on this subsystem
    /// completes, whether it finished or was cancelled.
    pub fn with_reset<F>(mut self, reset: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Register the subsystem with the given registry. The subsystem
    /// starts disabled and its initial state is published to telemetry.
    pub fn register(self, registry: &Registry) -> Result<Arc<Subsystem>, RegistryError> {
        registry.install(self.name, self.idle_action, self.reset)
    }
}

#[cfg(test)]
#[path = "subsystem_tests.rs"]
mod tests;
