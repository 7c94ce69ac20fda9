// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry: the process-wide arbiter for subsystem claims
//!
//! All acquisition and release decisions funnel through one mutex, which is
//! only ever held for short, non-awaiting critical sections. Acquiring a
//! claimed subsystem installs the requester immediately and cancels the
//! prior holder; the requester then awaits the holder's full termination
//! before its body runs.

use crate::context::RequirementContext;
use crate::error::{AcquireError, RegistryError, UseError};
use crate::execution::{
    self, drive, CancelCause, Driven, ExecKind, ExecStatus, ExecutionHandle, ExecutionIds,
    ExecutionParts, Outcome, ReleaseGuard,
};
use crate::subsystem::{IdleAction, ResetHook, Subsystem};
use crate::telemetry::{enabled_path, NoOpTelemetry, TelemetrySink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

/// Options for an ad-hoc exclusive block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseOptions {
    /// Cancel conflicting holders instead of failing. Defaults to true.
    #[serde(default = "default_cancel_conflicts")]
    pub cancel_conflicts: bool,
    /// Diagnostic label; defaults to `use(<subsystem names>)`
    #[serde(default)]
    pub label: Option<String>,
}

fn default_cancel_conflicts() -> bool {
    true
}

impl Default for UseOptions {
    fn default() -> Self {
        Self {
            cancel_conflicts: true,
            label: None,
        }
    }
}

impl UseOptions {
    /// Fail with a rejection instead of cancelling conflicting holders
    pub fn fail_on_conflict(mut self) -> Self {
        self.cancel_conflicts = false;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Default)]
struct RegistryInner {
    subsystems: HashMap<String, Arc<Subsystem>>,
    holders: HashMap<String, ExecutionHandle>,
}

pub(crate) struct RegistryShared {
    inner: Mutex<RegistryInner>,
    system_enabled: AtomicBool,
    telemetry: Arc<dyn TelemetrySink>,
    ids: ExecutionIds,
}

/// The coordinator. Clones share the same underlying state.
///
/// One registry is created at program start and threaded to every
/// subsystem and command; `shutdown` is the explicit teardown path.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<RegistryShared>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_telemetry(Arc::new(NoOpTelemetry))
    }

    pub fn with_telemetry(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                inner: Mutex::new(RegistryInner::default()),
                system_enabled: AtomicBool::new(true),
                telemetry,
                ids: ExecutionIds::default(),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<RegistryShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryShared> {
        Arc::downgrade(&self.shared)
    }

    /// Whether the system-wide gate is open
    pub fn is_system_enabled(&self) -> bool {
        self.shared.system_enabled.load(Ordering::SeqCst)
    }

    /// Open or close the system-wide gate. Closing it makes subsequent
    /// invocations fail softly; executions already running are unaffected.
    pub fn set_system_enabled(&self, enabled: bool) {
        self.shared.system_enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "command system gate");
    }

    /// Look up a registered subsystem by name
    pub fn subsystem(&self, name: &str) -> Option<Arc<Subsystem>> {
        self.lock_inner().subsystems.get(name).cloned()
    }

    /// Label of the execution currently holding the subsystem, if any
    pub fn holder_of(&self, subsystem: &Subsystem) -> Option<String> {
        self.lock_inner()
            .holders
            .get(subsystem.name())
            .map(|handle| handle.label().to_string())
    }

    /// Enable or disable a subsystem.
    ///
    /// Transitions publish to telemetry. Enabling schedules the idle
    /// action when the subsystem is unclaimed; disabling cancels the
    /// current holder.
    pub fn set_enabled(&self, subsystem: &Arc<Subsystem>, enabled: bool) {
        let was_enabled = subsystem.set_enabled_flag(enabled);
        if was_enabled == enabled {
            return;
        }
        self.shared
            .telemetry
            .publish_bool(&enabled_path(subsystem.name()), enabled);
        if enabled {
            self.schedule_idle(subsystem);
        } else {
            let holder = self
                .lock_inner()
                .holders
                .get(subsystem.name())
                .cloned();
            if let Some(holder) = holder {
                holder.cancel(CancelCause::SubsystemDisabled {
                    subsystem: subsystem.name().to_string(),
                });
            }
        }
    }

    /// Run `body` with exclusive access to the given subsystems.
    ///
    /// Re-entrant: subsystems already held by `ctx` are excluded, and a
    /// call whose effective requirement set is empty runs the body
    /// directly with no new claim. With `cancel_conflicts` (the default),
    /// conflicting holders are cancelled and awaited before the body
    /// starts; otherwise an existing holder rejects the call untouched.
    pub async fn use_exclusive<R, F, Fut>(
        &self,
        ctx: &RequirementContext,
        subsystems: &[&Arc<Subsystem>],
        options: UseOptions,
        body: F,
    ) -> Result<R, UseError>
    where
        F: FnOnce(RequirementContext) -> Fut,
        Fut: Future<Output = R>,
    {
        if !self.is_system_enabled() {
            tracing::warn!("system disabled; exclusive block skipped");
            return Err(UseError::SystemDisabled);
        }

        let mut needed: Vec<Arc<Subsystem>> = Vec::new();
        for subsystem in subsystems {
            if ctx.holds(subsystem.name()) {
                continue;
            }
            if needed.iter().any(|s| s.name() == subsystem.name()) {
                continue;
            }
            needed.push(Arc::clone(subsystem));
        }

        if needed.is_empty() {
            return Ok(body(ctx.clone()).await);
        }

        let label = options.label.clone().unwrap_or_else(|| {
            let names: Vec<&str> = needed.iter().map(|s| s.name()).collect();
            format!("use({})", names.join(", "))
        });
        let parts = self.new_execution(label, ExecKind::Adhoc, true);

        let conflicts = if options.cancel_conflicts {
            match self.acquire(&parts.handle, &needed) {
                Ok(conflicts) => conflicts,
                Err(error) => {
                    tracing::warn!(
                        execution = %parts.handle.label(),
                        error = %error,
                        "exclusive block could not acquire subsystems"
                    );
                    return Err(error.into());
                }
            }
        } else {
            if let Err(error) = self.try_acquire(&parts.handle, &needed) {
                tracing::warn!(
                    execution = %parts.handle.label(),
                    error = %error,
                    "exclusive block rejected"
                );
                return Err(error.into());
            }
            Vec::new()
        };

        let child = ctx.child(needed.iter().map(|s| s.name().to_string()));
        let guard = ReleaseGuard::new(
            self.clone(),
            parts.handle.clone(),
            needed,
            parts.status_tx,
            parts.cancel_rx.clone(),
        );

        let work = async move { Ok::<R, UseError>(body(child).await) };
        match drive(guard, parts.cancel_rx, None, conflicts, work).await {
            Ok(Driven::Completed(value)) => Ok(value),
            Ok(Driven::Cancelled(cause)) => Err(UseError::Cancelled(cause)),
            Err(error) => Err(error),
        }
    }

    /// Cancel every outstanding execution, await their termination, and
    /// clear the holder table. Closes the system gate first so no new
    /// work is admitted while draining.
    pub async fn shutdown(&self) {
        self.set_system_enabled(false);
        let outstanding: Vec<ExecutionHandle> = {
            let inner = self.lock_inner();
            let mut seen: Vec<ExecutionHandle> = Vec::new();
            for handle in inner.holders.values() {
                if !seen.iter().any(|h| h.id() == handle.id()) {
                    seen.push(handle.clone());
                }
            }
            seen
        };
        for handle in &outstanding {
            handle.cancel(CancelCause::Shutdown);
        }
        for handle in &outstanding {
            handle.terminated().await;
        }
        self.lock_inner().holders.clear();
        tracing::info!("coordinator shut down");
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn new_execution(
        &self,
        label: String,
        kind: ExecKind,
        cancellable: bool,
    ) -> ExecutionParts {
        execution::new_execution(self.shared.ids.next(), label, kind, cancellable)
    }

    pub(crate) fn install(
        &self,
        name: String,
        idle_action: Option<IdleAction>,
        reset: Option<ResetHook>,
    ) -> Result<Arc<Subsystem>, RegistryError> {
        let subsystem = Arc::new(Subsystem::create(
            name.clone(),
            idle_action,
            reset,
            self.downgrade(),
        ));
        {
            let mut inner = self.lock_inner();
            if inner.subsystems.contains_key(&name) {
                return Err(RegistryError::DuplicateSubsystem(name));
            }
            inner.subsystems.insert(name.clone(), Arc::clone(&subsystem));
        }
        self.shared
            .telemetry
            .publish_bool(&enabled_path(&name), false);
        Ok(subsystem)
    }

    /// Install `requester` as holder of every subsystem in `needed` and
    /// cancel the conflicting prior holders, returning them deduplicated.
    ///
    /// Rejected without touching the holder table when the gate is closed
    /// or a conflicting holder is non-cancellable.
    pub(crate) fn acquire(
        &self,
        requester: &ExecutionHandle,
        needed: &[Arc<Subsystem>],
    ) -> Result<Vec<ExecutionHandle>, AcquireError> {
        if !self.is_system_enabled() {
            return Err(AcquireError::SystemDisabled);
        }
        let conflicts = {
            let mut inner = self.lock_inner();
            let mut conflicts: Vec<ExecutionHandle> = Vec::new();
            for subsystem in needed {
                if let Some(holder) = inner.holders.get(subsystem.name()) {
                    if holder.id() == requester.id() {
                        continue;
                    }
                    if !holder.is_cancellable() {
                        return Err(AcquireError::HeldByNonCancellable {
                            subsystem: subsystem.name().to_string(),
                            holder: holder.label().to_string(),
                        });
                    }
                    if !conflicts.iter().any(|c| c.id() == holder.id()) {
                        conflicts.push(holder.clone());
                    }
                }
            }
            for subsystem in needed {
                inner
                    .holders
                    .insert(subsystem.name().to_string(), requester.clone());
            }
            conflicts
        };
        for conflict in &conflicts {
            conflict.cancel(CancelCause::Conflict {
                command: requester.label().to_string(),
            });
        }
        Ok(conflicts)
    }

    /// Install `requester` only if every subsystem in `needed` is free
    pub(crate) fn try_acquire(
        &self,
        requester: &ExecutionHandle,
        needed: &[Arc<Subsystem>],
    ) -> Result<(), AcquireError> {
        if !self.is_system_enabled() {
            return Err(AcquireError::SystemDisabled);
        }
        let mut inner = self.lock_inner();
        for subsystem in needed {
            if let Some(holder) = inner.holders.get(subsystem.name()) {
                if holder.id() != requester.id() {
                    return Err(AcquireError::InUse {
                        subsystem: subsystem.name().to_string(),
                        holder: holder.label().to_string(),
                    });
                }
            }
        }
        for subsystem in needed {
            inner
                .holders
                .insert(subsystem.name().to_string(), requester.clone());
        }
        Ok(())
    }

    /// Release a finished execution's claims and publish its termination.
    ///
    /// Runs the reset hook for every subsystem in the claim set, then
    /// reschedules idle actions for claims left enabled and unclaimed.
    /// Idempotent per execution: entries are only removed when they still
    /// point at the finishing execution.
    pub(crate) fn finish_execution(
        &self,
        handle: &ExecutionHandle,
        claims: &[Arc<Subsystem>],
        outcome: Outcome,
        status_tx: &watch::Sender<ExecStatus>,
    ) {
        {
            let mut inner = self.lock_inner();
            for subsystem in claims {
                let held_by_us = inner
                    .holders
                    .get(subsystem.name())
                    .is_some_and(|h| h.id() == handle.id());
                if held_by_us {
                    inner.holders.remove(subsystem.name());
                }
            }
        }
        for subsystem in claims {
            subsystem.run_reset();
        }
        let _ = status_tx.send(ExecStatus::Finished(outcome));
        if handle.kind() != ExecKind::Idle && self.is_system_enabled() {
            for subsystem in claims {
                if subsystem.is_enabled() && subsystem.has_idle_action() {
                    self.schedule_idle(subsystem);
                }
            }
        }
    }

    /// Spawn the idle action for a subsystem if it is free.
    ///
    /// Claim-if-free only: an existing holder wins and the idle action is
    /// simply not started. Rescheduling happens on the next release.
    pub(crate) fn schedule_idle(&self, subsystem: &Arc<Subsystem>) {
        let Some(action) = subsystem.idle_action() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                subsystem = %subsystem.name(),
                "no async runtime available to run idle action"
            );
            return;
        };
        let parts = self.new_execution(
            format!("{}.idle", subsystem.name()),
            ExecKind::Idle,
            true,
        );
        if self
            .try_acquire(&parts.handle, std::slice::from_ref(subsystem))
            .is_err()
        {
            return;
        }
        let ExecutionParts {
            handle,
            cancel_rx,
            status_tx,
        } = parts;
        let ctx = RequirementContext::empty().child([subsystem.name().to_string()]);
        let guard = ReleaseGuard::new(
            self.clone(),
            handle,
            vec![Arc::clone(subsystem)],
            status_tx,
            cancel_rx.clone(),
        );
        let name = subsystem.name().to_string();
        let work = action(ctx);
        runtime.spawn(async move {
            match drive(guard, cancel_rx, None, Vec::new(), work).await {
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(subsystem = %name, error = %error, "idle action failed");
                }
            }
        });
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("Registry")
            .field("subsystems", &inner.subsystems.len())
            .field("holders", &inner.holders.len())
            .field("system_enabled", &self.is_system_enabled())
            .finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
