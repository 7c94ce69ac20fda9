// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Commands: named cancellable units of work over declared subsystems
//!
//! A command fixes its required subsystem set, cancellable flag, and body
//! at construction and may be invoked any number of times. Each invocation
//! subtracts the caller's requirement context from the declared set,
//! acquires the remainder, spawns a fresh execution, and releases its
//! claims on every exit path.

use crate::context::RequirementContext;
use crate::error::BodyError;
use crate::execution::{
    drive, BodyFuture, CancelCause, Driven, ExecKind, ExecutionHandle, Outcome, ReleaseGuard,
};
use crate::registry::Registry;
use crate::subsystem::Subsystem;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

type CommandBody = Arc<dyn Fn(RequirementContext) -> BodyFuture + Send + Sync>;
type RunningSlot = Arc<Mutex<Option<ExecutionHandle>>>;

/// Options for a single invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeOptions {
    /// Cancel the execution with a timeout cause if it runs this long
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Block until the execution finishes. Defaults to true.
    #[serde(default = "default_join")]
    pub join: bool,
}

fn default_join() -> bool {
    true
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            join: true,
        }
    }
}

impl InvokeOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return as soon as the execution is scheduled
    pub fn detached(mut self) -> Self {
        self.join = false;
        self
    }
}

/// A named, cancellable unit of work declaring its required subsystems.
///
/// Construct with [`Command::builder`]; invoke with [`Command::invoke`] or
/// fire-and-forget with [`Command::launch`].
pub struct Command {
    name: String,
    registry: Registry,
    requirements: Vec<Arc<Subsystem>>,
    cancellable: bool,
    body: CommandBody,
    running: RunningSlot,
}

impl Command {
    pub fn builder(name: impl Into<String>, registry: &Registry) -> CommandBuilder {
        CommandBuilder {
            name: name.into(),
            registry: registry.clone(),
            requirements: Vec::new(),
            cancellable: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with default options: joined, no timeout
    pub async fn invoke(&self, ctx: &RequirementContext) -> Result<Outcome, BodyError> {
        self.invoke_with(ctx, InvokeOptions::default()).await
    }

    /// Run the command under the given requirement context.
    ///
    /// Gate and acquisition failures are absorbed: the invocation is
    /// logged and resolves to [`Outcome::Skipped`] or
    /// [`Outcome::Rejected`] without running the body. A body error is
    /// returned only after the command's claims have been released.
    pub async fn invoke_with(
        &self,
        ctx: &RequirementContext,
        options: InvokeOptions,
    ) -> Result<Outcome, BodyError> {
        if !self.registry.is_system_enabled() {
            tracing::warn!(command = %self.name, "system disabled; invocation skipped");
            return Ok(Outcome::Skipped);
        }

        let needed: Vec<Arc<Subsystem>> = self
            .requirements
            .iter()
            .filter(|subsystem| !ctx.holds(subsystem.name()))
            .cloned()
            .collect();
        let child_ctx = ctx.child(needed.iter().map(|s| s.name().to_string()));

        // Acquisition and handle installation are serialized per command so
        // concurrent invocations of the same command cannot interleave
        // between acquiring and publishing their handle.
        let spawned = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            let parts = self
                .registry
                .new_execution(self.name.clone(), ExecKind::Command, self.cancellable);
            let conflicts = match self.registry.acquire(&parts.handle, &needed) {
                Ok(conflicts) => conflicts,
                Err(error) => {
                    tracing::warn!(
                        command = %self.name,
                        error = %error,
                        "failed to acquire requirements"
                    );
                    return Ok(Outcome::Rejected);
                }
            };
            let guard = ReleaseGuard::new(
                self.registry.clone(),
                parts.handle.clone(),
                needed,
                parts.status_tx,
                parts.cancel_rx.clone(),
            );
            let work = (self.body)(child_ctx);
            let invocation = run_invocation(
                guard,
                parts.cancel_rx,
                options.timeout,
                conflicts,
                work,
                Arc::clone(&self.running),
                !options.join,
            );
            let spawned = tokio::spawn(invocation);
            *running = Some(parts.handle.clone());
            spawned
        };

        if !options.join {
            return Ok(Outcome::Detached);
        }

        match spawned.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                Err(format!("command {} panicked", self.name).into())
            }
            Err(_) => Ok(Outcome::Cancelled(CancelCause::Shutdown)),
        }
    }

    /// Schedule a detached invocation with an empty ambient context
    pub fn launch(self: &Arc<Self>, timeout: Option<Duration>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(command = %self.name, "no async runtime available to launch");
            return;
        };
        let command = Arc::clone(self);
        runtime.spawn(async move {
            let ctx = RequirementContext::empty();
            let options = InvokeOptions {
                timeout,
                join: false,
            };
            let _ = command.invoke_with(&ctx, options).await;
        });
    }

    /// Request cancellation of the running execution, if any
    pub fn cancel(&self, reason: Option<String>) {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handle) = handle {
            handle.cancel(CancelCause::Cancelled { reason });
        }
    }

    /// Wait for the running execution to finish; no-op if none
    pub async fn join(&self) {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handle) = handle {
            handle.terminated().await;
        }
    }

    /// Whether an execution is currently running
    pub fn is_active(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let requirements: Vec<&str> = self.requirements.iter().map(|s| s.name()).collect();
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("requirements", &requirements)
            .field("cancellable", &self.cancellable)
            .finish()
    }
}

async fn run_invocation(
    guard: ReleaseGuard,
    cancel_rx: watch::Receiver<Option<CancelCause>>,
    timeout: Option<Duration>,
    conflicts: Vec<ExecutionHandle>,
    work: BodyFuture,
    running: RunningSlot,
    report_errors: bool,
) -> Result<Outcome, BodyError> {
    let label = guard.label().to_string();
    let id = guard.id();
    let result = drive(guard, cancel_rx, timeout, conflicts, work).await;
    {
        let mut slot = running.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|handle| handle.id() == id) {
            *slot = None;
        }
    }
    match result {
        Ok(Driven::Completed(())) => Ok(Outcome::Completed),
        Ok(Driven::Cancelled(cause)) => Ok(Outcome::Cancelled(cause)),
        Err(error) => {
            if report_errors {
                tracing::error!(command = %label, error = %error, "command body failed");
            }
            Err(error)
        }
    }
}

/// Builder for [`Command`]
pub struct CommandBuilder {
    name: String,
    registry: Registry,
    requirements: Vec<Arc<Subsystem>>,
    cancellable: bool,
}

impl CommandBuilder {
    /// Add a required subsystem; duplicates are ignored
    pub fn requires(mut self, subsystem: &Arc<Subsystem>) -> Self {
        if !self
            .requirements
            .iter()
            .any(|s| s.name() == subsystem.name())
        {
            self.requirements.push(Arc::clone(subsystem));
        }
        self
    }

    /// Refuse cancellation by competing acquirers. Conflicting
    /// acquisitions are rejected instead; external cancellation, timeout,
    /// disable, and shutdown still apply.
    pub fn not_cancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }

    /// Finish the builder with the command body
    pub fn body<F, Fut>(self, body: F) -> Arc<Command>
    where
        F: Fn(RequirementContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
    {
        Arc::new(Command {
            name: self.name,
            registry: self.registry,
            requirements: self.requirements,
            cancellable: self.cancellable,
            body: Arc::new(move |ctx| -> BodyFuture { Box::pin(body(ctx)) }),
            running: Arc::new(Mutex::new(None)),
        })
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
