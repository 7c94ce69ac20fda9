// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution handles, cancellation causes, and guaranteed release
//!
//! Every spawned run of a command body, idle action, or ad-hoc exclusive
//! block is an execution. The handle is the shared face other code uses to
//! cancel it and await its termination; the release guard makes sure the
//! registry is notified on every exit path, including cancellation and
//! panic unwind.

use crate::error::BodyError;
use crate::registry::Registry;
use crate::subsystem::Subsystem;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Boxed future type for command bodies and idle actions.
pub(crate) type BodyFuture = Pin<Box<dyn Future<Output = Result<(), BodyError>> + Send>>;

/// Process-unique identifier for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionId(u64);

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

/// Sequential id source, one per registry
#[derive(Debug, Default)]
pub(crate) struct ExecutionIds(AtomicU64);

impl ExecutionIds {
    pub(crate) fn next(&self) -> ExecutionId {
        ExecutionId(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// What kind of work an execution is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecKind {
    Command,
    Idle,
    Adhoc,
}

/// Why an execution was cancelled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelCause {
    #[error("cancelled ({})", reason.as_deref().unwrap_or("no reason given"))]
    Cancelled { reason: Option<String> },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("superseded by {command}")]
    Conflict { command: String },
    #[error("subsystem {subsystem} disabled")]
    SubsystemDisabled { subsystem: String },
    #[error("coordinator shutting down")]
    Shutdown,
}

/// Terminal result of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Body ran to completion
    Completed,
    /// Invocation skipped because the system gate is disabled
    Skipped,
    /// Acquisition was refused; body never ran
    Rejected,
    /// Invocation was scheduled without joining
    Detached,
    /// Execution was cancelled before the body finished
    Cancelled(CancelCause),
    /// Body returned an error
    Failed,
}

/// Observable state of an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExecStatus {
    Running,
    Finished(Outcome),
}

struct HandleInner {
    id: ExecutionId,
    label: String,
    kind: ExecKind,
    cancellable: bool,
    cancel_tx: watch::Sender<Option<CancelCause>>,
    status_rx: watch::Receiver<ExecStatus>,
}

/// Shared, clonable handle to one execution.
///
/// Held by the registry's holder table and by anything waiting on the
/// execution: conflict awaiters, `join` callers, and shutdown.
#[derive(Clone)]
pub(crate) struct ExecutionHandle {
    inner: Arc<HandleInner>,
}

impl ExecutionHandle {
    pub(crate) fn id(&self) -> ExecutionId {
        self.inner.id
    }

    pub(crate) fn label(&self) -> &str {
        &self.inner.label
    }

    pub(crate) fn kind(&self) -> ExecKind {
        self.inner.kind
    }

    pub(crate) fn is_cancellable(&self) -> bool {
        self.inner.cancellable
    }

    /// Request cancellation. The first cause wins; later requests are
    /// ignored. Returns whether this call delivered the cause.
    pub(crate) fn cancel(&self, cause: CancelCause) -> bool {
        self.inner.cancel_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(cause);
                true
            } else {
                false
            }
        })
    }

    /// Wait until the execution has fully terminated, release included.
    pub(crate) async fn terminated(&self) -> Outcome {
        let mut status_rx = self.inner.status_rx.clone();
        let result = status_rx
            .wait_for(|status| matches!(status, ExecStatus::Finished(_)))
            .await;
        match result {
            Ok(status) => match &*status {
                ExecStatus::Finished(outcome) => outcome.clone(),
                ExecStatus::Running => Outcome::Failed,
            },
            Err(_) => Outcome::Failed,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        matches!(&*self.inner.status_rx.borrow(), ExecStatus::Finished(_))
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

/// Channels backing a freshly created execution
pub(crate) struct ExecutionParts {
    pub(crate) handle: ExecutionHandle,
    pub(crate) cancel_rx: watch::Receiver<Option<CancelCause>>,
    pub(crate) status_tx: watch::Sender<ExecStatus>,
}

pub(crate) fn new_execution(
    id: ExecutionId,
    label: String,
    kind: ExecKind,
    cancellable: bool,
) -> ExecutionParts {
    let (cancel_tx, cancel_rx) = watch::channel(None);
    let (status_tx, status_rx) = watch::channel(ExecStatus::Running);
    let handle = ExecutionHandle {
        inner: Arc::new(HandleInner {
            id,
            label,
            kind,
            cancellable,
            cancel_tx,
            status_rx,
        }),
    };
    ExecutionParts {
        handle,
        cancel_rx,
        status_tx,
    }
}

/// Resolves once a cancellation cause has been delivered
pub(crate) async fn cancelled(rx: &mut watch::Receiver<Option<CancelCause>>) -> CancelCause {
    loop {
        let closed = match rx.wait_for(|cause| cause.is_some()).await {
            Ok(cause) => {
                if let Some(cause) = cause.as_ref() {
                    return cause.clone();
                }
                false
            }
            Err(_) => true,
        };
        // Drop the watch guard (non-`Send`) before awaiting so the enclosing
        // future stays `Send` for `tokio::spawn`.
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Notifies the registry of completion on every exit path.
///
/// The guard is created before the execution future is spawned, so release
/// runs even if the future is dropped without ever being polled. `finish`
/// records the deliberate outcome; a bare drop falls back to the last
/// cancellation cause seen on the channel.
pub(crate) struct ReleaseGuard {
    registry: Registry,
    handle: ExecutionHandle,
    claims: Vec<Arc<Subsystem>>,
    status_tx: watch::Sender<ExecStatus>,
    cancel_rx: watch::Receiver<Option<CancelCause>>,
    outcome: Option<Outcome>,
}

impl ReleaseGuard {
    pub(crate) fn new(
        registry: Registry,
        handle: ExecutionHandle,
        claims: Vec<Arc<Subsystem>>,
        status_tx: watch::Sender<ExecStatus>,
        cancel_rx: watch::Receiver<Option<CancelCause>>,
    ) -> Self {
        Self {
            registry,
            handle,
            claims,
            status_tx,
            cancel_rx,
            outcome: None,
        }
    }

    pub(crate) fn label(&self) -> &str {
        self.handle.label()
    }

    pub(crate) fn id(&self) -> ExecutionId {
        self.handle.id()
    }

    pub(crate) fn finish(mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            match self.cancel_rx.borrow().as_ref().cloned() {
                Some(cause) => Outcome::Cancelled(cause),
                None => Outcome::Failed,
            }
        });
        self.registry
            .finish_execution(&self.handle, &self.claims, outcome, &self.status_tx);
    }
}

/// How a driven execution ended, body errors aside
pub(crate) enum Driven<T> {
    Completed(T),
    Cancelled(CancelCause),
}

enum Exit<T, E> {
    Done(Result<T, E>),
    Cancelled(CancelCause),
}

/// Run one execution to completion under cancellation and timeout.
///
/// Awaits the termination of every conflicting prior holder, then runs the
/// work future, racing both against the cancellation channel and the
/// optional timeout. The losing work future is dropped before the guard
/// publishes termination, so waiters observe the body fully wound down.
pub(crate) async fn drive<T, E>(
    guard: ReleaseGuard,
    mut cancel_rx: watch::Receiver<Option<CancelCause>>,
    timeout: Option<Duration>,
    conflicts: Vec<ExecutionHandle>,
    work: impl Future<Output = Result<T, E>>,
) -> Result<Driven<T>, E> {
    let label = guard.label().to_string();
    let mut work = Box::pin(async move {
        if !conflicts.is_empty() {
            tracing::info!(
                execution = %label,
                conflicts = conflicts.len(),
                "waiting for conflicting holders to terminate"
            );
            for conflict in &conflicts {
                conflict.terminated().await;
            }
        }
        tracing::info!(execution = %label, "starting execution");
        work.await
    });

    let timed_out = async {
        match timeout {
            Some(duration) => {
                tokio::time::sleep(duration).await;
                CancelCause::Timeout(duration)
            }
            None => std::future::pending().await,
        }
    };

    let exit = tokio::select! {
        result = &mut work => Exit::Done(result),
        cause = cancelled(&mut cancel_rx) => Exit::Cancelled(cause),
        cause = timed_out => Exit::Cancelled(cause),
    };

    match exit {
        Exit::Done(Ok(value)) => {
            drop(work);
            guard.finish(Outcome::Completed);
            Ok(Driven::Completed(value))
        }
        Exit::Done(Err(error)) => {
            drop(work);
            guard.finish(Outcome::Failed);
            Err(error)
        }
        Exit::Cancelled(cause) => {
            drop(work);
            guard.finish(Outcome::Cancelled(cause.clone()));
            Ok(Driven::Cancelled(cause))
        }
    }
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
