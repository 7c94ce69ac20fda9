// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! helm-core: cooperative subsystem coordination for robot programs
//!
//! This crate provides:
//! - Exclusive-access subsystems with enable/disable lifecycle and idle actions
//! - Cancellable commands that declare the subsystems they require
//! - A registry that arbitrates conflicting claims by cancelling prior holders
//! - Re-entrant acquisition through explicitly threaded requirement contexts

pub mod command;
pub mod context;
pub mod error;
pub mod execution;
pub mod registry;
pub mod subsystem;
pub mod telemetry;

pub use command::{Command, CommandBuilder, InvokeOptions};
pub use context::RequirementContext;
pub use error::{BodyError, RegistryError, UseError};
pub use execution::{CancelCause, ExecutionId, Outcome};
pub use registry::{Registry, UseOptions};
pub use subsystem::{Subsystem, SubsystemBuilder};
pub use telemetry::{NoOpTelemetry, RecordingTelemetry, TelemetrySink};
