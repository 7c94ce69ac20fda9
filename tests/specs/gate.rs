//! The system-wide gate.

use crate::prelude::*;
use helm_core::{
    Command, InvokeOptions, Outcome, Registry, RequirementContext, Subsystem, UseError, UseOptions,
};
use std::future::pending;

#[tokio::test]
async fn disabled_gate_skips_invocations_until_reenabled() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();
    let events = Events::new();
    let ctx = RequirementContext::empty();

    let command = {
        let events = events.clone();
        Command::builder("score", &registry)
            .requires(&drive)
            .body(move |_ctx| {
                let events = events.clone();
                async move {
                    events.push("ran");
                    done()
                }
            })
    };

    registry.set_system_enabled(false);

    let outcome = command.invoke(&ctx).await.unwrap();
    assert_eq!(outcome, Outcome::Skipped);
    assert_eq!(events.count("ran"), 0);
    assert_eq!(registry.holder_of(&drive), None);

    registry.set_system_enabled(true);

    let outcome = command.invoke(&ctx).await.unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(events.count("ran"), 1);
}

#[tokio::test]
async fn disabled_gate_rejects_exclusive_blocks() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();
    registry.set_system_enabled(false);

    let result = registry
        .use_exclusive(
            &RequirementContext::empty(),
            &[&drive],
            UseOptions::default(),
            |_ctx| async move { "never runs" },
        )
        .await;

    assert!(matches!(result, Err(UseError::SystemDisabled)));
}

#[tokio::test]
async fn closing_the_gate_leaves_running_executions_alone() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();
    let events = Events::new();
    let ctx = RequirementContext::empty();

    let command = {
        let events = events.clone();
        Command::builder("patrol", &registry)
            .requires(&drive)
            .body(move |_ctx| {
                let events = events.clone();
                async move {
                    events.push("patrol-started");
                    pending::<()>().await;
                    done()
                }
            })
    };

    command
        .invoke_with(&ctx, InvokeOptions::default().detached())
        .await
        .unwrap();
    events.wait_for("patrol-started").await;

    registry.set_system_enabled(false);
    settle().await;

    assert!(command.is_active());
    assert_eq!(registry.holder_of(&drive), Some("patrol".to_string()));

    command.cancel(None);
    command.join().await;
}
