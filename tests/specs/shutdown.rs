//! Coordinator teardown.

use crate::prelude::*;
use helm_core::{Command, InvokeOptions, Outcome, Registry, RequirementContext, Subsystem};
use std::future::pending;

#[tokio::test]
async fn shutdown_cancels_and_awaits_all_outstanding_executions() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();
    let arm = Subsystem::builder("Arm").register(&registry).unwrap();
    let events = Events::new();
    let ctx = RequirementContext::empty();

    let patrol = {
        let events = events.clone();
        Command::builder("patrol", &registry)
            .requires(&drive)
            .body(move |_ctx| {
                let events = events.clone();
                async move {
                    let _winddown = on_drop(&events, "patrol-dropped");
                    events.push("patrol-started");
                    pending::<()>().await;
                    done()
                }
            })
    };
    let hold = {
        let events = events.clone();
        Command::builder("hold", &registry)
            .requires(&arm)
            .body(move |_ctx| {
                let events = events.clone();
                async move {
                    let _winddown = on_drop(&events, "hold-dropped");
                    events.push("hold-started");
                    pending::<()>().await;
                    done()
                }
            })
    };

    patrol
        .invoke_with(&ctx, InvokeOptions::default().detached())
        .await
        .unwrap();
    hold.invoke_with(&ctx, InvokeOptions::default().detached())
        .await
        .unwrap();
    events.wait_for("patrol-started").await;
    events.wait_for("hold-started").await;

    registry.shutdown().await;

    assert_eq!(events.count("patrol-dropped"), 1);
    assert_eq!(events.count("hold-dropped"), 1);
    assert_eq!(registry.holder_of(&drive), None);
    assert_eq!(registry.holder_of(&arm), None);
    assert!(!patrol.is_active());
    assert!(!hold.is_active());
}

#[tokio::test]
async fn shutdown_gates_subsequent_invocations() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();
    let events = Events::new();

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

    registry.shutdown().await;

    let outcome = command.invoke(&RequirementContext::empty()).await.unwrap();
    assert_eq!(outcome, Outcome::Skipped);
    assert_eq!(events.count("ran"), 0);
}

#[tokio::test]
async fn shutdown_does_not_reschedule_idle_actions() {
    let registry = Registry::new();
    let events = Events::new();
    let events_idle = events.clone();
    let drive = Subsystem::builder("Drive")
        .with_idle_action(move |_ctx| {
            let events = events_idle.clone();
            async move {
                let _winddown = on_drop(&events, "idle-dropped");
                events.push("idle-started");
                pending::<()>().await;
                Ok(())
            }
        })
        .register(&registry)
        .unwrap();
    drive.enable();
    events.wait_for("idle-started").await;

    registry.shutdown().await;
    settle().await;

    assert_eq!(events.count("idle-started"), 1);
    assert_eq!(events.count("idle-dropped"), 1);
    assert_eq!(registry.holder_of(&drive), None);
}
