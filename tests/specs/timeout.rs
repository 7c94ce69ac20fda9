//! Timeout-armed invocations.

use crate::prelude::*;
use helm_core::{
    CancelCause, Command, InvokeOptions, Outcome, Registry, RequirementContext, Subsystem,
};
use std::future::pending;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn overrunning_body_is_cancelled_with_timeout_cause() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();
    let events = Events::new();

    let command = {
        let events = events.clone();
        Command::builder("slow", &registry)
            .requires(&drive)
            .body(move |_ctx| {
                let events = events.clone();
                async move {
                    let _winddown = on_drop(&events, "slow-dropped");
                    events.push("slow-started");
                    pending::<()>().await;
                    done()
                }
            })
    };

    let timeout = Duration::from_millis(100);
    let outcome = command
        .invoke_with(
            &RequirementContext::empty(),
            InvokeOptions::default().with_timeout(timeout),
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Cancelled(CancelCause::Timeout(timeout)));
    assert_eq!(events.items(), vec!["slow-started", "slow-dropped"]);
    assert_eq!(registry.holder_of(&drive), None);
}

#[tokio::test(start_paused = true)]
async fn body_finishing_in_time_is_unaffected() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();

    let command = Command::builder("quick", &registry)
        .requires(&drive)
        .body(|_ctx| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            done()
        });

    let outcome = command
        .invoke_with(
            &RequirementContext::empty(),
            InvokeOptions::default().with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn timeout_on_detached_invocation_still_fires() {
    let registry = Registry::new();
    let drive = Subsystem::builder("Drive").register(&registry).unwrap();
    let events = Events::new();

    let command = {
        let events = events.clone();
        Command::builder("slow", &registry)
            .requires(&drive)
            .body(move |_ctx| {
                let events = events.clone();
                async move {
                    let _winddown = on_drop(&events, "slow-dropped");
                    events.push("slow-started");
                    pending::<()>().await;
                    done()
                }
            })
    };

    command
        .invoke_with(
            &RequirementContext::empty(),
            InvokeOptions::default()
                .with_timeout(Duration::from_millis(50))
                .detached(),
        )
        .await
        .unwrap();

    events.wait_for("slow-dropped").await;
    command.join().await;
    assert_eq!(registry.holder_of(&drive), None);
}
