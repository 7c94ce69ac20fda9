//! Shared helpers for behavioral specs.

use helm_core::BodyError;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Ordered event log with async waiting, shared between test bodies and
/// the assertions observing them.
#[derive(Clone)]
pub struct Events {
    inner: Arc<EventsInner>,
}

struct EventsInner {
    items: Mutex<Vec<String>>,
    version: watch::Sender<u64>,
}

impl Events {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(EventsInner {
                items: Mutex::new(Vec::new()),
                version,
            }),
        }
    }

    pub fn push(&self, label: impl Into<String>) {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(label.into());
        self.inner.version.send_modify(|v| *v += 1);
    }

    pub fn items(&self) -> Vec<String> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.items().iter().filter(|item| *item == label).count()
    }

    /// Wait until the log contains at least `count` occurrences of `label`
    pub async fn wait_for_count(&self, label: &str, count: usize) {
        let mut rx = self.inner.version.subscribe();
        loop {
            if self.count(label) >= count {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until the log contains `label`
    pub async fn wait_for(&self, label: &str) {
        self.wait_for_count(label, 1).await;
    }
}

/// Pushes its label when dropped; used inside bodies to observe the exact
/// point where a cancelled body is wound down.
pub struct OnDrop {
    events: Events,
    label: String,
}

impl Drop for OnDrop {
    fn drop(&mut self) {
        self.events.push(self.label.clone());
    }
}

pub fn on_drop(events: &Events, label: &str) -> OnDrop {
    OnDrop {
        events: events.clone(),
        label: label.to_string(),
    }
}

/// Let spawned executions make progress before asserting on quiescence
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Body result helper so closures do not need turbofish annotations
pub fn done() -> Result<(), BodyError> {
    Ok(())
}
