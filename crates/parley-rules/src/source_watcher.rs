//! Background polling of the rule source for hot reload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::rule_engine::RuleEngine;

/// Handle for a running rule-source watcher task.
#[derive(Debug)]
pub struct RuleSourceWatcherHandle {
    source_path: Option<PathBuf>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RuleSourceWatcherHandle {
    fn disabled() -> Self {
        Self {
            source_path: None,
            shutdown_tx: None,
            task: None,
        }
    }

    fn running(
        source_path: PathBuf,
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            source_path: Some(source_path),
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn source_path(&self) -> Option<&std::path::Path> {
        self.source_path.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Polls the engine's rule source every `interval` and reloads on change.
///
/// Engines without a source path get a disabled handle. Ticks are skipped
/// while the published rule source has `hot_reload` turned off.
pub fn start_rule_source_watcher(
    engine: Arc<RuleEngine>,
    interval: Duration,
) -> Result<RuleSourceWatcherHandle> {
    if interval.is_zero() {
        anyhow::bail!("rule source watcher interval must be greater than zero");
    }
    let Some(source_path) = engine.source_path().map(|path| path.to_path_buf()) else {
        return Ok(RuleSourceWatcherHandle::disabled());
    };

    let handle = tokio::runtime::Handle::try_current()
        .context("rule source watcher requires an active Tokio runtime")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = handle.spawn(async move {
        run_rule_source_watcher_loop(engine, interval, shutdown_rx).await;
    });
    Ok(RuleSourceWatcherHandle::running(
        source_path,
        shutdown_tx,
        task,
    ))
}

async fn run_rule_source_watcher_loop(
    engine: Arc<RuleEngine>,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if engine.hot_reload_enabled() {
                    engine.reload_if_changed();
                }
            }
            _ = &mut shutdown_rx => {
                debug!(reason_code = "rule_source_watcher_stopped", "rule source watcher stopped");
                break;
            }
        }
    }
}
