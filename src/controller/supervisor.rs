//! # Task Supervisor
//!
//! Owns the lifecycle of the named control loops. Every name has its own
//! slot guarded by an async mutex, so start/stop calls for the same loop are
//! serialised while different loops never wait on each other.
//!
//! `stop` raises the loop's cancellation token and waits for the task to
//! return, which includes the loop's fail-safe command. Nothing started here
//! outlives a `stop` call.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{ControlError, ControlLoop, LoopName, LoopParams};

/// A started loop: its stop signal, parameter snapshot and task
#[derive(Debug)]
pub struct LoopHandle {
    name: LoopName,
    cancel: CancellationToken,
    params: LoopParams,
    task: JoinHandle<Result<(), ControlError>>,
}

impl LoopHandle {
    pub fn name(&self) -> LoopName {
        self.name
    }

    pub fn params(&self) -> &LoopParams {
        &self.params
    }

    /// False once the loop returned on its own (fatal error or panic)
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the loop and wait for it to exit. The handle keeps owning the
    /// task while waiting, so a dropped call leaves it in place and the next
    /// call resumes the wait.
    async fn shutdown(&mut self) {
        let name = self.name;
        info!(loop_name = %name, "stopping loop");
        self.cancel.cancel();
        match (&mut self.task).await {
            Ok(Ok(())) => info!(loop_name = %name, "loop stopped"),
            Ok(Err(e)) => error!(loop_name = %name, error = %e, "loop exited with error"),
            Err(e) => error!(loop_name = %name, error = %e, "loop task panicked"),
        }
    }
}

/// Reported state of one named loop
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub name: LoopName,
    pub running: bool,
    pub params: Option<LoopParams>,
}

type Slot = Arc<tokio::sync::Mutex<Option<LoopHandle>>>;

/// At most one running instance per loop name
#[derive(Debug, Default)]
pub struct TaskSupervisor {
    slots: Mutex<HashMap<LoopName, Slot>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: LoopName) -> Slot {
        self.slots.lock().entry(name).or_default().clone()
    }

    /// Start `control`, replacing (stop, then start) any instance already
    /// registered under the same name.
    pub async fn start(&self, control: Box<dyn ControlLoop>) {
        let name = control.name();
        let slot = self.slot(name);
        let mut current = slot.lock().await;

        if let Some(previous) = current.as_mut() {
            info!(loop_name = %name, "loop is already running, stopping and relaunching");
            previous.shutdown().await;
        }

        let params = control.params();
        info!(loop_name = %name, ?params, "starting loop");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(control.run(cancel.clone()));
        *current = Some(LoopHandle {
            name,
            cancel,
            params,
            task,
        });
    }

    /// Stop the loop and wait until it has exited. Returns whether there was
    /// anything to stop. The slot is cleared only once the task has joined.
    pub async fn stop(&self, name: LoopName) -> bool {
        let slot = self.slot(name);
        let mut current = slot.lock().await;
        let Some(handle) = current.as_mut() else {
            debug!(loop_name = %name, "loop is not running");
            return false;
        };
        handle.shutdown().await;
        *current = None;
        true
    }

    /// Stop every loop concurrently
    pub async fn stop_all(&self) {
        join_all(LoopName::iter().map(|name| self.stop(name))).await;
    }

    pub async fn is_running(&self, name: LoopName) -> bool {
        let slot = self.slot(name);
        let current = slot.lock().await;
        current.as_ref().is_some_and(LoopHandle::is_running)
    }

    pub async fn status(&self, name: LoopName) -> LoopStatus {
        let slot = self.slot(name);
        let current = slot.lock().await;
        LoopStatus {
            name,
            running: current.as_ref().is_some_and(LoopHandle::is_running),
            params: current.as_ref().map(|h| h.params().clone()),
        }
    }

    pub async fn statuses(&self) -> Vec<LoopStatus> {
        join_all(LoopName::iter().map(|name| self.status(name))).await
    }
}
