//! Connection status tracking.
//!
//! A [`StatusCell`] is written by exactly one component (the sensor bridge or
//! the device link) and read by anyone. Reads are lock-free snapshots;
//! state changes are also pushed to subscribers.

use arc_swap::ArcSwap;
use chrono::Utc;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use thermal_engine_types::{ConnectionState, ConnectionStatus, Fault};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal {name} transition {from} -> {to}")]
pub struct TransitionError {
    pub name: String,
    pub from: ConnectionState,
    pub to: ConnectionState,
}

pub struct StatusCell {
    name: String,
    current: ArcSwap<ConnectionStatus>,
    subscribers: Mutex<Vec<Sender<ConnectionStatus>>>,
}

impl StatusCell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: ArcSwap::from_pointee(ConnectionStatus::disconnected()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status snapshot
    pub fn status(&self) -> Arc<ConnectionStatus> {
        self.current.load_full()
    }

    pub fn state(&self) -> ConnectionState {
        self.current.load().state
    }

    /// Receive every status published after this call
    pub fn subscribe(&self) -> Receiver<ConnectionStatus> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Move to `next`. Re-entering the current state is a no-op; an illegal
    /// transition is rejected and leaves the status untouched.
    pub fn transition(&self, next: ConnectionState) -> Result<(), TransitionError> {
        self.apply(next, None)
    }

    /// Transition and record the fault that caused it
    pub fn fail(&self, next: ConnectionState, fault: Fault) -> Result<(), TransitionError> {
        log::warn!("{}: {}", self.name, fault);
        self.apply(next, Some(fault))
    }

    fn apply(&self, next: ConnectionState, fault: Option<Fault>) -> Result<(), TransitionError> {
        let current = self.current.load_full();
        if current.state == next {
            if fault.is_some() {
                // Same state, only the fault record changes; not a new event
                let mut status = (*current).clone();
                status.last_fault = fault;
                self.current.store(Arc::new(status));
            }
            return Ok(());
        }
        if !current.state.can_transition_to(next) {
            log::error!(
                "{}: rejected illegal transition {} -> {}",
                self.name,
                current.state,
                next
            );
            return Err(TransitionError {
                name: self.name.clone(),
                from: current.state,
                to: next,
            });
        }

        let mut status = (*current).clone();
        status.state = next;
        status.since = Utc::now();
        match next {
            ConnectionState::Connecting => status.attempts = status.attempts.saturating_add(1),
            ConnectionState::Connected => {
                status.attempts = 0;
                status.diagnostic = None;
            }
            _ => {}
        }
        if fault.is_some() {
            status.last_fault = fault;
        }
        log::info!("{}: {} -> {}", self.name, current.state, next);
        self.publish(status);
        Ok(())
    }

    /// Attach user-facing diagnostic detail (e.g. searched paths)
    pub fn set_diagnostic(&self, diagnostic: Option<String>) {
        let mut status = (*self.current.load_full()).clone();
        status.diagnostic = diagnostic;
        self.current.store(Arc::new(status));
    }

    fn publish(&self, status: ConnectionStatus) {
        self.current.store(Arc::new(status.clone()));
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(status.clone()).is_ok());
    }
}

impl std::fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCell")
            .field("name", &self.name)
            .field("status", &self.current.load())
            .finish()
    }
}
