//! Fire-and-forget diagnostics.
//!
//! The control path reports what happened through [`Diagnostics::report`]
//! and never waits on, or fails because of, the reporter.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::utils::connection::protocol::DecodeError;
use crate::utils::controllers::ActuatorFault;

/// Something worth telling an operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    DecodeFailed {
        peer: Option<SocketAddr>,
        error: DecodeError,
    },
    StaleDropped {
        sequence: u32,
        last_accepted: u32,
    },
    SourceChanged {
        from: Option<SocketAddr>,
        to: SocketAddr,
    },
    LinkLost {
        silent_for: Duration,
    },
    LinkRestored {
        outage: Duration,
    },
    ActuatorFault(ActuatorFault),
    ReceiveFailed {
        kind: std::io::ErrorKind,
        message: String,
    },
}

pub trait Diagnostics {
    fn report(
        &mut self,
        event: DiagnosticEvent,
    );
}

/// Reports events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(
        &mut self,
        event: DiagnosticEvent,
    ) {
        match event {
            DiagnosticEvent::DecodeFailed { peer, error } => {
                tracing::warn!(?peer, %error, "dropped datagram")
            }
            DiagnosticEvent::StaleDropped {
                sequence,
                last_accepted,
            } => tracing::debug!(sequence, last_accepted, "dropped stale command"),
            DiagnosticEvent::SourceChanged { from, to } => {
                tracing::info!(?from, %to, "command source changed")
            }
            DiagnosticEvent::LinkLost { silent_for } => {
                tracing::warn!(?silent_for, "link lost, motors stopped")
            }
            DiagnosticEvent::LinkRestored { outage } => {
                tracing::info!(?outage, "link restored")
            }
            DiagnosticEvent::ActuatorFault(fault) => tracing::error!(%fault, "actuator fault"),
            DiagnosticEvent::ReceiveFailed { kind, message } => {
                tracing::warn!(?kind, %message, "receive failed")
            }
        }
    }
}

/// Keeps every reported event; clones share one list.
#[derive(Debug, Clone, Default)]
pub struct RecordingDiagnostics {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn report(
        &mut self,
        event: DiagnosticEvent,
    ) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
