//! UDP receiver loop.
//!
//! [`UdpReceiver`] owns the socket; [`ControlLoop`] owns everything that
//! reacts to what arrives on it (codec, watchdog, motion mapper). The split
//! keeps the control logic testable with synthetic instants and lets the
//! binary bind the socket before any actuator is touched.
//!
//! The loop is single-threaded: every receive is bounded by the time left
//! on the watchdog, so link loss is detected even when nothing arrives.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::utils::{
    config::ControllerConfig,
    connection::protocol::{Codec, Command, MAX_DATAGRAM_LEN},
    controllers::{ActuatorDriver, ActuatorFault, MotionMapper},
    diagnostics::{DiagnosticEvent, Diagnostics},
    safety::watchdog::{LinkStatus, LinkWatchdog, Transition},
};

/// Shortest socket wait, so a zero budget never turns into a blocking read.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// The socket could not be set up. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure UDP socket: {0}")]
    Configure(#[source] io::Error),
}

/// Optional stale/duplicate rejection by sequence number.
#[derive(Debug, Clone, Copy, Default)]
struct SequenceGate {
    strict: bool,
    last: Option<u32>,
}

impl SequenceGate {
    /// `Err(last)` if `sequence` is not newer than the last accepted one.
    fn admit(
        &mut self,
        sequence: Option<u32>,
        link: LinkStatus,
    ) -> Result<(), u32> {
        let Some(sequence) = sequence else {
            return Ok(());
        };
        if self.strict && link == LinkStatus::Live {
            if let Some(last) = self.last {
                // Serial-number comparison: wrap-around counts as newer.
                if (sequence.wrapping_sub(last) as i32) <= 0 {
                    return Err(last);
                }
            }
        }
        self.last = Some(sequence);
        Ok(())
    }
}

/// Everything that reacts to datagrams and to the passage of time.
pub struct ControlLoop<D: ActuatorDriver, R: Diagnostics> {
    codec: Codec,
    watchdog: LinkWatchdog,
    mapper: MotionMapper<D>,
    diagnostics: R,
    sequence: SequenceGate,
    peer: Option<SocketAddr>,
    last_command: Option<Command>,
}

impl<D: ActuatorDriver, R: Diagnostics> ControlLoop<D, R> {
    /// The watchdog starts `Live` at `now`.
    pub fn new(
        config: &ControllerConfig,
        mapper: MotionMapper<D>,
        diagnostics: R,
        now: Instant,
    ) -> Self {
        Self {
            codec: config.codec(),
            watchdog: LinkWatchdog::new(config.failsafe_timeout, now),
            mapper,
            diagnostics,
            sequence: SequenceGate {
                strict: config.reject_stale,
                last: None,
            },
            peer: None,
            last_command: None,
        }
    }

    /// Handle one datagram payload.
    ///
    /// Malformed and stale payloads are reported and dropped without
    /// feeding the watchdog. Only an actuator fault is returned.
    pub fn on_datagram(
        &mut self,
        payload: &[u8],
        peer: Option<SocketAddr>,
        now: Instant,
    ) -> Result<(), ActuatorFault> {
        tracing::debug!(len = payload.len(), ?peer, raw = ?payload, "datagram");

        let command = match self.codec.decode(payload) {
            Ok(command) => command,
            Err(error) => {
                self.diagnostics
                    .report(DiagnosticEvent::DecodeFailed { peer, error });
                return Ok(());
            }
        };

        if let Err(last_accepted) = self
            .sequence
            .admit(command.sequence(), self.watchdog.status())
        {
            self.diagnostics.report(DiagnosticEvent::StaleDropped {
                sequence: command.sequence().unwrap_or_default(),
                last_accepted,
            });
            return Ok(());
        }

        if let Some(to) = peer {
            if self.peer != Some(to) {
                self.diagnostics.report(DiagnosticEvent::SourceChanged {
                    from: self.peer,
                    to,
                });
                self.peer = Some(to);
            }
        }

        if let Some(Transition::Restored { outage }) = self.watchdog.feed(now) {
            self.diagnostics
                .report(DiagnosticEvent::LinkRestored { outage });
        }

        self.guard(|mapper| mapper.apply(&command))?;
        tracing::debug!(
            command = %serde_json::to_string(&command).unwrap_or_default(),
            "command accepted"
        );
        self.last_command = Some(command);
        Ok(())
    }

    /// Check the watchdog; on expiry stop the motors.
    pub fn on_tick(
        &mut self,
        now: Instant,
    ) -> Result<(), ActuatorFault> {
        if let Some(Transition::Lost { silent_for }) = self.watchdog.poll(now) {
            self.diagnostics
                .report(DiagnosticEvent::LinkLost { silent_for });
            self.guard(|mapper| mapper.apply_safe_state())?;
        }
        Ok(())
    }

    /// How long the next receive may block.
    pub fn wait_budget(
        &self,
        now: Instant,
    ) -> Duration {
        self.watchdog
            .time_remaining(now)
            .clamp(MIN_WAIT, self.watchdog.timeout().max(MIN_WAIT))
    }

    pub fn link_status(&self) -> LinkStatus {
        self.watchdog.status()
    }

    pub fn watchdog(&self) -> &LinkWatchdog {
        &self.watchdog
    }

    /// Last command that reached the motion mapper.
    pub fn last_command(&self) -> Option<&Command> {
        self.last_command.as_ref()
    }

    pub fn mapper(&self) -> &MotionMapper<D> {
        &self.mapper
    }

    /// Take the mapper back, e.g. to shut it down explicitly.
    pub fn into_mapper(self) -> MotionMapper<D> {
        self.mapper
    }

    fn report_io(
        &mut self,
        error: &io::Error,
    ) {
        self.diagnostics.report(DiagnosticEvent::ReceiveFailed {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn guard(
        &mut self,
        write: impl FnOnce(&mut MotionMapper<D>) -> Result<(), ActuatorFault>,
    ) -> Result<(), ActuatorFault> {
        write(&mut self.mapper).inspect_err(|fault| {
            self.diagnostics
                .report(DiagnosticEvent::ActuatorFault(fault.clone()))
        })
    }
}

/// Owner of the command socket.
pub struct UdpReceiver {
    socket: UdpSocket,
    buffer: [u8; MAX_DATAGRAM_LEN],
}

impl UdpReceiver {
    pub fn bind(addr: SocketAddr) -> Result<Self, BindError> {
        let socket = UdpSocket::bind(addr).map_err(|source| BindError::Bind { addr, source })?;
        Ok(Self {
            socket,
            buffer: [0; MAX_DATAGRAM_LEN],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BindError> {
        self.socket.local_addr().map_err(BindError::Configure)
    }

    /// Receive and act until `shutdown` is raised.
    ///
    /// Returns only on shutdown or on an actuator fault; lost, late or broken
    /// datagrams never end the loop.
    pub fn run<D: ActuatorDriver, R: Diagnostics>(
        &mut self,
        control: &mut ControlLoop<D, R>,
        shutdown: &AtomicBool,
    ) -> Result<(), ActuatorFault> {
        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(%addr, "listening for commands");
        }

        while !shutdown.load(Ordering::Relaxed) {
            let wait = control.wait_budget(Instant::now());
            if let Err(error) = self.socket.set_read_timeout(Some(wait)) {
                control.report_io(&error);
            }

            match self.socket.recv_from(&mut self.buffer) {
                Ok((len, peer)) => {
                    control.on_datagram(&self.buffer[..len], Some(peer), Instant::now())?
                }
                Err(error) if is_timeout(&error) => {}
                Err(error) => control.report_io(&error),
            }

            control.on_tick(Instant::now())?;
        }

        tracing::info!("shutdown requested");
        Ok(())
    }
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
