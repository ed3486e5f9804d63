//! Link-loss watchdog.
//!
//! `LinkWatchdog` is a pure state machine over caller-supplied instants. The
//! receiver feeds it on every accepted command and polls it on every wake;
//! it reports each `Live -> Lost` edge exactly once so the safe state is
//! written once per outage rather than on every poll.

use std::time::{Duration, Instant};

/// Whether commands are currently arriving in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Live,
    Lost,
}

/// Edge reported by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Silence exceeded the timeout; apply the safe state now.
    Lost { silent_for: Duration },
    /// A command arrived after an outage.
    Restored { outage: Duration },
}

#[derive(Debug, Clone)]
pub struct LinkWatchdog {
    last_receipt: Instant,
    lost_at: Option<Instant>,
    timeout: Duration,
    status: LinkStatus,
}

impl LinkWatchdog {
    /// Start `Live`, as if a command had been accepted at `now`.
    pub fn new(
        timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            last_receipt: now,
            lost_at: None,
            timeout,
            status: LinkStatus::Live,
        }
    }

    /// Record an accepted command.
    pub fn feed(
        &mut self,
        now: Instant,
    ) -> Option<Transition> {
        self.last_receipt = now;
        match self.status {
            LinkStatus::Live => None,
            LinkStatus::Lost => {
                self.status = LinkStatus::Live;
                let outage = self
                    .lost_at
                    .take()
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                Some(Transition::Restored { outage })
            }
        }
    }

    /// Check for expiry. Reports `Lost` only on the `Live -> Lost` edge.
    pub fn poll(
        &mut self,
        now: Instant,
    ) -> Option<Transition> {
        if self.status == LinkStatus::Lost {
            return None;
        }
        let silent_for = now.saturating_duration_since(self.last_receipt);
        if silent_for > self.timeout {
            self.status = LinkStatus::Lost;
            self.lost_at = Some(now);
            Some(Transition::Lost { silent_for })
        } else {
            None
        }
    }

    /// Time left before the link is declared lost; the full timeout once it
    /// already is.
    pub fn time_remaining(
        &self,
        now: Instant,
    ) -> Duration {
        match self.status {
            LinkStatus::Lost => self.timeout,
            LinkStatus::Live => {
                let deadline = self.last_receipt + self.timeout;
                deadline.saturating_duration_since(now)
            }
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn last_receipt(&self) -> Instant {
        self.last_receipt
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn starts_live() {
        let t0 = Instant::now();
        let wd = LinkWatchdog::new(TIMEOUT, t0);
        assert_eq!(wd.status(), LinkStatus::Live);
        assert_eq!(wd.time_remaining(t0), TIMEOUT);
    }

    #[test]
    fn exactly_timeout_is_still_live() {
        let t0 = Instant::now();
        let mut wd = LinkWatchdog::new(TIMEOUT, t0);
        assert_eq!(wd.poll(t0 + ms(300)), None);
        assert_eq!(wd.status(), LinkStatus::Live);
    }

    #[test]
    fn loss_is_reported_once_per_outage() {
        let t0 = Instant::now();
        let mut wd = LinkWatchdog::new(TIMEOUT, t0);

        assert_eq!(
            wd.poll(t0 + ms(301)),
            Some(Transition::Lost {
                silent_for: ms(301)
            })
        );
        assert_eq!(wd.poll(t0 + ms(400)), None);
        assert_eq!(wd.poll(t0 + ms(5_000)), None);
        assert_eq!(wd.status(), LinkStatus::Lost);
    }

    #[test]
    fn feed_restores_and_rearms() {
        let t0 = Instant::now();
        let mut wd = LinkWatchdog::new(TIMEOUT, t0);
        wd.poll(t0 + ms(301));

        assert_eq!(
            wd.feed(t0 + ms(500)),
            Some(Transition::Restored { outage: ms(199) })
        );
        assert_eq!(wd.status(), LinkStatus::Live);
        assert_eq!(wd.poll(t0 + ms(700)), None);
        assert!(matches!(
            wd.poll(t0 + ms(801)),
            Some(Transition::Lost { .. })
        ));
    }

    #[test]
    fn feeding_while_live_reports_nothing() {
        let t0 = Instant::now();
        let mut wd = LinkWatchdog::new(TIMEOUT, t0);
        assert_eq!(wd.feed(t0 + ms(100)), None);
        assert_eq!(wd.last_receipt(), t0 + ms(100));
        assert_eq!(wd.time_remaining(t0 + ms(150)), ms(250));
    }

    #[test]
    fn remaining_time_never_underflows() {
        let t0 = Instant::now();
        let wd = LinkWatchdog::new(TIMEOUT, t0);
        assert_eq!(wd.time_remaining(t0 + ms(1_000)), Duration::ZERO);
    }
}
