use std::time::Duration;
use tokio::time::Instant;

/// Idle timer bound to one connection.
///
/// Exchanges sometimes stop pushing data on a dead socket without ever
/// sending a close frame. The watchdog is armed while connected and pushed
/// forward by every inbound frame; once its deadline passes the driver
/// recycles the connection and the watchdog stays disarmed until the next
/// successful connect.
#[derive(Debug, Clone)]
pub struct Watchdog {
    idle: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    pub const fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: None,
        }
    }

    pub const fn idle(&self) -> Duration {
        self.idle
    }

    /// Arm the timer from now
    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.idle);
    }

    /// Record inbound activity. No effect while disarmed.
    pub fn touch(&mut self) {
        if self.deadline.is_some() {
            self.start();
        }
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and report whether the deadline had passed.
    ///
    /// Returns true at most once per arming.
    pub fn take_expired(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
