//! Adaptive keepalive/timeout accounting for one tunnel
//!
//! The counter's sign encodes the current regime: negative while the
//! tunnel is mostly receiving, positive while it is mostly sending. Real
//! traffic snaps it back to the regime boundary (`0` or `1`); idle
//! iterations push it outward by the tick size until either a keepalive
//! burst is due (long silence from the peer) or the session has been
//! sending unreciprocated for too long and must be torn down. Both peers
//! run the same state machine, so the thresholds are part of the wire
//! contract.

/// Milliseconds added per idle iteration.
pub const IDLE_TICK_MS: i32 = 100;

/// Silence threshold that triggers a keepalive burst, about ten seconds.
pub const KEEPALIVE_THRESHOLD_MS: i32 = -10_000;

/// Unreciprocated-sending threshold that ends the session.
pub const TIMEOUT_LIMIT_MS: i32 = 60_000;

/// Keepalive frames sent per burst to tolerate datagram loss.
pub const KEEPALIVE_BURST: usize = 3;

/// What an idle iteration asks the forwarding loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// Nothing due; keep polling.
    Wait,
    /// Peer has been silent too long; send a keepalive burst.
    SendKeepalive,
    /// Sent without reply for too long; end the session.
    TimedOut,
}

/// The per-tunnel adaptive timer.
#[derive(Debug, Default)]
pub struct FlowTimer {
    value: i32,
}

impl FlowTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value; negative means receiving regime.
    pub fn value(&self) -> i32 {
        self.value
    }

    /// A packet went out to the peer; switch to the sending regime.
    pub fn mark_sent(&mut self) {
        if self.value < 1 {
            self.value = 1;
        }
    }

    /// A record arrived from the peer; switch to the receiving regime.
    pub fn mark_received(&mut self) {
        if self.value > 0 {
            self.value = 0;
        }
    }

    /// Account one idle sleep and report what is due.
    ///
    /// When a keepalive becomes due the timer flips to the sending
    /// regime itself (`value = 1`), so the burst is sent at most once
    /// per silent stretch.
    pub fn idle_tick(&mut self) -> IdleVerdict {
        self.value += if self.value > 0 {
            IDLE_TICK_MS
        } else {
            -IDLE_TICK_MS
        };

        if self.value < KEEPALIVE_THRESHOLD_MS {
            self.value = 1;
            return IdleVerdict::SendKeepalive;
        }
        if self.value > TIMEOUT_LIMIT_MS {
            return IdleVerdict::TimedOut;
        }
        IdleVerdict::Wait
    }
}
