//! Per-connection message rate tracking
//!
//! Counts received messages in a rolling one-second window. The window is
//! reset lazily, on the first message that arrives more than a second after
//! the last reset.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Counters {
    total_received: u64,
    received_in_window: u32,
    window_started: Instant,
}

/// Message counters for one connection
#[derive(Debug)]
pub struct ConnectionMonitoring {
    counters: Mutex<Counters>,
}

impl ConnectionMonitoring {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters {
                total_received: 0,
                received_in_window: 0,
                window_started: Instant::now(),
            }),
        }
    }

    /// Record one received message and return the count in the current window
    pub fn record_message(&self) -> u32 {
        self.record_message_at(Instant::now())
    }

    fn record_message_at(&self, now: Instant) -> u32 {
        let mut counters = self.counters.lock();
        if now.saturating_duration_since(counters.window_started) > WINDOW {
            counters.window_started = now;
            counters.received_in_window = 0;
        }
        counters.total_received += 1;
        counters.received_in_window = counters.received_in_window.saturating_add(1);
        counters.received_in_window
    }

    /// Record one message and check it against `max_per_second`.
    ///
    /// A ceiling of 0 disables the check.
    pub fn exceeds(&self, max_per_second: u32) -> bool {
        let in_window = self.record_message();
        max_per_second > 0 && in_window > max_per_second
    }

    /// Total messages received since creation
    pub fn total_received(&self) -> u64 {
        self.counters.lock().total_received
    }

    /// Messages received in the current window
    pub fn received_in_window(&self) -> u32 {
        self.counters.lock().received_in_window
    }
}

impl Default for ConnectionMonitoring {
    fn default() -> Self {
        Self::new()
    }
}
