//! Observability and Metrics
//!
//! Per-channel counters for call traffic, correlation outcomes and link
//! health. Each data channel owns one [`Metrics`]; servers aggregate their
//! own session counters.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for one channel
#[derive(Debug)]
pub struct Metrics {
    /// Call blocks sent
    pub calls_sent: AtomicU64,
    /// Call blocks received
    pub calls_received: AtomicU64,
    /// Replies sent
    pub replies_sent: AtomicU64,
    /// Replies received and matched to a pending call
    pub replies_matched: AtomicU64,
    /// Replies received for a request no longer pending
    pub replies_orphaned: AtomicU64,
    /// Event blocks sent
    pub events_sent: AtomicU64,
    /// Event blocks received
    pub events_received: AtomicU64,
    /// Calls that hit the call timeout
    pub call_timeouts: AtomicU64,
    /// Calls answered with a failure reply
    pub remote_errors: AtomicU64,
    /// Frames dropped because their content could not be decoded
    pub frames_discarded: AtomicU64,
    /// Streams attached (first connection plus every reconnect)
    pub attachments: AtomicU64,
    /// Attached streams lost to I/O or framing errors
    pub links_lost: AtomicU64,
    /// Total bytes sent, including frame headers
    pub bytes_sent: AtomicU64,
    /// Total bytes received, including frame headers
    pub bytes_received: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            calls_sent: AtomicU64::new(0),
            calls_received: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            replies_matched: AtomicU64::new(0),
            replies_orphaned: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            call_timeouts: AtomicU64::new(0),
            remote_errors: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            attachments: AtomicU64::new(0),
            links_lost: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an outbound call of `byte_count` frame bytes
    pub fn call_sent(&self, byte_count: u64) {
        self.calls_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn reply_sent(&self, byte_count: u64) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn event_sent(&self, byte_count: u64) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record the raw size of any inbound frame
    pub fn frame_received(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn call_received(&self) {
        self.calls_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply, matched or not
    pub fn reply_received(&self, matched: bool) {
        if matched {
            self.replies_matched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.replies_orphaned.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn call_timeout(&self) {
        self.call_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attached(&self) {
        self.attachments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_lost(&self) {
        self.links_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_sent: self.calls_sent.load(Ordering::Relaxed),
            calls_received: self.calls_received.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            replies_matched: self.replies_matched.load(Ordering::Relaxed),
            replies_orphaned: self.replies_orphaned.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            call_timeouts: self.call_timeouts.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            attachments: self.attachments.load(Ordering::Relaxed),
            links_lost: self.links_lost.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            calls_sent = snapshot.calls_sent,
            calls_received = snapshot.calls_received,
            replies_sent = snapshot.replies_sent,
            replies_matched = snapshot.replies_matched,
            replies_orphaned = snapshot.replies_orphaned,
            events_sent = snapshot.events_sent,
            events_received = snapshot.events_received,
            call_timeouts = snapshot.call_timeouts,
            remote_errors = snapshot.remote_errors,
            frames_discarded = snapshot.frames_discarded,
            attachments = snapshot.attachments,
            links_lost = snapshot.links_lost,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            uptime_seconds = snapshot.uptime_seconds,
            "Channel metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub calls_sent: u64,
    pub calls_received: u64,
    pub replies_sent: u64,
    pub replies_matched: u64,
    pub replies_orphaned: u64,
    pub events_sent: u64,
    pub events_received: u64,
    pub call_timeouts: u64,
    pub remote_errors: u64,
    pub frames_discarded: u64,
    pub attachments: u64,
    pub links_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = Metrics::new();
        m.call_sent(20);
        m.call_sent(5);
        m.reply_received(true);
        m.reply_received(false);
        m.frame_discarded();

        let s = m.snapshot();
        assert_eq!(s.calls_sent, 2);
        assert_eq!(s.bytes_sent, 25);
        assert_eq!(s.replies_matched, 1);
        assert_eq!(s.replies_orphaned, 1);
        assert_eq!(s.frames_discarded, 1);
    }
}
