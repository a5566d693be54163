//! Observability and Metrics
//!
//! Counters kept by every protocol context. Connections update them as frames
//! move and handshakes complete; `snapshot()` and `log_metrics()` read them back.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector shared by the connections of one context
#[derive(Debug)]
pub struct Metrics {
    /// Connections attached to the context
    pub connections_total: AtomicU64,
    /// Connections not yet retired
    pub connections_active: AtomicU64,
    /// Handshakes started
    pub handshakes_total: AtomicU64,
    /// Handshakes that reached READY
    pub handshakes_success: AtomicU64,
    /// Connections retired before READY
    pub handshakes_failed: AtomicU64,
    /// Frames written
    pub frames_sent: AtomicU64,
    /// Frames decoded
    pub frames_received: AtomicU64,
    /// Wire bytes written, headers included
    pub bytes_sent: AtomicU64,
    /// Wire bytes read, headers included
    pub bytes_received: AtomicU64,
    /// Messages sent with the fallback serializer
    pub serialization_fallbacks: AtomicU64,
    /// Messages sent with weaker encryption than requested
    pub encryption_fallbacks: AtomicU64,
    /// Connections retired for a corrupt stream or undecodable frame
    pub framing_errors: AtomicU64,
    /// Control messages that arrived out of order and were ignored
    pub suspicious_messages: AtomicU64,
    /// Handlers that returned an error or panicked
    pub handler_failures: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            serialization_fallbacks: AtomicU64::new(0),
            encryption_fallbacks: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            suspicious_messages: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame written, `byte_count` including its header
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame read, `byte_count` including its header
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn serialization_fallback(&self) {
        self.serialization_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encryption_fallback(&self) {
        self.encryption_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn suspicious_message(&self) {
        self.suspicious_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            serialization_fallbacks: self.serialization_fallbacks.load(Ordering::Relaxed),
            encryption_fallbacks: self.encryption_fallbacks.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            suspicious_messages: self.suspicious_messages.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            serialization_fallbacks = snapshot.serialization_fallbacks,
            encryption_fallbacks = snapshot.encryption_fallbacks,
            framing_errors = snapshot.framing_errors,
            suspicious_messages = snapshot.suspicious_messages,
            handler_failures = snapshot.handler_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub serialization_fallbacks: u64,
    pub encryption_fallbacks: u64,
    pub framing_errors: u64,
    pub suspicious_messages: u64,
    pub handler_failures: u64,
    pub uptime_seconds: u64,
}
