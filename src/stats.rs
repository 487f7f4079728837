//! Read-only session statistics snapshot.
//!
//! All latency fields use the sentinel convention from the source system:
//! `-1` means "not yet measured", `-2` means "measurement failed".

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub(crate) const NOT_MEASURED: i64 = -1;
pub(crate) const MEASURE_ERROR: i64 = -2;

/// Atomically-updated counters owned by the network task; [`MediaStats`] is
/// the point-in-time, `Copy`-able snapshot handed back to callers.
#[derive(Debug, Default)]
pub(crate) struct StatsInner {
    pub(crate) turn_alloc_ms: AtomicI64,
    pub(crate) nat_estab_ms: AtomicI64,
    pub(crate) dtls_estab_ms: AtomicI64,
    pub(crate) dtls_pkt_sent: AtomicU64,
    pub(crate) dtls_pkt_recv: AtomicU64,
    pub(crate) demux_drop_count: AtomicU64,
}

impl StatsInner {
    pub(crate) fn new() -> Self {
        Self {
            turn_alloc_ms: AtomicI64::new(NOT_MEASURED),
            nat_estab_ms: AtomicI64::new(NOT_MEASURED),
            dtls_estab_ms: AtomicI64::new(NOT_MEASURED),
            dtls_pkt_sent: AtomicU64::new(0),
            dtls_pkt_recv: AtomicU64::new(0),
            demux_drop_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn snapshot(&self) -> MediaStats {
        MediaStats {
            turn_alloc_ms: self.turn_alloc_ms.load(Ordering::Relaxed),
            nat_estab_ms: self.nat_estab_ms.load(Ordering::Relaxed),
            dtls_estab_ms: self.dtls_estab_ms.load(Ordering::Relaxed),
            dtls_pkt_sent: self.dtls_pkt_sent.load(Ordering::Relaxed),
            dtls_pkt_recv: self.dtls_pkt_recv.load(Ordering::Relaxed),
            demux_drop_count: self.demux_drop_count.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn mark_error(&self, field: &AtomicI64) {
        field.store(MEASURE_ERROR, Ordering::Relaxed);
    }
}

/// Snapshot returned by [`crate::session::MediaSession::get_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    pub turn_alloc_ms: i64,
    pub nat_estab_ms: i64,
    pub dtls_estab_ms: i64,
    pub dtls_pkt_sent: u64,
    pub dtls_pkt_recv: u64,
    pub demux_drop_count: u64,
}
