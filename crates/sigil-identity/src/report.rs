//! Resolution events for an injected observability sink.
//!
//! The engine never touches global counters; it reports through a
//! [`Reporter`] handed to it at construction.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

/// Which network lookup was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupMethod {
    DnsTxt,
    WellKnown,
    PlcDirectory,
    DidWeb,
}

/// Something worth counting happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    LookupAttempted(LookupMethod),
    CacheHit,
    CacheMiss,
    /// A caller joined a resolution already in flight.
    Coalesced,
    Mismatch,
    Invalidated,
}

/// Sink for resolution events.
pub trait Reporter: Send + Sync {
    fn report(&self, event: Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _event: Event) {}
}

/// Emits each event as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: Event) {
        match event {
            Event::Mismatch => warn!(?event, "identity verification mismatch"),
            _ => debug!(?event, "identity resolution event"),
        }
    }
}

/// Snapshot of [`CountingReporter`] totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolverStats {
    pub dns_lookups: u64,
    pub well_known_lookups: u64,
    pub plc_lookups: u64,
    pub did_web_lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub coalesced: u64,
    pub mismatches: u64,
    pub invalidations: u64,
}

impl ResolverStats {
    /// Total network lookups of any kind.
    pub fn lookups(&self) -> u64 {
        self.dns_lookups + self.well_known_lookups + self.plc_lookups + self.did_web_lookups
    }

    /// Share of cache lookups answered from memory.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Counts events in atomics.
#[derive(Debug, Default)]
pub struct CountingReporter {
    dns_lookups: AtomicU64,
    well_known_lookups: AtomicU64,
    plc_lookups: AtomicU64,
    did_web_lookups: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    coalesced: AtomicU64,
    mismatches: AtomicU64,
    invalidations: AtomicU64,
}

impl CountingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ResolverStats {
        ResolverStats {
            dns_lookups: self.dns_lookups.load(Ordering::Relaxed),
            well_known_lookups: self.well_known_lookups.load(Ordering::Relaxed),
            plc_lookups: self.plc_lookups.load(Ordering::Relaxed),
            did_web_lookups: self.did_web_lookups.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Reporter for CountingReporter {
    fn report(&self, event: Event) {
        let counter = match event {
            Event::LookupAttempted(LookupMethod::DnsTxt) => &self.dns_lookups,
            Event::LookupAttempted(LookupMethod::WellKnown) => &self.well_known_lookups,
            Event::LookupAttempted(LookupMethod::PlcDirectory) => &self.plc_lookups,
            Event::LookupAttempted(LookupMethod::DidWeb) => &self.did_web_lookups,
            Event::CacheHit => &self.cache_hits,
            Event::CacheMiss => &self.cache_misses,
            Event::Coalesced => &self.coalesced,
            Event::Mismatch => &self.mismatches,
            Event::Invalidated => &self.invalidations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
