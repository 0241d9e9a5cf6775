//! Cross-process shared statistics
//!
//! One anonymous `MAP_SHARED` region, created by the master before fork and
//! inherited by every worker. The record embeds its single synchronization
//! primitive: a lock word driven by compare-exchange, the process-shared
//! substitute for a pthread mutex with the process-shared attribute. Counter
//! cells are atomics written with relaxed ordering only while the lock word
//! is held; the lock's acquire/release edges are the linearization point.
//!
//! Critical sections are O(1) scalar updates. No other lock in the system is
//! ever taken while this one is held.

use std::fmt::Display;
use std::hint;
use std::io;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

#[repr(C)]
#[derive(Debug)]
struct StatsRecord {
    lock: AtomicU32,
    total_requests: AtomicU64,
    bytes_sent: AtomicU64,
    code_200: AtomicU64,
    code_404: AtomicU64,
    code_5xx: AtomicU64,
    active_connections: AtomicU64,
    response_time_ms: AtomicU64,
    response_samples: AtomicU64,
    snapshot_time_ms: AtomicU64,
    snapshot_samples: AtomicU64,
}

/// Accumulated response time since the previous
/// [`snapshot_delta_reset`](SharedStats::snapshot_delta_reset) call. Feeds
/// the `/metrics` since-last-scrape average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingDelta {
    /// Milliseconds accumulated in the window.
    pub time_ms: u64,
    /// Responses timed in the window.
    pub samples: u64,
}

impl TimingDelta {
    /// Average milliseconds per response in the window; zero when no
    /// response was timed.
    pub fn avg_ms(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.time_ms as f64 / self.samples as f64
    }
}

/// A consistent copy of every statistics field, taken under the lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSummary {
    /// Total responses recorded.
    pub total_requests: u64,
    /// Total body bytes sent.
    pub bytes_sent: u64,
    /// Responses with status 200.
    pub code_200: u64,
    /// Responses with status 404.
    pub code_404: u64,
    /// Responses in the 5xx class.
    pub code_5xx: u64,
    /// Connections currently being handled, across all workers.
    pub active_connections: u64,
    /// Milliseconds accumulated over every timed response.
    pub response_time_ms: u64,
    /// Number of timed responses.
    pub response_samples: u64,
}

impl StatsSummary {
    /// Average response time over the whole process lifetime.
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.response_samples == 0 {
            return 0.0;
        }
        self.response_time_ms as f64 / self.response_samples as f64
    }
}

impl Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requests={} bytes={} 200={} 404={} 5xx={} active={} avg_ms={:.2}",
            self.total_requests,
            self.bytes_sent,
            self.code_200,
            self.code_404,
            self.code_5xx,
            self.active_connections,
            self.avg_response_time_ms()
        )
    }
}

/// Handle to the shared statistics region.
///
/// Created once in the master; the mapping address survives `fork`, so the
/// same handle works in every worker. The region is unmapped when the
/// creating process drops the handle (each process unmaps its own view; the
/// pages themselves stay shared until the last view goes).
#[derive(Debug)]
pub struct SharedStats {
    record: NonNull<StatsRecord>,
}

// The record is only ever accessed through its embedded lock.
unsafe impl Send for SharedStats {}
unsafe impl Sync for SharedStats {}

struct StatsGuard<'a> {
    record: &'a StatsRecord,
}

impl Drop for StatsGuard<'_> {
    fn drop(&mut self) {
        self.record.lock.store(UNLOCKED, Ordering::Release);
    }
}

impl SharedStats {
    /// Maps a zeroed anonymous shared region sized for the record.
    pub fn create() -> io::Result<Self> {
        let len = mem::size_of::<StatsRecord>();

        // SAFETY: anonymous mapping, no fd, length is the size of the record
        // we immediately claim ownership of. Anonymous pages come zeroed,
        // which is the correct initial state for every field and leaves the
        // lock word unlocked.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let record =
            NonNull::new(ptr as *mut StatsRecord).expect("mmap returned neither MAP_FAILED nor null");
        Ok(SharedStats { record })
    }

    fn lock(&self) -> StatsGuard<'_> {
        // SAFETY: the pointee lives until every process that can reach this
        // handle has unmapped its view, and all access goes through atomics.
        let record = unsafe { self.record.as_ref() };
        while record
            .lock
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }

        StatsGuard { record }
    }

    /// Counts one finished response: total, bytes, and the matching code
    /// class counter.
    pub fn record_response(&self, bytes: u64, code: u16) {
        let guard = self.lock();
        let r = guard.record;
        r.total_requests.fetch_add(1, Ordering::Relaxed);
        r.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        match code {
            200 => r.code_200.fetch_add(1, Ordering::Relaxed),
            404 => r.code_404.fetch_add(1, Ordering::Relaxed),
            500..=599 => r.code_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Raises the active-connection gauge.
    pub fn increment_active(&self) {
        let guard = self.lock();
        guard.record.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Lowers the active-connection gauge, clamping at zero.
    pub fn decrement_active(&self) {
        let guard = self.lock();
        let gauge = &guard.record.active_connections;
        let current = gauge.load(Ordering::Relaxed);
        if current > 0 {
            gauge.store(current - 1, Ordering::Relaxed);
        }
    }

    /// Accumulates one response's wall time.
    pub fn add_response_time(&self, ms: u64) {
        let guard = self.lock();
        let r = guard.record;
        r.response_time_ms.fetch_add(ms, Ordering::Relaxed);
        r.response_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the response-time accumulation since the previous call and
    /// advances the snapshot to the current accumulator values.
    pub fn snapshot_delta_reset(&self) -> TimingDelta {
        let guard = self.lock();
        let r = guard.record;

        let time_ms = r.response_time_ms.load(Ordering::Relaxed);
        let samples = r.response_samples.load(Ordering::Relaxed);
        let delta = TimingDelta {
            time_ms: time_ms - r.snapshot_time_ms.load(Ordering::Relaxed),
            samples: samples - r.snapshot_samples.load(Ordering::Relaxed),
        };
        r.snapshot_time_ms.store(time_ms, Ordering::Relaxed);
        r.snapshot_samples.store(samples, Ordering::Relaxed);

        delta
    }

    /// One critical section serving a `/metrics` scrape: a full summary plus
    /// the since-last-scrape timing window, which is advanced in place.
    pub fn scrape(&self) -> (StatsSummary, TimingDelta) {
        let guard = self.lock();
        let r = guard.record;

        let summary = Self::read_summary(r);
        let delta = TimingDelta {
            time_ms: summary.response_time_ms - r.snapshot_time_ms.load(Ordering::Relaxed),
            samples: summary.response_samples - r.snapshot_samples.load(Ordering::Relaxed),
        };
        r.snapshot_time_ms
            .store(summary.response_time_ms, Ordering::Relaxed);
        r.snapshot_samples
            .store(summary.response_samples, Ordering::Relaxed);

        (summary, delta)
    }

    /// Takes one consistent snapshot of every field.
    pub fn summary(&self) -> StatsSummary {
        let guard = self.lock();
        Self::read_summary(guard.record)
    }

    fn read_summary(r: &StatsRecord) -> StatsSummary {
        StatsSummary {
            total_requests: r.total_requests.load(Ordering::Relaxed),
            bytes_sent: r.bytes_sent.load(Ordering::Relaxed),
            code_200: r.code_200.load(Ordering::Relaxed),
            code_404: r.code_404.load(Ordering::Relaxed),
            code_5xx: r.code_5xx.load(Ordering::Relaxed),
            active_connections: r.active_connections.load(Ordering::Relaxed),
            response_time_ms: r.response_time_ms.load(Ordering::Relaxed),
            response_samples: r.response_samples.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SharedStats {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the region create() mapped; the handle is
        // neither Clone nor Copy, so this runs once per process view.
        unsafe {
            libc::munmap(
                self.record.as_ptr() as *mut libc::c_void,
                mem::size_of::<StatsRecord>(),
            );
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::SharedStats;

    #[test]
    fn record_response_accumulates_totals_and_code_counters() {
        let stats = SharedStats::create().expect("map stats region");
        stats.record_response(5, 200);
        stats.record_response(100, 404);
        stats.record_response(0, 503);

        let summary = stats.summary();
        assert_eq!(3, summary.total_requests);
        assert_eq!(105, summary.bytes_sent);
        assert_eq!(1, summary.code_200);
        assert_eq!(1, summary.code_404);
        assert_eq!(1, summary.code_5xx);
    }

    #[test]
    fn active_gauge_clamps_at_zero() {
        let stats = SharedStats::create().expect("map stats region");
        stats.decrement_active();
        assert_eq!(0, stats.summary().active_connections);

        stats.increment_active();
        stats.increment_active();
        stats.decrement_active();
        assert_eq!(1, stats.summary().active_connections);
    }

    #[test]
    fn snapshot_delta_reset_windows_the_accumulator() {
        let stats = SharedStats::create().expect("map stats region");
        stats.add_response_time(10);
        stats.add_response_time(30);

        let first = stats.snapshot_delta_reset();
        assert_eq!(40, first.time_ms);
        assert_eq!(2, first.samples);
        assert_eq!(20.0, first.avg_ms());

        let quiet = stats.snapshot_delta_reset();
        assert_eq!(0, quiet.samples);
        assert_eq!(0.0, quiet.avg_ms());

        stats.add_response_time(7);
        let third = stats.snapshot_delta_reset();
        assert_eq!(7, third.time_ms);
        assert_eq!(1, third.samples);

        // The lifetime accumulator is untouched by snapshots.
        assert_eq!(47, stats.summary().response_time_ms);
        assert_eq!(3, stats.summary().response_samples);
    }

    #[test]
    fn concurrent_recording_loses_no_updates() {
        let stats = Arc::new(SharedStats::create().expect("map stats region"));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_response(3, 200);
                        stats.increment_active();
                        stats.decrement_active();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("recorder thread panicked");
        }

        let summary = stats.summary();
        assert_eq!(8000, summary.total_requests);
        assert_eq!(24000, summary.bytes_sent);
        assert_eq!(8000, summary.code_200);
        assert_eq!(0, summary.active_connections);
    }
}
