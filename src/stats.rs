use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, ErrorCode};

/// Per-database operation counters
#[derive(Debug)]
pub struct Statistics {
    // Operation counters
    pub total_gets: AtomicU64,
    pub total_inserts: AtomicU64,
    pub total_updates: AtomicU64,
    pub total_upserts: AtomicU64,
    pub total_deletes: AtomicU64,
    pub total_scans: AtomicU64,

    // Operation latencies (in nanoseconds)
    pub get_latency_ns: AtomicU64,
    pub write_latency_ns: AtomicU64,

    // Transactions
    pub commits: AtomicU64,
    pub aborts: AtomicU64,

    // Error counters
    pub not_found_errors: AtomicU64,
    pub key_exists_errors: AtomicU64,
    pub index_violations: AtomicU64,
    pub map_full_errors: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            total_gets: AtomicU64::new(0),
            total_inserts: AtomicU64::new(0),
            total_updates: AtomicU64::new(0),
            total_upserts: AtomicU64::new(0),
            total_deletes: AtomicU64::new(0),
            total_scans: AtomicU64::new(0),

            get_latency_ns: AtomicU64::new(0),
            write_latency_ns: AtomicU64::new(0),

            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),

            not_found_errors: AtomicU64::new(0),
            key_exists_errors: AtomicU64::new(0),
            index_violations: AtomicU64::new(0),
            map_full_errors: AtomicU64::new(0),
        }
    }

    /// Record a get operation
    pub fn record_get(&self, latency_ns: u64) {
        self.total_gets.fetch_add(1, Ordering::Relaxed);
        self.get_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    /// Record an insert; `replaced` marks an update of an existing key
    pub fn record_insert(&self, latency_ns: u64, replaced: bool) {
        if replaced {
            self.total_updates.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_inserts.fetch_add(1, Ordering::Relaxed);
        }
        self.write_latency_ns
            .fetch_add(latency_ns, Ordering::Relaxed);
    }

    pub fn record_upsert(&self) {
        self.total_upserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delete operation
    pub fn record_delete(&self, latency_ns: u64) {
        self.total_deletes.fetch_add(1, Ordering::Relaxed);
        self.write_latency_ns
            .fetch_add(latency_ns, Ordering::Relaxed);
    }

    pub fn record_scan(&self) {
        self.total_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record errors
    pub fn record_error(&self, error: &Error) {
        match error.code() {
            ErrorCode::NotFound => {
                self.not_found_errors.fetch_add(1, Ordering::Relaxed);
            }
            ErrorCode::KeyExists => {
                self.key_exists_errors.fetch_add(1, Ordering::Relaxed);
            }
            ErrorCode::IndexError => {
                self.index_violations.fetch_add(1, Ordering::Relaxed);
            }
            ErrorCode::MapFull => {
                self.map_full_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> StatsSnapshot {
        let gets = self.total_gets.load(Ordering::Relaxed);
        let writes = self.total_inserts.load(Ordering::Relaxed)
            + self.total_updates.load(Ordering::Relaxed)
            + self.total_deletes.load(Ordering::Relaxed);

        let avg_get_latency = if gets > 0 {
            self.get_latency_ns.load(Ordering::Relaxed) / gets
        } else {
            0
        };

        let avg_write_latency = if writes > 0 {
            self.write_latency_ns.load(Ordering::Relaxed) / writes
        } else {
            0
        };

        StatsSnapshot {
            total_operations: gets + writes,
            total_gets: gets,
            total_inserts: self.total_inserts.load(Ordering::Relaxed),
            total_updates: self.total_updates.load(Ordering::Relaxed),
            total_upserts: self.total_upserts.load(Ordering::Relaxed),
            total_deletes: self.total_deletes.load(Ordering::Relaxed),
            total_scans: self.total_scans.load(Ordering::Relaxed),
            avg_get_latency_ns: avg_get_latency,
            avg_write_latency_ns: avg_write_latency,
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            not_found_errors: self.not_found_errors.load(Ordering::Relaxed),
            key_exists_errors: self.key_exists_errors.load(Ordering::Relaxed),
            index_violations: self.index_violations.load(Ordering::Relaxed),
            map_full_errors: self.map_full_errors.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.total_gets.store(0, Ordering::Relaxed);
        self.total_inserts.store(0, Ordering::Relaxed);
        self.total_updates.store(0, Ordering::Relaxed);
        self.total_upserts.store(0, Ordering::Relaxed);
        self.total_deletes.store(0, Ordering::Relaxed);
        self.total_scans.store(0, Ordering::Relaxed);
        self.get_latency_ns.store(0, Ordering::Relaxed);
        self.write_latency_ns.store(0, Ordering::Relaxed);
        self.commits.store(0, Ordering::Relaxed);
        self.aborts.store(0, Ordering::Relaxed);
        self.not_found_errors.store(0, Ordering::Relaxed);
        self.key_exists_errors.store(0, Ordering::Relaxed);
        self.index_violations.store(0, Ordering::Relaxed);
        self.map_full_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of statistics at a point in time
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    // Operations
    pub total_operations: u64,
    pub total_gets: u64,
    pub total_inserts: u64,
    pub total_updates: u64,
    pub total_upserts: u64,
    pub total_deletes: u64,
    pub total_scans: u64,

    // Latencies (nanoseconds)
    pub avg_get_latency_ns: u64,
    pub avg_write_latency_ns: u64,

    // Transactions
    pub commits: u64,
    pub aborts: u64,

    // Errors
    pub not_found_errors: u64,
    pub key_exists_errors: u64,
    pub index_violations: u64,
    pub map_full_errors: u64,
}

impl StatsSnapshot {
    /// Format statistics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "=== wtree Statistics ===\n\
            Operations:\n\
            - Total: {}\n\
            - Gets: {} (avg latency: {:.2}μs)\n\
            - Inserts: {}\n\
            - Updates: {}\n\
            - Upserts: {}\n\
            - Deletes: {}\n\
            - Write latency (avg): {:.2}μs\n\
            - Scans: {}\n\n\
            Transactions:\n\
            - Commits: {}\n\
            - Aborts: {}\n\n\
            Errors:\n\
            - Not Found: {}\n\
            - Key Exists: {}\n\
            - Index Violations: {}\n\
            - Map Full: {}",
            self.total_operations,
            self.total_gets,
            self.avg_get_latency_ns as f64 / 1000.0,
            self.total_inserts,
            self.total_updates,
            self.total_upserts,
            self.total_deletes,
            self.avg_write_latency_ns as f64 / 1000.0,
            self.total_scans,
            self.commits,
            self.aborts,
            self.not_found_errors,
            self.key_exists_errors,
            self.index_violations,
            self.map_full_errors
        )
    }
}
