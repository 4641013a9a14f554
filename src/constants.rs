use std::time::Duration;

// Size units
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;
pub const GB: usize = 1024 * MB;

// Database defaults
pub const DEFAULT_MAP_SIZE: usize = GB;
pub const DEFAULT_MAX_TABLES: u32 = 128;
pub const DEFAULT_CACHE_SIZE: usize = 64 * MB;
pub const DB_FILE_NAME: &str = "data.redb";

// Schema version packing: major in the high 16 bits, minor in the low 16 bits
pub const DEFAULT_VERSION_MAJOR: u16 = 1;
pub const DEFAULT_VERSION_MINOR: u16 = 0;

/// Pack a `major.minor` schema version into its 32-bit form.
#[inline]
pub const fn schema_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | minor as u32
}

// Index flags (low 32 bits of an extractor id)
pub const INDEX_FLAG_UNIQUE: u32 = 0x01;
pub const INDEX_FLAG_SPARSE: u32 = 0x02;

/// Build the persisted identity of an extractor.
///
/// Bits 63..32 carry the schema version, bits 31..0 the index flags.
#[inline]
pub const fn build_extractor_id(version: u32, flags: u32) -> u64 {
    ((version as u64) << 32) | flags as u64
}

/// Index flags for a unique/sparse combination.
#[inline]
pub const fn index_flags(unique: bool, sparse: bool) -> u32 {
    let mut flags = 0;
    if unique {
        flags |= INDEX_FLAG_UNIQUE;
    }
    if sparse {
        flags |= INDEX_FLAG_SPARSE;
    }
    flags
}

// Reserved table names
pub const INDEX_META_TABLE: &str = "__wtree3_index_meta__";
pub const INDEX_TABLE_PREFIX: &str = "idx:";

// Index metadata record layout
pub const INDEX_META_HEADER_SIZE: usize = 16;

// Error record limits
pub const ERROR_LABEL_MAX: usize = 64;
pub const ERROR_MESSAGE_MAX: usize = 256;
pub const STORE_LABEL: &str = "wtree3";
pub const QUEUE_LABEL: &str = "wtq";
pub const CONSUMER_LABEL: &str = "wtc";

// Consumer defaults
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(1);
pub const LATENCY_SAMPLES: usize = 100;
pub const UNHEALTHY_ERROR_STREAK: u64 = 10;
pub const MAX_BACKOFF_SHIFT: u32 = 16;
