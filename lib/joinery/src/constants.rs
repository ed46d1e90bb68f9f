//! Centralized environment variable names and default values for runtime tuning.

// Environment variable names
pub const ENV_NUM_REDUCERS: &str = "JOINERY_NUM_REDUCERS";
pub const ENV_THREADS: &str = "JOINERY_THREADS";
pub const ENV_BLOOM_BITS: &str = "JOINERY_BLOOM_BITS";
pub const ENV_BLOOM_HASHES: &str = "JOINERY_BLOOM_HASHES";
pub const ENV_KEEP_EMPTY_PARTS: &str = "JOINERY_KEEP_EMPTY_PARTS";

/// Reduce tasks per job when nothing else is configured.
pub const DEFAULT_NUM_REDUCERS: usize = 10;

// Sized for tens of thousands of reference urls at well under 1% false positives
pub const DEFAULT_BLOOM_BITS: usize = 32 * 1024 * 1024; // 4 MiB of bits
pub const DEFAULT_BLOOM_HASHES: usize = 24;

/// Initial capacity of each per-partition shuffle buffer in a map task.
pub const MAP_BUFFER_BYTES: usize = 64 * 1024;

/// Container file magic and version.
pub const CONTAINER_MAGIC: &[u8; 4] = b"JNRY";
pub const CONTAINER_VERSION: u8 = 1;
pub const CONTAINER_VALUE_TYPE: &str = "Any";
